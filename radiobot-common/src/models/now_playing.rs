// File: radiobot-common/src/models/now_playing.rs

use serde::{Deserialize, Serialize};

/// A track entry in the station's now-playing feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongEntry {
    pub time: String,
    pub singer: String,
    pub song: String,
}

/// A DJ / show entry in the station's now-playing feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DjEntry {
    #[serde(rename = "djType")]
    pub dj_type: String,
    #[serde(default)]
    pub img: Option<String>,
    #[serde(default)]
    pub absnum: Option<String>,
    pub title: String,
    pub cur_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

/// The feed mixes several record shapes in one array. Anything that is not a
/// song or a DJ entry lands in `Other`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FeedEntry {
    Song(SongEntry),
    Dj(DjEntry),
    Other(serde_json::Value),
}

/// Freshest song and DJ entries taken from one feed poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NowPlaying {
    pub song: Option<SongEntry>,
    pub dj: Option<DjEntry>,
}

impl NowPlaying {
    /// Later entries of the same kind win.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = FeedEntry>,
    {
        let mut snapshot = NowPlaying::default();
        for entry in entries {
            match entry {
                FeedEntry::Song(song) => snapshot.song = Some(song),
                FeedEntry::Dj(dj) => snapshot.dj = Some(dj),
                FeedEntry::Other(_) => {}
            }
        }
        snapshot
    }
}
