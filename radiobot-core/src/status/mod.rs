//! src/status/mod.rs
//!
//! Now-playing status for the voice channel. Independent of the voice
//! session: it only reads the station feed and writes the channel status.

use std::time::Duration;

use async_trait::async_trait;

use radiobot_common::models::now_playing::NowPlaying;
use crate::Error;

pub mod metadata;

pub use metadata::HttpMetadataSource;

pub const DEFAULT_FEED_URL: &str = "https://o.tavrmedia.ua/hit";
pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_STATION_NAME: &str = "Хіт FM";
pub const AD_LABEL: &str = "Ad / talk break";

/// Where the current song / show comes from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self) -> Result<NowPlaying, Error>;
}

/// Where the derived label goes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelStatusSink: Send + Sync {
    async fn set_status(&self, label: &str) -> Result<(), Error>;
}

#[derive(Debug, Clone)]
pub struct StatusConfig {
    pub fetch_interval: Duration,
    pub publish_interval: Duration,
    /// Songs credited to the station itself are jingles, ads or talk.
    pub station_name: String,
    pub ad_label: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            fetch_interval: DEFAULT_FETCH_INTERVAL,
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            station_name: DEFAULT_STATION_NAME.to_string(),
            ad_label: AD_LABEL.to_string(),
        }
    }
}

impl StatusConfig {
    pub fn with_station_name(mut self, name: impl Into<String>) -> Self {
        self.station_name = name.into();
        self
    }
}

/// Turns a feed snapshot into the channel status text. A song beats a DJ
/// entry; nothing at all yields `None`.
pub fn derive_label(now: &NowPlaying, config: &StatusConfig) -> Option<String> {
    if let Some(song) = &now.song {
        if song.singer == config.station_name {
            return Some(config.ad_label.clone());
        }
        return Some(format!("🎤 {} - 💽 {}", song.singer, song.song));
    }
    now.dj
        .as_ref()
        .map(|dj| format!("🎧 {} ({})", dj.title, dj.cur_time))
}
