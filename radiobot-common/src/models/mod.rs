// File: radiobot-common/src/models/mod.rs
pub mod voice;
pub mod now_playing;

pub use voice::{
    AudioResource, FailureKind, LinkEvent, LinkStatus, PlayerEvent, SessionEvent, SessionState,
    VoiceAdapter, VoiceTarget,
};
pub use now_playing::{DjEntry, FeedEntry, NowPlaying, SongEntry};
