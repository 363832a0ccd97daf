// File: src/platforms/discord/mod.rs

pub mod channel_status;
pub mod runtime;
pub mod songbird;

pub use self::channel_status::DiscordChannelStatus;
pub use self::runtime::DiscordPlatform;
pub use self::songbird::{SongbirdLink, SongbirdPlayer, SongbirdTransport};
