// radiobot-server/src/config.rs

use clap::Parser;
use twilight_model::id::marker::{ChannelMarker, GuildMarker};
use twilight_model::id::Id;
use url::Url;

use radiobot_core::status::{StatusConfig, DEFAULT_STATION_NAME};
use radiobot_core::voice::config::DEFAULT_STREAM_VOLUME;
use radiobot_core::{Error, SessionConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "radiobot")]
#[command(author, version, about = "Radiobot - relays an internet radio stream into a Discord voice channel")]
pub struct Args {
    /// Discord bot token
    #[arg(long, env = "APP_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Guild that owns the voice channel
    #[arg(long, env = "GUILD_ID")]
    pub guild_id: u64,

    /// Voice channel to stream into
    #[arg(long, env = "VOICE_CHANNEL_ID")]
    pub voice_channel_id: u64,

    /// Radio stream URL
    #[arg(long, env = "STREAM_URL")]
    pub stream_url: String,

    /// Now-playing feed. Without it the channel status is left alone.
    #[arg(long, env = "TAVR_API_STATUS_URL")]
    pub status_url: Option<String>,

    /// Output gain applied to the stream
    #[arg(long, default_value_t = DEFAULT_STREAM_VOLUME)]
    pub volume: f32,

    /// Feed entries credited to this name are shown as an ad / talk break
    #[arg(long, default_value = DEFAULT_STATION_NAME)]
    pub station_name: String,
}

/// Validated start-up configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub token: String,
    pub guild_id: Id<GuildMarker>,
    pub voice_channel_id: Id<ChannelMarker>,
    pub stream_url: Url,
    pub status_url: Option<Url>,
    pub volume: f32,
    pub station_name: String,
}

impl AppConfig {
    pub fn from_args(args: Args) -> Result<Self, Error> {
        let token = args.token.trim().to_string();
        if token.is_empty() {
            return Err(Error::Config("APP_TOKEN must not be empty".into()));
        }

        let guild_id = Id::new_checked(args.guild_id)
            .ok_or_else(|| Error::Config("GUILD_ID must be a non-zero snowflake".into()))?;
        let voice_channel_id = Id::new_checked(args.voice_channel_id)
            .ok_or_else(|| Error::Config("VOICE_CHANNEL_ID must be a non-zero snowflake".into()))?;

        let stream_url = parse_http_url("STREAM_URL", &args.stream_url)?;
        let status_url = args
            .status_url
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| parse_http_url("TAVR_API_STATUS_URL", raw))
            .transpose()?;

        if !(0.0..=2.0).contains(&args.volume) {
            return Err(Error::Config(format!(
                "volume must be within 0.0..=2.0, got {}",
                args.volume
            )));
        }

        Ok(Self {
            token,
            guild_id,
            voice_channel_id,
            stream_url,
            status_url,
            volume: args.volume,
            station_name: args.station_name,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.stream_url.as_str()).with_volume(self.volume)
    }

    pub fn status_config(&self) -> StatusConfig {
        StatusConfig::default().with_station_name(self.station_name.clone())
    }
}

fn parse_http_url(name: &str, raw: &str) -> Result<Url, Error> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::Config(format!("{name} is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Config(format!("{name} must be http(s), got {other}"))),
    }
}
