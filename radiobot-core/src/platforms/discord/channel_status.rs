use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use tracing::debug;
use twilight_model::id::marker::ChannelMarker;
use twilight_model::id::Id;

use crate::status::ChannelStatusSink;
use crate::Error;

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Serialize)]
struct VoiceStatusBody<'a> {
    status: &'a str,
}

/// Sets the voice channel status text through the REST API. Twilight has no
/// route for this endpoint, so it goes out as a plain request.
pub struct DiscordChannelStatus {
    client: reqwest::Client,
    token: String,
    channel_id: Id<ChannelMarker>,
    api_base: String,
}

impl DiscordChannelStatus {
    pub fn new(token: impl Into<String>, channel_id: Id<ChannelMarker>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            token: token.into(),
            channel_id,
            api_base: DISCORD_API_BASE.to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/channels/{}/voice-status", self.api_base, self.channel_id)
    }
}

#[async_trait]
impl ChannelStatusSink for DiscordChannelStatus {
    async fn set_status(&self, label: &str) -> Result<(), Error> {
        let url = self.endpoint();
        debug!("(DiscordChannelStatus) PUT {url}");
        self.client
            .put(&url)
            .header(AUTHORIZATION, format!("Bot {}", self.token))
            .json(&VoiceStatusBody { status: label })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
