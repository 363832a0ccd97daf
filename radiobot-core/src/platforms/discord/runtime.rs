use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use songbird::shards::TwilightMap;
use songbird::Songbird;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use twilight_gateway::{
    self as gateway,
    CloseFrame,
    Config,
    Event,
    EventTypeFlags,
    Intents,
    MessageSender,
    Shard,
    StreamExt,
};
use twilight_http::client::ClientBuilder;
use twilight_http::Client as HttpClient;

use crate::platforms::{ConnectionStatus, PlatformIntegration};
use crate::Error;

/// Gateway events the bot needs: readiness plus everything songbird uses to
/// negotiate voice.
fn wanted_events() -> EventTypeFlags {
    EventTypeFlags::READY
        | EventTypeFlags::GUILD_CREATE
        | EventTypeFlags::VOICE_STATE_UPDATE
        | EventTypeFlags::VOICE_SERVER_UPDATE
}

/// Pulls events off one shard and hands every one to songbird. Flags
/// readiness on `READY`.
async fn shard_runner(mut shard: Shard, songbird: Arc<Songbird>, ready: watch::Sender<bool>) {
    let shard_id = shard.id().number();
    info!("(ShardRunner) Shard {shard_id} started. Listening for events.");

    while let Some(item) = shard.next_event(wanted_events()).await {
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                warn!("(ShardRunner) Shard {shard_id} receive error => {e:?}");
                continue;
            }
        };

        songbird.process(&event).await;

        match &event {
            Event::Ready(data) => {
                info!(
                    "Shard {shard_id} => READY as {} (ID={})",
                    data.user.name, data.user.id
                );
                ready.send_replace(true);
            }
            Event::GuildCreate(guild) => {
                debug!("Shard {shard_id} => guild available: {}", guild.id());
            }
            other => trace!("Shard {shard_id} => {:?}", other.kind()),
        }
    }

    warn!("(ShardRunner) Shard {shard_id} event loop ended.");
}

/// Discord gateway connection plus the songbird voice manager bound to it.
pub struct DiscordPlatform {
    pub token: String,
    pub connection_status: ConnectionStatus,

    pub shard_tasks: Vec<JoinHandle<()>>,
    pub shard_senders: Vec<MessageSender>,

    pub http: Option<Arc<HttpClient>>,
    pub songbird: Option<Arc<Songbird>>,

    ready: watch::Sender<bool>,
}

impl DiscordPlatform {
    pub fn new(token: String) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            token,
            connection_status: ConnectionStatus::Disconnected,
            shard_tasks: Vec::new(),
            shard_senders: Vec::new(),
            http: None,
            songbird: None,
            ready,
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Resolves once any shard has seen `READY`.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), Error> {
        let mut rx = self.ready.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|ready| *ready))
            .await?
            .map_err(|_| Error::Platform("gateway closed before READY".into()))?;
        Ok(())
    }

    pub fn http(&self) -> Result<Arc<HttpClient>, Error> {
        self.http
            .clone()
            .ok_or_else(|| Error::Platform("Discord HTTP client not available".into()))
    }

    pub fn songbird(&self) -> Result<Arc<Songbird>, Error> {
        self.songbird
            .clone()
            .ok_or_else(|| Error::Platform("voice manager not available; connect first".into()))
    }
}

#[async_trait]
impl PlatformIntegration for DiscordPlatform {
    async fn connect(&mut self) -> Result<(), Error> {
        if matches!(self.connection_status, ConnectionStatus::Connected) {
            info!("(DiscordPlatform) Already connected => skipping");
            return Ok(());
        }
        if self.token.is_empty() {
            return Err(Error::Platform("Discord token is empty".into()));
        }

        let http_client = Arc::new(
            ClientBuilder::new()
                .token(self.token.clone())
                .timeout(Duration::from_secs(30))
                .build(),
        );

        let user_id = http_client
            .current_user()
            .await
            .map_err(|e| Error::Platform(format!("current_user error: {e}")))?
            .model()
            .await
            .map_err(|e| Error::Platform(format!("current_user body error: {e}")))?
            .id;

        let config = Config::new(
            self.token.clone(),
            Intents::GUILDS | Intents::GUILD_VOICE_STATES,
        );

        let shards: Vec<Shard> = gateway::create_recommended(&http_client, config, |_, b| b.build())
            .await
            .map_err(|e| Error::Platform(format!("create_recommended error: {e}")))?
            .collect();

        let senders: HashMap<_, _> = shards
            .iter()
            .map(|shard| (shard.id().number().into(), shard.sender()))
            .collect();
        let songbird = Arc::new(Songbird::twilight(Arc::new(TwilightMap::new(senders)), user_id));

        self.ready.send_replace(false);
        for shard in shards {
            self.shard_senders.push(shard.sender());

            let songbird_for_shard = songbird.clone();
            let ready_for_shard = self.ready.clone();
            let handle = tokio::spawn(async move {
                shard_runner(shard, songbird_for_shard, ready_for_shard).await;
            });
            self.shard_tasks.push(handle);
        }

        info!("(DiscordPlatform) gateway started with {} shard(s)", self.shard_tasks.len());
        self.http = Some(http_client);
        self.songbird = Some(songbird);
        self.connection_status = ConnectionStatus::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Error> {
        self.connection_status = ConnectionStatus::Disconnected;
        self.ready.send_replace(false);

        for sender in &self.shard_senders {
            let _ = sender.close(CloseFrame::NORMAL);
        }
        for task in self.shard_tasks.drain(..) {
            if let Err(e) = tokio::time::timeout(Duration::from_secs(5), task).await {
                warn!("(DiscordPlatform) shard did not close in time: {e}");
            }
        }
        self.shard_senders.clear();
        self.songbird = None;
        Ok(())
    }

    async fn get_connection_status(&self) -> Result<ConnectionStatus, Error> {
        Ok(self.connection_status.clone())
    }
}
