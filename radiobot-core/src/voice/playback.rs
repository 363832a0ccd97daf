// File: src/voice/playback.rs

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use radiobot_common::models::voice::{AudioResource, PlayerEvent};
use radiobot_common::traits::voice_traits::{AudioPlayer, SignalHandler, VoiceTransport};
use crate::voice::connection::Connection;
use crate::voice::listeners::ListenerRegistry;
use crate::voice::timer::TimerSlot;
use crate::Error;

/// Callback every player signal is routed into.
pub type PlayerSignalSink = Arc<dyn Fn(PlayerEvent, Option<&str>) + Send + Sync>;

/// Wraps the long-lived output pipeline and the ephemeral resources played
/// through it.
pub struct PlaybackEngine {
    stream_url: String,
    volume: f32,
    restart_delay: Duration,
    player: Option<Arc<dyn AudioPlayer>>,
    listeners: ListenerRegistry<PlayerEvent>,
    current: Option<AudioResource>,
    next_resource_id: u64,
    restart_timer: TimerSlot,
}

impl PlaybackEngine {
    pub fn new(stream_url: impl Into<String>, volume: f32, restart_delay: Duration) -> Self {
        Self {
            stream_url: stream_url.into(),
            volume,
            restart_delay,
            player: None,
            listeners: ListenerRegistry::new("audio player"),
            current: None,
            next_resource_id: 0,
            restart_timer: TimerSlot::new(),
        }
    }

    pub fn has_player(&self) -> bool {
        self.player.is_some()
    }

    pub fn current(&self) -> Option<&AudioResource> {
        self.current.as_ref()
    }

    /// Number of resources created so far (each start/restart makes one).
    pub fn resources_created(&self) -> u64 {
        self.next_resource_id
    }

    pub fn restart_pending(&self) -> bool {
        self.restart_timer.is_armed()
    }

    /// Creates the player once and binds its idle/error signals.
    pub fn ensure_player(
        &mut self,
        transport: &dyn VoiceTransport,
        sink: PlayerSignalSink,
    ) -> Result<(), Error> {
        if self.player.is_some() {
            return Ok(());
        }

        let player = transport.create_player()?;
        let handlers: Vec<(PlayerEvent, SignalHandler)> = PlayerEvent::ALL
            .iter()
            .map(|event| {
                let event = *event;
                let sink = sink.clone();
                let handler: SignalHandler = Arc::new(move |detail| sink(event, detail));
                (event, handler)
            })
            .collect();
        self.listeners.install(player.as_ref(), handlers);
        self.player = Some(player);
        debug!("[Playback] player created");
        Ok(())
    }

    /// Routes the player into `connection` and starts a fresh resource.
    pub async fn attach_and_start(&mut self, connection: &Connection) -> Result<AudioResource, Error> {
        let player = self.require_player()?;
        connection.link().subscribe(&player).await?;
        self.start_stream(connection).await
    }

    /// Plays a brand-new resource bound to the stream URL.
    pub async fn start_stream(&mut self, connection: &Connection) -> Result<AudioResource, Error> {
        let player = self.require_player()?;
        if !connection.is_ready() {
            return Err(Error::Playback("voice link is not ready".into()));
        }

        self.next_resource_id += 1;
        let resource = AudioResource {
            id: self.next_resource_id,
            url: self.stream_url.clone(),
            volume: self.volume,
        };
        info!("[Playback] starting stream (resource #{})", resource.id);

        player.play(&resource).await?;
        self.current = Some(resource.clone());
        Ok(resource)
    }

    /// Arms the debounced restart. Returns false if one is already pending.
    pub fn request_restart<F>(&mut self, fire: F) -> bool
    where
        F: FnOnce(u64) + Send + 'static,
    {
        if self.restart_timer.is_armed() {
            debug!("[Playback] restart already pending");
            return false;
        }
        self.restart_timer.arm(self.restart_delay, fire);
        info!("[Playback] restarting stream in {:?}", self.restart_delay);
        true
    }

    pub fn settle_restart(&mut self, timer_id: u64) -> bool {
        self.restart_timer.settle(timer_id)
    }

    pub fn cancel_restart(&mut self) -> bool {
        self.restart_timer.cancel()
    }

    pub fn restart_delay(&self) -> Duration {
        self.restart_delay
    }

    /// Stops the current resource and plays a new one.
    pub async fn restart(&mut self, connection: &Connection) -> Result<AudioResource, Error> {
        self.halt().await;
        self.start_stream(connection).await
    }

    /// Stops whatever is playing. The player itself survives.
    pub async fn halt(&mut self) {
        let Some(player) = self.player.as_ref() else {
            return;
        };
        if let Some(resource) = self.current.take() {
            debug!("[Playback] stopping resource #{}", resource.id);
        }
        if let Err(e) = player.stop().await {
            warn!("[Playback] ignoring error while stopping player: {e}");
        }
    }

    /// Unbinds the player's signals and drops it. Irreversible for this engine.
    pub async fn dispose(&mut self) {
        self.cancel_restart();
        self.halt().await;
        if let Some(player) = self.player.take() {
            self.listeners.teardown(player.as_ref());
            debug!("[Playback] player disposed");
        }
    }

    fn require_player(&self) -> Result<Arc<dyn AudioPlayer>, Error> {
        self.player
            .clone()
            .ok_or_else(|| Error::Playback("no audio player".into()))
    }
}
