//! songbird.rs
//!
//! Voice backend on top of songbird. `SongbirdTransport` resolves the target
//! channel over the Discord REST API, `SongbirdLink` owns one join of that
//! channel, and `SongbirdPlayer` pushes the radio stream through whichever
//! call it is subscribed to.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use songbird::error::JoinError;
use songbird::events::{
    CoreEvent, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler, TrackEvent,
};
use songbird::input::HttpRequest;
use songbird::tracks::TrackHandle;
use songbird::{Call, Songbird};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use twilight_http::Client as HttpClient;
use twilight_model::channel::ChannelType;
use twilight_model::id::marker::GuildMarker;
use twilight_model::id::Id;

use radiobot_common::models::voice::{
    AudioResource, LinkEvent, LinkStatus, PlayerEvent, VoiceAdapter, VoiceTarget,
};
use radiobot_common::traits::voice_traits::{
    AudioPlayer, EventSource, ListenerId, SignalHandler, VoiceLink, VoiceTransport,
};
use crate::platforms::discord::runtime::DiscordPlatform;
use crate::voice::signals::{LinkSignals, SignalHub};
use crate::Error;

type SharedCall = Arc<AsyncMutex<Call>>;

pub struct SongbirdTransport {
    http: Arc<HttpClient>,
    songbird: Arc<Songbird>,
    stream_client: reqwest::Client,
    latest_link: Arc<AtomicU64>,
}

impl SongbirdTransport {
    pub fn new(http: Arc<HttpClient>, songbird: Arc<Songbird>) -> Result<Self, Error> {
        // No overall timeout: the stream body never ends.
        let stream_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            songbird,
            stream_client,
            latest_link: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn from_platform(platform: &DiscordPlatform) -> Result<Self, Error> {
        Self::new(platform.http()?, platform.songbird()?)
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn resolve_adapter(&self, target: &VoiceTarget) -> Result<VoiceAdapter, Error> {
        let channel = self
            .http
            .channel(target.channel_id)
            .await
            .map_err(|e| Error::Platform(format!("Error fetching channel {}: {e}", target.channel_id)))?
            .model()
            .await
            .map_err(|e| Error::Platform(format!("Error parsing channel {}: {e}", target.channel_id)))?;

        if channel.guild_id != Some(target.guild_id) {
            return Err(Error::Voice(format!(
                "channel {} does not belong to guild {}",
                target.channel_id, target.guild_id
            )));
        }
        match channel.kind {
            ChannelType::GuildVoice | ChannelType::GuildStageVoice => {}
            other => {
                return Err(Error::Voice(format!(
                    "channel {} is not a voice channel ({other:?})",
                    target.channel_id
                )));
            }
        }

        Ok(VoiceAdapter {
            guild_id: target.guild_id,
            channel_id: target.channel_id,
            channel_name: channel.name,
        })
    }

    fn join(&self, adapter: &VoiceAdapter, target: &VoiceTarget) -> Result<Arc<dyn VoiceLink>, Error> {
        let serial = self.latest_link.fetch_add(1, Ordering::SeqCst) + 1;
        let link = SongbirdLink::spawn(
            serial,
            self.songbird.clone(),
            self.latest_link.clone(),
            adapter,
            target.self_deaf,
        );
        Ok(Arc::new(link))
    }

    fn create_player(&self) -> Result<Arc<dyn AudioPlayer>, Error> {
        Ok(Arc::new(SongbirdPlayer::new(self.stream_client.clone())))
    }
}

struct LinkShared {
    signals: LinkSignals,
    retired: AtomicBool,
}

/// One join of the voice channel. The handshake runs in the background; the
/// link reports `Ready` once songbird has a live call.
pub struct SongbirdLink {
    serial: u64,
    guild_id: Id<GuildMarker>,
    songbird: Arc<Songbird>,
    latest_link: Arc<AtomicU64>,
    shared: Arc<LinkShared>,
    call: Arc<Mutex<Option<SharedCall>>>,
    handshake: Mutex<Option<JoinHandle<()>>>,
}

impl SongbirdLink {
    fn spawn(
        serial: u64,
        songbird: Arc<Songbird>,
        latest_link: Arc<AtomicU64>,
        adapter: &VoiceAdapter,
        self_deaf: bool,
    ) -> Self {
        let shared = Arc::new(LinkShared {
            signals: LinkSignals::new(LinkStatus::Signalling),
            retired: AtomicBool::new(false),
        });
        let call_slot: Arc<Mutex<Option<SharedCall>>> = Arc::new(Mutex::new(None));

        let guild_id = adapter.guild_id;
        let channel_id = adapter.channel_id;
        let task = {
            let songbird = songbird.clone();
            let shared = shared.clone();
            let call_slot = call_slot.clone();
            tokio::spawn(async move {
                shared.signals.set_status(LinkStatus::Connecting);
                let call = match songbird.join(guild_id, channel_id).await {
                    Ok(call) => call,
                    Err(e) => {
                        warn!("(SongbirdLink #{serial}) join failed: {e}");
                        let detail = e.to_string();
                        shared
                            .signals
                            .set_status_with_detail(LinkStatus::Disconnected, Some(&detail));
                        return;
                    }
                };

                {
                    let mut handler = call.lock().await;
                    if self_deaf {
                        if let Err(e) = handler.deafen(true).await {
                            warn!("(SongbirdLink #{serial}) could not self-deafen: {e}");
                        }
                    }
                    for event in [
                        CoreEvent::DriverConnect,
                        CoreEvent::DriverReconnect,
                        CoreEvent::DriverDisconnect,
                    ] {
                        handler.add_global_event(
                            VoiceEvent::Core(event),
                            DriverForwarder {
                                serial,
                                link: Arc::downgrade(&shared),
                            },
                        );
                    }
                }

                *call_slot.lock() = Some(call);
                if !shared.retired.load(Ordering::SeqCst) {
                    info!("(SongbirdLink #{serial}) joined channel {channel_id}");
                    shared.signals.set_status(LinkStatus::Ready);
                }
            })
        };

        Self {
            serial,
            guild_id,
            songbird,
            latest_link,
            shared,
            call: call_slot,
            handshake: Mutex::new(Some(task)),
        }
    }

    fn current_call(&self) -> Option<SharedCall> {
        self.call.lock().clone()
    }
}

impl EventSource<LinkEvent> for SongbirdLink {
    fn on(&self, event: LinkEvent, handler: SignalHandler) -> ListenerId {
        self.shared.signals.hub().on(event, handler)
    }

    fn off(&self, id: ListenerId) -> bool {
        self.shared.signals.hub().off(id)
    }
}

#[async_trait]
impl VoiceLink for SongbirdLink {
    fn status(&self) -> LinkStatus {
        self.shared.signals.status()
    }

    async fn wait_for(&self, status: LinkStatus, timeout: Duration) -> Result<(), Error> {
        self.shared.signals.wait_for(status, timeout).await
    }

    async fn subscribe(&self, player: &Arc<dyn AudioPlayer>) -> Result<(), Error> {
        let Some(player) = player.as_any().downcast_ref::<SongbirdPlayer>() else {
            return Err(Error::Voice("player was not created by the songbird transport".into()));
        };
        let call = self
            .current_call()
            .ok_or_else(|| Error::Voice("voice link has no active call".into()))?;
        player.attach(call);
        debug!("(SongbirdLink #{}) player subscribed", self.serial);
        Ok(())
    }

    async fn destroy(&self) -> Result<(), Error> {
        self.shared.retired.store(true, Ordering::SeqCst);
        if let Some(task) = self.handshake.lock().take() {
            task.abort();
        }
        let call = self.call.lock().take();

        // A newer link may already own the guild's call; only the newest one
        // is allowed to leave the channel.
        let mut outcome = Ok(());
        if self.latest_link.load(Ordering::SeqCst) == self.serial {
            if let Some(call) = call {
                call.lock().await.remove_all_global_events();
            }
            match self.songbird.remove(self.guild_id).await {
                Ok(()) | Err(JoinError::NoCall) => {}
                Err(e) => outcome = Err(Error::Voice(format!("failed to leave voice channel: {e}"))),
            }
        } else {
            trace!("(SongbirdLink #{}) superseded; leaving the call alone", self.serial);
        }

        self.shared.signals.set_status(LinkStatus::Destroyed);
        outcome
    }
}

/// Mirrors songbird driver events onto the link status.
struct DriverForwarder {
    serial: u64,
    link: Weak<LinkShared>,
}

#[async_trait]
impl VoiceEventHandler for DriverForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        let Some(link) = self.link.upgrade() else {
            return Some(VoiceEvent::Cancel);
        };
        if link.retired.load(Ordering::SeqCst) {
            return Some(VoiceEvent::Cancel);
        }

        match ctx {
            EventContext::DriverConnect(_) | EventContext::DriverReconnect(_) => {
                debug!("(SongbirdLink #{}) driver connected", self.serial);
                link.signals.set_status(LinkStatus::Ready);
            }
            EventContext::DriverDisconnect(data) => {
                let detail = format!("driver disconnected: {:?}", data.reason);
                warn!("(SongbirdLink #{}) {detail}", self.serial);
                link.signals
                    .set_status_with_detail(LinkStatus::Disconnected, Some(&detail));
            }
            _ => {}
        }
        None
    }
}

/// Plays HTTP audio resources on the subscribed call.
pub struct SongbirdPlayer {
    client: reqwest::Client,
    hub: Arc<SignalHub<PlayerEvent>>,
    call: Mutex<Option<SharedCall>>,
    current_id: Arc<AtomicU64>,
    track: Mutex<Option<TrackHandle>>,
}

impl SongbirdPlayer {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            hub: Arc::new(SignalHub::new()),
            call: Mutex::new(None),
            current_id: Arc::new(AtomicU64::new(0)),
            track: Mutex::new(None),
        }
    }

    fn attach(&self, call: SharedCall) {
        *self.call.lock() = Some(call);
    }
}

impl EventSource<PlayerEvent> for SongbirdPlayer {
    fn on(&self, event: PlayerEvent, handler: SignalHandler) -> ListenerId {
        self.hub.on(event, handler)
    }

    fn off(&self, id: ListenerId) -> bool {
        self.hub.off(id)
    }
}

#[async_trait]
impl AudioPlayer for SongbirdPlayer {
    async fn play(&self, resource: &AudioResource) -> Result<(), Error> {
        let call = self
            .call
            .lock()
            .clone()
            .ok_or_else(|| Error::Playback("player is not subscribed to a voice link".into()))?;

        let input = HttpRequest::new(self.client.clone(), resource.url.clone());
        let handle = call.lock().await.play_only_input(input.into());
        handle
            .set_volume(resource.volume)
            .map_err(|e| Error::Playback(format!("set_volume failed: {e}")))?;

        self.current_id.store(resource.id, Ordering::SeqCst);
        for (event, signal) in [
            (TrackEvent::End, PlayerEvent::Idle),
            (TrackEvent::Error, PlayerEvent::Error),
        ] {
            handle
                .add_event(
                    VoiceEvent::Track(event),
                    TrackForwarder {
                        resource_id: resource.id,
                        current_id: self.current_id.clone(),
                        hub: Arc::downgrade(&self.hub),
                        signal,
                    },
                )
                .map_err(|e| Error::Playback(format!("track ended before it started: {e}")))?;
        }

        *self.track.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        // Clear the current id first so the stop itself is not reported as idle.
        self.current_id.store(0, Ordering::SeqCst);
        let track = self.track.lock().take();
        if let Some(track) = track {
            if let Err(e) = track.stop() {
                trace!("(SongbirdPlayer) track already gone: {e}");
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Forwards track end / error for one resource only.
struct TrackForwarder {
    resource_id: u64,
    current_id: Arc<AtomicU64>,
    hub: Weak<SignalHub<PlayerEvent>>,
    signal: PlayerEvent,
}

#[async_trait]
impl VoiceEventHandler for TrackForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if self.current_id.load(Ordering::SeqCst) != self.resource_id {
            return Some(VoiceEvent::Cancel);
        }
        let hub = self.hub.upgrade()?;

        let detail = match ctx {
            EventContext::Track(tracks) => tracks
                .first()
                .map(|(state, _)| format!("track {}: {:?}", self.signal.name(), state.playing)),
            _ => None,
        };
        hub.emit(self.signal, detail.as_deref());
        None
    }
}
