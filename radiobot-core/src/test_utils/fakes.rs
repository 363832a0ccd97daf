// File: radiobot-core/src/test_utils/fakes.rs
//
// In-memory voice backend with scripted connect outcomes. Lets the session
// controller be driven deterministically under a paused tokio clock.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use radiobot_common::models::voice::{
    AudioResource, LinkEvent, LinkStatus, PlayerEvent, VoiceAdapter, VoiceTarget,
};
use radiobot_common::traits::voice_traits::{
    AudioPlayer, EventSource, ListenerId, SignalHandler, VoiceLink, VoiceTransport,
};
use crate::voice::signals::{LinkSignals, SignalHub};
use crate::Error;

/// What the next connect attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectScript {
    /// The link is ready as soon as it is joined.
    Ready,
    /// Directory lookup fails.
    AdapterFailure,
    /// Link construction fails.
    JoinFailure,
    /// The link is created but never becomes ready.
    NeverReady,
}

pub struct FakeVoiceTransport {
    script: Mutex<VecDeque<ConnectScript>>,
    fallback: Mutex<ConnectScript>,
    in_flight: Mutex<Option<ConnectScript>>,
    resolve_delay: Mutex<Option<Duration>>,
    resolve_calls: Mutex<Vec<Instant>>,
    join_calls: AtomicUsize,
    links: Mutex<Vec<Arc<FakeVoiceLink>>>,
    players: Mutex<Vec<Arc<FakeAudioPlayer>>>,
}

impl FakeVoiceTransport {
    /// Every attempt not covered by a queued script uses `fallback`.
    pub fn new(fallback: ConnectScript) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            in_flight: Mutex::new(None),
            resolve_delay: Mutex::new(None),
            resolve_calls: Mutex::new(Vec::new()),
            join_calls: AtomicUsize::new(0),
            links: Mutex::new(Vec::new()),
            players: Mutex::new(Vec::new()),
        })
    }

    pub fn scripted<I>(steps: I, fallback: ConnectScript) -> Arc<Self>
    where
        I: IntoIterator<Item = ConnectScript>,
    {
        let transport = Self::new(fallback);
        transport.script.lock().extend(steps);
        transport
    }

    pub fn set_fallback(&self, fallback: ConnectScript) {
        *self.fallback.lock() = fallback;
    }

    /// Every adapter lookup from now on takes `delay` of virtual time.
    pub fn set_resolve_delay(&self, delay: Duration) {
        *self.resolve_delay.lock() = Some(delay);
    }

    /// Calls to `join`, successful or not.
    pub fn join_count(&self) -> usize {
        self.join_calls.load(Ordering::SeqCst)
    }

    pub fn resolve_count(&self) -> usize {
        self.resolve_calls.lock().len()
    }

    /// Clock readings at each adapter lookup, i.e. at each connect attempt.
    pub fn resolve_instants(&self) -> Vec<Instant> {
        self.resolve_calls.lock().clone()
    }

    pub fn links(&self) -> Vec<Arc<FakeVoiceLink>> {
        self.links.lock().clone()
    }

    pub fn last_link(&self) -> Option<Arc<FakeVoiceLink>> {
        self.links.lock().last().cloned()
    }

    pub fn players(&self) -> Vec<Arc<FakeAudioPlayer>> {
        self.players.lock().clone()
    }

    pub fn player(&self) -> Option<Arc<FakeAudioPlayer>> {
        self.players.lock().last().cloned()
    }
}

#[async_trait]
impl VoiceTransport for FakeVoiceTransport {
    async fn resolve_adapter(&self, target: &VoiceTarget) -> Result<VoiceAdapter, Error> {
        self.resolve_calls.lock().push(Instant::now());
        let delay = *self.resolve_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| *self.fallback.lock());

        if step == ConnectScript::AdapterFailure {
            return Err(Error::Voice("guild adapter unavailable".into()));
        }
        *self.in_flight.lock() = Some(step);
        Ok(VoiceAdapter {
            guild_id: target.guild_id,
            channel_id: target.channel_id,
            channel_name: Some("radio".into()),
        })
    }

    fn join(&self, _adapter: &VoiceAdapter, _target: &VoiceTarget) -> Result<Arc<dyn VoiceLink>, Error> {
        self.join_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.in_flight.lock().take().unwrap_or(ConnectScript::Ready);
        let initial = match step {
            ConnectScript::JoinFailure => {
                return Err(Error::Voice("voice gateway refused the join".into()));
            }
            ConnectScript::NeverReady => LinkStatus::Signalling,
            ConnectScript::Ready | ConnectScript::AdapterFailure => LinkStatus::Ready,
        };

        let link = Arc::new(FakeVoiceLink::new(initial));
        self.links.lock().push(link.clone());
        Ok(link)
    }

    fn create_player(&self) -> Result<Arc<dyn AudioPlayer>, Error> {
        let player = Arc::new(FakeAudioPlayer::new());
        self.players.lock().push(player.clone());
        Ok(player)
    }
}

pub struct FakeVoiceLink {
    signals: LinkSignals,
    destroyed: AtomicBool,
    subscriptions: AtomicUsize,
}

impl FakeVoiceLink {
    pub fn new(initial: LinkStatus) -> Self {
        Self {
            signals: LinkSignals::new(initial),
            destroyed: AtomicBool::new(false),
            subscriptions: AtomicUsize::new(0),
        }
    }

    /// Drives the link as the real transport would.
    pub fn set_status(&self, status: LinkStatus) {
        self.signals.set_status(status);
    }

    pub fn listener_count(&self, event: LinkEvent) -> usize {
        self.signals.hub().listener_count(event)
    }

    pub fn total_listeners(&self) -> usize {
        self.signals.hub().total_listeners()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

impl EventSource<LinkEvent> for FakeVoiceLink {
    fn on(&self, event: LinkEvent, handler: SignalHandler) -> ListenerId {
        self.signals.hub().on(event, handler)
    }

    fn off(&self, id: ListenerId) -> bool {
        self.signals.hub().off(id)
    }
}

#[async_trait]
impl VoiceLink for FakeVoiceLink {
    fn status(&self) -> LinkStatus {
        self.signals.status()
    }

    async fn wait_for(&self, status: LinkStatus, timeout: Duration) -> Result<(), Error> {
        self.signals.wait_for(status, timeout).await
    }

    async fn subscribe(&self, player: &Arc<dyn AudioPlayer>) -> Result<(), Error> {
        if player.as_any().downcast_ref::<FakeAudioPlayer>().is_none() {
            return Err(Error::Voice("foreign player implementation".into()));
        }
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> Result<(), Error> {
        self.destroyed.store(true, Ordering::SeqCst);
        self.signals.set_status(LinkStatus::Destroyed);
        Ok(())
    }
}

pub struct FakeAudioPlayer {
    hub: SignalHub<PlayerEvent>,
    played: Mutex<Vec<AudioResource>>,
    stops: AtomicUsize,
    failing_plays: AtomicUsize,
}

impl FakeAudioPlayer {
    pub fn new() -> Self {
        Self {
            hub: SignalHub::new(),
            played: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            failing_plays: AtomicUsize::new(0),
        }
    }

    /// Fires a player signal at whoever is listening.
    pub fn emit(&self, event: PlayerEvent, detail: Option<&str>) -> usize {
        self.hub.emit(event, detail)
    }

    pub fn played(&self) -> Vec<AudioResource> {
        self.played.lock().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self, event: PlayerEvent) -> usize {
        self.hub.listener_count(event)
    }

    /// The next `count` calls to `play` fail.
    pub fn fail_next_plays(&self, count: usize) {
        self.failing_plays.store(count, Ordering::SeqCst);
    }
}

impl Default for FakeAudioPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource<PlayerEvent> for FakeAudioPlayer {
    fn on(&self, event: PlayerEvent, handler: SignalHandler) -> ListenerId {
        self.hub.on(event, handler)
    }

    fn off(&self, id: ListenerId) -> bool {
        self.hub.off(id)
    }
}

#[async_trait]
impl AudioPlayer for FakeAudioPlayer {
    async fn play(&self, resource: &AudioResource) -> Result<(), Error> {
        let failing = self.failing_plays.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_plays.store(failing - 1, Ordering::SeqCst);
            return Err(Error::Playback("stream source unreachable".into()));
        }
        self.played.lock().push(resource.clone());
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
