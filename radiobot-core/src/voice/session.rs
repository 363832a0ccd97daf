//! src/voice/session.rs
//!
//! The session controller. All mutable state lives in a single actor task;
//! the [`VoiceSession`] handle only sends it messages. Network work (connect,
//! disconnect classification) runs in helper tasks that report back tagged
//! with the generation they were started under, so a result from a superseded
//! attempt is recognised and thrown away.

use std::fmt::Display;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use radiobot_common::models::voice::{
    AudioResource, FailureKind, LinkEvent, PlayerEvent, SessionEvent, SessionState, VoiceTarget,
};
use radiobot_common::traits::voice_traits::VoiceTransport;
use crate::voice::config::SessionConfig;
use crate::voice::connection::{Connection, ConnectionManager, DisconnectVerdict, LinkSignalSink};
use crate::voice::playback::{PlaybackEngine, PlayerSignalSink};
use crate::voice::recovery::{RecoveryDecision, RecoveryScheduler};
use crate::Error;

const EVENT_CAPACITY: usize = 256;

/// Point-in-time view of the controller, mostly for diagnostics and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub attempts: u32,
    pub retry_pending: bool,
    pub restart_pending: bool,
    pub has_connection: bool,
    pub has_player: bool,
    pub resources_created: u64,
    pub current_resource: Option<AudioResource>,
}

enum SessionMessage {
    Start(oneshot::Sender<Result<(), Error>>),
    Stop(oneshot::Sender<()>),
    Destroy(oneshot::Sender<()>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    ConnectFinished {
        generation: u64,
        outcome: Result<Connection, Error>,
    },
    LinkSignal {
        generation: u64,
        event: LinkEvent,
        detail: Option<String>,
    },
    DisconnectClassified {
        generation: u64,
        verdict: DisconnectVerdict,
    },
    PlayerSignal {
        event: PlayerEvent,
        detail: Option<String>,
    },
    RetryTimerFired {
        timer: u64,
    },
    RestartTimerFired {
        timer: u64,
    },
}

/// Handle to the voice session owned by the host.
///
/// Dropping the last handle destroys the session.
pub struct VoiceSession {
    mailbox: mpsc::UnboundedSender<SessionMessage>,
    state: watch::Receiver<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl VoiceSession {
    /// Spawns the controller task. The session starts in `Idle`.
    pub fn spawn(
        transport: Arc<dyn VoiceTransport>,
        target: VoiceTarget,
        config: SessionConfig,
    ) -> Self {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let actor = SessionActor::new(
            transport,
            target,
            config,
            mailbox.downgrade(),
            inbox,
            state_tx,
            events.clone(),
        );
        tokio::spawn(actor.run());

        Self {
            mailbox,
            state,
            events,
        }
    }

    /// Begins connecting if the session is idle; otherwise a no-op.
    ///
    /// Only the very first call of a session can fail, and it resolves once
    /// that first attempt settles. Recovery after that is internal.
    pub async fn start(&self) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        if self.mailbox.send(SessionMessage::Start(reply)).is_err() {
            debug!("[VoiceSession] start() after the controller exited");
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Cancels timers, tears down the link and halts the player.
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.mailbox.send(SessionMessage::Stop(reply)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Stops and discards the player. Irreversible.
    pub async fn destroy(&self) {
        let (reply, rx) = oneshot::channel();
        if self.mailbox.send(SessionMessage::Destroy(reply)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == SessionState::Connected
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// `None` once the session has been destroyed.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.mailbox.send(SessionMessage::Snapshot(reply)).ok()?;
        rx.await.ok()
    }
}

fn post(mailbox: &mpsc::WeakUnboundedSender<SessionMessage>, message: SessionMessage) {
    if let Some(tx) = mailbox.upgrade() {
        let _ = tx.send(message);
    }
}

struct SessionActor {
    state: SessionState,
    generation: u64,
    attempt: CancellationToken,
    transport: Arc<dyn VoiceTransport>,
    connections: Arc<ConnectionManager>,
    connection: Option<Connection>,
    playback: PlaybackEngine,
    recovery: RecoveryScheduler,
    classifying: bool,
    started_once: bool,
    pending_start: Option<oneshot::Sender<Result<(), Error>>>,
    mailbox: mpsc::WeakUnboundedSender<SessionMessage>,
    inbox: mpsc::UnboundedReceiver<SessionMessage>,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionActor {
    fn new(
        transport: Arc<dyn VoiceTransport>,
        target: VoiceTarget,
        config: SessionConfig,
        mailbox: mpsc::WeakUnboundedSender<SessionMessage>,
        inbox: mpsc::UnboundedReceiver<SessionMessage>,
        state_tx: watch::Sender<SessionState>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new(
            transport.clone(),
            target,
            config.ready_timeout,
            config.renegotiation_window,
        ));
        Self {
            state: SessionState::Idle,
            generation: 0,
            attempt: CancellationToken::new(),
            transport,
            connections,
            connection: None,
            playback: PlaybackEngine::new(config.stream_url, config.volume, config.restart_delay),
            recovery: RecoveryScheduler::new(config.backoff),
            classifying: false,
            started_once: false,
            pending_start: None,
            mailbox,
            inbox,
            state_tx,
            events,
        }
    }

    async fn run(mut self) {
        let target = *self.connections.target();
        info!(
            "[VoiceSession] controller up for channel {} in guild {}",
            target.channel_id, target.guild_id
        );

        while let Some(message) = self.inbox.recv().await {
            self.handle(message).await;
            if self.state.is_terminal() {
                break;
            }
        }

        if !self.state.is_terminal() {
            info!("[VoiceSession] all handles dropped; destroying session");
            self.destroy_now().await;
        }
        debug!("[VoiceSession] controller exited");
    }

    async fn handle(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Start(reply) => self.handle_start(reply).await,
            SessionMessage::Stop(reply) => {
                if self.state.is_terminal() {
                    debug!("[VoiceSession] stop() on a destroyed session");
                } else {
                    self.stop_now().await;
                }
                let _ = reply.send(());
            }
            SessionMessage::Destroy(reply) => {
                self.destroy_now().await;
                let _ = reply.send(());
            }
            SessionMessage::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionMessage::ConnectFinished { generation, outcome } => {
                self.on_connect_finished(generation, outcome).await
            }
            SessionMessage::LinkSignal {
                generation,
                event,
                detail,
            } => self.on_link_signal(generation, event, detail).await,
            SessionMessage::DisconnectClassified { generation, verdict } => {
                self.on_disconnect_classified(generation, verdict).await
            }
            SessionMessage::PlayerSignal { event, detail } => self.on_player_signal(event, detail),
            SessionMessage::RetryTimerFired { timer } => self.on_retry_timer(timer).await,
            SessionMessage::RestartTimerFired { timer } => self.on_restart_timer(timer).await,
        }
    }

    // ------------------------------------------------------------------
    // Control surface
    // ------------------------------------------------------------------

    async fn handle_start(&mut self, reply: oneshot::Sender<Result<(), Error>>) {
        if self.state.is_terminal() {
            warn!("[VoiceSession] start() ignored: session is destroyed");
            let _ = reply.send(Ok(()));
            return;
        }
        if self.state != SessionState::Idle {
            debug!("[VoiceSession] start() ignored while {}", self.state);
            let _ = reply.send(Ok(()));
            return;
        }

        let first = !self.started_once;
        self.started_once = true;
        let reply = if first {
            Some(reply)
        } else {
            let _ = reply.send(Ok(()));
            None
        };

        self.recovery.reset();
        let sink = self.player_sink();
        if let Err(e) = self.playback.ensure_player(self.transport.as_ref(), sink) {
            error!("[VoiceSession] could not create audio player: {e}");
            if let Some(reply) = reply {
                let _ = reply.send(Err(e));
            }
            return;
        }

        self.pending_start = reply;
        self.begin_connect().await;
    }

    async fn stop_now(&mut self) {
        info!("[VoiceSession] stopping");
        let was_active = self.state != SessionState::Idle || self.connection.is_some();

        self.supersede_attempt();
        self.recovery.cancel();
        self.playback.cancel_restart();
        self.classifying = false;

        if was_active {
            self.set_state(SessionState::Disconnecting);
        }
        self.discard_connection().await;
        self.playback.halt().await;

        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Ok(()));
        }
        self.set_state(SessionState::Idle);
    }

    async fn destroy_now(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.stop_now().await;
        self.playback.dispose().await;
        self.recovery.reset();
        self.set_state(SessionState::Destroyed);
        info!("[VoiceSession] session destroyed");
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Invalidates the connect attempt in flight, if any, and returns the
    /// generation for whatever comes next.
    fn supersede_attempt(&mut self) -> u64 {
        self.attempt.cancel();
        self.attempt = CancellationToken::new();
        self.generation += 1;
        self.generation
    }

    async fn begin_connect(&mut self) {
        let generation = self.supersede_attempt();
        self.set_state(SessionState::Connecting);
        self.discard_connection().await;

        let connections = self.connections.clone();
        let sink = self.link_sink();
        let mailbox = self.mailbox.clone();
        let cancel = self.attempt.clone();
        tokio::spawn(async move {
            let outcome = connections.connect(generation, sink, cancel).await;
            deliver_connect_outcome(&mailbox, generation, outcome).await;
        });
    }

    async fn on_connect_finished(&mut self, generation: u64, outcome: Result<Connection, Error>) {
        if generation != self.generation || self.state != SessionState::Connecting {
            debug!("[VoiceSession] discarding stale connect result (gen={generation})");
            if let Ok(connection) = outcome {
                self.dispose_connection(connection).await;
            }
            return;
        }

        match outcome {
            Ok(connection) => {
                self.connection = Some(connection);
                self.recovery.reset();
                self.playback.cancel_restart();
                self.set_state(SessionState::Connected);
                if let Some(reply) = self.pending_start.take() {
                    let _ = reply.send(Ok(()));
                }
                self.begin_stream().await;
            }
            Err(e) => {
                warn!("[VoiceSession] connect attempt failed: {e}");
                self.report_failure(FailureKind::TransientNetwork, &e);
                if let Some(reply) = self.pending_start.take() {
                    let _ = reply.send(Err(e));
                }
                self.set_state(SessionState::Idle);
                self.schedule_recovery().await;
            }
        }
    }

    async fn on_link_signal(&mut self, generation: u64, event: LinkEvent, detail: Option<String>) {
        let current = self.connection.as_ref().map(Connection::generation);
        if current != Some(generation) {
            trace!("[VoiceSession] ignoring {} from stale link (gen={generation})", event.name());
            return;
        }
        if self.state != SessionState::Connected {
            trace!("[VoiceSession] ignoring {} while {}", event.name(), self.state);
            return;
        }

        match event {
            LinkEvent::Ready => debug!("[VoiceSession] link reported ready"),
            LinkEvent::Destroyed => {
                warn!("[VoiceSession] voice link destroyed unexpectedly");
                let detail = detail.unwrap_or_else(|| "voice link destroyed".to_string());
                self.report_failure(FailureKind::TransientNetwork, detail);
                self.recover_from_lost_link().await;
            }
            LinkEvent::Disconnected => {
                if self.classifying {
                    return;
                }
                let Some(connection) = self.connection.as_ref() else {
                    return;
                };
                self.classifying = true;
                warn!("[VoiceSession] voice link disconnected; checking whether it renegotiates");

                let link = connection.link().clone();
                let connections = self.connections.clone();
                let mailbox = self.mailbox.clone();
                tokio::spawn(async move {
                    let verdict = connections.classify_disconnect(link).await;
                    post(&mailbox, SessionMessage::DisconnectClassified { generation, verdict });
                });
            }
        }
    }

    async fn on_disconnect_classified(&mut self, generation: u64, verdict: DisconnectVerdict) {
        let current = self.connection.as_ref().map(Connection::generation);
        if current != Some(generation) {
            return;
        }
        self.classifying = false;
        if self.state != SessionState::Connected {
            return;
        }

        match verdict {
            DisconnectVerdict::Healing(status) => {
                info!("[VoiceSession] link is renegotiating ({status}); leaving it alone");
            }
            DisconnectVerdict::Lost => {
                warn!("[VoiceSession] link did not renegotiate in time; treating as lost");
                self.report_failure(
                    FailureKind::AmbiguousDisconnect,
                    "disconnect did not resolve within the renegotiation window",
                );
                self.recover_from_lost_link().await;
            }
        }
    }

    async fn recover_from_lost_link(&mut self) {
        self.supersede_attempt();
        self.playback.cancel_restart();
        self.playback.halt().await;
        self.discard_connection().await;
        self.set_state(SessionState::Idle);
        self.schedule_recovery().await;
    }

    async fn schedule_recovery(&mut self) {
        let mailbox = self.mailbox.clone();
        let decision = self
            .recovery
            .on_failure(move |timer| post(&mailbox, SessionMessage::RetryTimerFired { timer }));

        match decision {
            RecoveryDecision::Retry { attempt, delay } => {
                self.set_state(SessionState::Reconnecting);
                self.emit(SessionEvent::RetryScheduled { attempt, delay });
            }
            RecoveryDecision::AlreadyScheduled => {}
            RecoveryDecision::Exhausted { attempts } => {
                let err = Error::RetriesExhausted(attempts);
                error!("[VoiceSession] {err}; destroying session");
                self.report_failure(FailureKind::ExhaustedRetries, &err);
                self.destroy_now().await;
            }
        }
    }

    async fn on_retry_timer(&mut self, timer: u64) {
        if !self.recovery.settle(timer) {
            debug!("[VoiceSession] ignoring cancelled retry timer");
            return;
        }
        if self.state != SessionState::Reconnecting {
            debug!("[VoiceSession] retry timer fired while {}", self.state);
            return;
        }
        info!(
            "[VoiceSession] reconnect attempt {} starting",
            self.recovery.attempts() + 1
        );
        self.begin_connect().await;
    }

    async fn discard_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.classifying = false;
            self.dispose_connection(connection).await;
        }
    }

    async fn dispose_connection(&mut self, connection: Connection) {
        let generation = connection.generation();
        if let Err(e) = connection.teardown().await {
            warn!("[VoiceSession] ignoring error while disposing link gen={generation}: {e}");
            self.report_failure(FailureKind::Teardown, &e);
        }
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    async fn begin_stream(&mut self) {
        let Some(connection) = self.connection.as_ref() else {
            return;
        };
        match self.playback.attach_and_start(connection).await {
            Ok(resource) => self.emit(SessionEvent::StreamStarted { resource }),
            Err(e) => self.on_playback_failure(e.to_string()),
        }
    }

    fn on_player_signal(&mut self, event: PlayerEvent, detail: Option<String>) {
        if self.state != SessionState::Connected {
            trace!("[VoiceSession] ignoring player {} while {}", event.name(), self.state);
            return;
        }
        let detail = detail.unwrap_or_else(|| match event {
            PlayerEvent::Idle => "player went idle".to_string(),
            PlayerEvent::Error => "player error".to_string(),
        });
        self.on_playback_failure(detail);
    }

    fn on_playback_failure(&mut self, detail: String) {
        warn!("[Playback] {detail}");
        self.report_failure(FailureKind::Playback, &detail);

        let mailbox = self.mailbox.clone();
        let scheduled = self
            .playback
            .request_restart(move |timer| post(&mailbox, SessionMessage::RestartTimerFired { timer }));
        if scheduled {
            self.emit(SessionEvent::StreamRestartScheduled {
                delay: self.playback.restart_delay(),
            });
        }
    }

    async fn on_restart_timer(&mut self, timer: u64) {
        if !self.playback.settle_restart(timer) {
            return;
        }
        if self.state != SessionState::Connected {
            return;
        }
        let Some(connection) = self.connection.as_ref() else {
            return;
        };
        match self.playback.restart(connection).await {
            Ok(resource) => self.emit(SessionEvent::StreamStarted { resource }),
            Err(e) => self.on_playback_failure(e.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        if self.state.is_terminal() {
            warn!("[VoiceSession] refusing transition out of {} to {next}", self.state);
            return;
        }
        let from = self.state;
        self.state = next;
        self.state_tx.send_replace(next);
        info!("[VoiceSession] {from} -> {next}");
        self.emit(SessionEvent::StateChanged { from, to: next });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn report_failure(&self, kind: FailureKind, detail: impl Display) {
        self.emit(SessionEvent::Failure {
            kind,
            detail: detail.to_string(),
        });
    }

    fn link_sink(&self) -> LinkSignalSink {
        let mailbox = self.mailbox.clone();
        Arc::new(move |generation, event, detail| {
            post(
                &mailbox,
                SessionMessage::LinkSignal {
                    generation,
                    event,
                    detail: detail.map(str::to_owned),
                },
            )
        })
    }

    fn player_sink(&self) -> PlayerSignalSink {
        let mailbox = self.mailbox.clone();
        Arc::new(move |event, detail| {
            post(
                &mailbox,
                SessionMessage::PlayerSignal {
                    event,
                    detail: detail.map(str::to_owned),
                },
            )
        })
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            attempts: self.recovery.attempts(),
            retry_pending: self.recovery.is_pending(),
            restart_pending: self.playback.restart_pending(),
            has_connection: self.connection.is_some(),
            has_player: self.playback.has_player(),
            resources_created: self.playback.resources_created(),
            current_resource: self.playback.current().cloned(),
        }
    }
}

/// Hands a connect result to the controller. If the controller is gone the
/// link would otherwise leak, so it is torn down here.
async fn deliver_connect_outcome(
    mailbox: &mpsc::WeakUnboundedSender<SessionMessage>,
    generation: u64,
    outcome: Result<Connection, Error>,
) {
    let message = SessionMessage::ConnectFinished { generation, outcome };
    let undelivered = match mailbox.upgrade() {
        Some(tx) => tx.send(message).err().map(|e| e.0),
        None => Some(message),
    };

    if let Some(SessionMessage::ConnectFinished {
        outcome: Ok(connection),
        ..
    }) = undelivered
    {
        debug!("[VoiceSession] controller gone; tearing down orphaned link gen={generation}");
        if let Err(e) = connection.teardown().await {
            warn!("[VoiceSession] orphaned link teardown failed: {e}");
        }
    }
}
