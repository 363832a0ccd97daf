// tests/voice_session_tests.rs
//
// Drives the session controller against the scripted in-memory backend with a
// paused clock, so backoff and debounce delays can be asserted exactly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tokio_test::{assert_err, assert_ok};
use twilight_model::id::Id;

use radiobot_common::models::voice::{
    FailureKind, LinkEvent, LinkStatus, PlayerEvent, SessionEvent, SessionState, VoiceTarget,
};
use radiobot_core::test_utils::{ConnectScript, FakeVoiceTransport};
use radiobot_core::voice::BackoffPolicy;
use radiobot_core::{Error, SessionConfig, VoiceSession};

const STREAM_URL: &str = "https://radio.example.net/live_hd";
const BASE: Duration = Duration::from_secs(1);

fn target() -> VoiceTarget {
    VoiceTarget::new(Id::new(411_111_111_111), Id::new(822_222_222_222))
}

fn config(max_attempts: u32) -> SessionConfig {
    SessionConfig::new(STREAM_URL).with_backoff(BackoffPolicy {
        base_delay: BASE,
        max_delay: Duration::from_secs(30),
        max_attempts,
    })
}

fn spawn(transport: &Arc<FakeVoiceTransport>, max_attempts: u32) -> VoiceSession {
    VoiceSession::spawn(transport.clone(), target(), config(max_attempts))
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn transitions(events: &[SessionEvent]) -> Vec<(SessionState, SessionState)> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::StateChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

fn failures(events: &[SessionEvent], wanted: FailureKind) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, SessionEvent::Failure { kind, .. } if *kind == wanted))
        .count()
}

/// Waits (in virtual time) for an event matching `pred`, returning every
/// event seen up to and including it.
async fn wait_for_event<F>(events: &mut broadcast::Receiver<SessionEvent>, pred: F) -> Vec<SessionEvent>
where
    F: Fn(&SessionEvent) -> bool,
{
    let mut seen = Vec::new();
    timeout(Duration::from_secs(600), async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            let done = pred(&event);
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("expected session event never arrived");
    seen
}

fn entered(state: SessionState) -> impl Fn(&SessionEvent) -> bool {
    move |event| matches!(event, SessionEvent::StateChanged { to, .. } if *to == state)
}

#[tokio::test(start_paused = true)]
async fn test_first_attempt_connects_and_streams() {
    let transport = FakeVoiceTransport::new(ConnectScript::Ready);
    let session = spawn(&transport, 5);
    let mut events = session.subscribe();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.is_connected());

    assert_ok!(session.start().await);
    let snapshot = session.snapshot().await.expect("session alive");

    assert!(session.is_connected());
    assert_eq!(snapshot.state, SessionState::Connected);
    assert_eq!(snapshot.attempts, 0);
    assert_eq!(snapshot.resources_created, 1);

    let seen = drain(&mut events);
    assert_eq!(
        transitions(&seen),
        vec![
            (SessionState::Idle, SessionState::Connecting),
            (SessionState::Connecting, SessionState::Connected),
        ]
    );

    let player = transport.player().expect("player created");
    let played = player.played();
    assert_eq!(played.len(), 1);
    assert_eq!(played[0].url, STREAM_URL);
    assert!((played[0].volume - 0.8).abs() < f32::EPSILON);

    let link = transport.last_link().expect("link created");
    assert_eq!(link.subscription_count(), 1);
    assert_eq!(transport.resolve_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_then_resets_on_success() {
    let transport = FakeVoiceTransport::scripted(
        [ConnectScript::AdapterFailure, ConnectScript::AdapterFailure],
        ConnectScript::Ready,
    );
    let session = spawn(&transport, 5);
    let mut events = session.subscribe();

    let first = session.start().await;
    assert!(first.is_err(), "first failure propagates to the caller");

    let seen = wait_for_event(&mut events, entered(SessionState::Connected)).await;

    let retries: Vec<(u32, Duration)> = seen
        .iter()
        .filter_map(|event| match event {
            SessionEvent::RetryScheduled { attempt, delay } => Some((*attempt, *delay)),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![(1, BASE), (2, BASE * 2)]);

    let instants = transport.resolve_instants();
    assert_eq!(instants.len(), 3);
    let gap1 = instants[1] - instants[0];
    let gap2 = instants[2] - instants[1];
    assert!(gap1 >= BASE && gap1 < BASE + Duration::from_millis(10), "gap1={gap1:?}");
    assert!(gap2 >= BASE * 2 && gap2 < BASE * 2 + Duration::from_millis(10), "gap2={gap2:?}");

    let snapshot = session.snapshot().await.expect("session alive");
    assert_eq!(snapshot.state, SessionState::Connected);
    assert_eq!(snapshot.attempts, 0);
    assert!(!snapshot.retry_pending);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_destroy_session_once() {
    let transport = FakeVoiceTransport::new(ConnectScript::AdapterFailure);
    let session = spawn(&transport, 3);
    let mut events = session.subscribe();

    assert_err!(session.start().await);
    let mut seen = wait_for_event(&mut events, entered(SessionState::Destroyed)).await;

    assert_eq!(transport.resolve_count(), 3);
    assert_eq!(session.state(), SessionState::Destroyed);

    // Nothing left ticking.
    sleep(Duration::from_secs(3600)).await;
    seen.extend(drain(&mut events));
    assert_eq!(transport.resolve_count(), 3);
    assert_eq!(failures(&seen, FailureKind::ExhaustedRetries), 1);
    assert_eq!(failures(&seen, FailureKind::TransientNetwork), 3);
    assert!(session.snapshot().await.is_none());

    // Terminal: a later start() is a no-op.
    assert_ok!(session.start().await);
    sleep(Duration::from_secs(60)).await;
    assert_eq!(session.state(), SessionState::Destroyed);
    assert_eq!(transport.resolve_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_reconnecting_cancels_retry() {
    let transport = FakeVoiceTransport::new(ConnectScript::AdapterFailure);
    let session = spawn(&transport, 10);

    assert!(session.start().await.is_err());
    assert_eq!(session.state(), SessionState::Reconnecting);

    session.stop().await;
    assert_eq!(session.state(), SessionState::Idle);
    let snapshot = session.snapshot().await.expect("session alive");
    assert!(!snapshot.retry_pending);

    sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.resolve_count(), 1, "no attempt without a fresh start()");

    transport.set_fallback(ConnectScript::Ready);
    let mut events = session.subscribe();
    session.start().await.expect("later starts never fail");
    wait_for_event(&mut events, entered(SessionState::Connected)).await;

    assert_eq!(transport.resolve_count(), 2);
    let snapshot = session.snapshot().await.expect("session alive");
    assert_eq!(snapshot.attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_idle_signals_are_debounced_into_one_restart() {
    let transport = FakeVoiceTransport::new(ConnectScript::Ready);
    let session = spawn(&transport, 5);
    session.start().await.expect("connect");
    let mut events = session.subscribe();
    let player = transport.player().expect("player");

    assert_eq!(player.emit(PlayerEvent::Idle, None), 1);
    assert_eq!(player.emit(PlayerEvent::Idle, None), 1);
    let snapshot = session.snapshot().await.expect("session alive");
    assert!(snapshot.restart_pending);

    let seen = drain(&mut events);
    let scheduled = seen
        .iter()
        .filter(|event| matches!(event, SessionEvent::StreamRestartScheduled { .. }))
        .count();
    assert_eq!(scheduled, 1);
    assert_eq!(failures(&seen, FailureKind::Playback), 2);

    sleep(Duration::from_millis(2100)).await;
    let snapshot = session.snapshot().await.expect("session alive");
    assert!(!snapshot.restart_pending);
    assert_eq!(snapshot.resources_created, 2);
    assert_eq!(snapshot.attempts, 0);
    assert_eq!(snapshot.state, SessionState::Connected);

    let played = player.played();
    assert_eq!(played.len(), 2);
    assert_ne!(played[0].id, played[1].id, "resources are never reused");
    assert!(player.stop_count() >= 1);
    assert_eq!(transport.resolve_count(), 1, "playback failures never reconnect");
}

#[tokio::test(start_paused = true)]
async fn test_failed_restart_is_retried_after_debounce() {
    let transport = FakeVoiceTransport::new(ConnectScript::Ready);
    let session = spawn(&transport, 5);
    session.start().await.expect("connect");
    session.snapshot().await.expect("session alive");
    let mut events = session.subscribe();
    let player = transport.player().expect("player");

    player.fail_next_plays(1);
    player.emit(PlayerEvent::Error, Some("decoder hiccup"));

    let seen = wait_for_event(&mut events, |event| {
        matches!(event, SessionEvent::StreamStarted { .. })
    })
    .await;
    let scheduled = seen
        .iter()
        .filter(|event| matches!(event, SessionEvent::StreamRestartScheduled { .. }))
        .count();
    assert_eq!(scheduled, 2);
    assert_eq!(player.played().len(), 2);
    assert!(session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_cycles_do_not_accumulate_listeners() {
    let transport = FakeVoiceTransport::new(ConnectScript::Ready);
    let session = spawn(&transport, 5);
    session.start().await.expect("connect");
    let mut events = session.subscribe();

    for cycle in 1..=2 {
        let old = transport.last_link().expect("link");
        old.set_status(LinkStatus::Destroyed);
        wait_for_event(&mut events, entered(SessionState::Reconnecting)).await;
        wait_for_event(&mut events, entered(SessionState::Connected)).await;

        assert!(old.is_destroyed());
        assert_eq!(old.total_listeners(), 0, "cycle {cycle}: stale link still bound");

        let live = transport.last_link().expect("link");
        for event in [LinkEvent::Ready, LinkEvent::Disconnected, LinkEvent::Destroyed] {
            assert_eq!(live.listener_count(event), 1, "cycle {cycle}: {event:?}");
        }
    }

    let player = transport.player().expect("player");
    assert_eq!(transport.players().len(), 1, "player survives reconnects");
    assert_eq!(player.listener_count(PlayerEvent::Idle), 1);
    assert_eq!(player.listener_count(PlayerEvent::Error), 1);
    assert_eq!(session.snapshot().await.expect("alive").attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_that_renegotiates_is_left_alone() {
    let transport = FakeVoiceTransport::new(ConnectScript::Ready);
    let session = spawn(&transport, 5);
    session.start().await.expect("connect");
    let link = transport.last_link().expect("link");

    link.set_status(LinkStatus::Disconnected);
    link.set_status(LinkStatus::Connecting);
    sleep(Duration::from_secs(30)).await;
    link.set_status(LinkStatus::Ready);

    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(transport.resolve_count(), 1);
    assert!(!link.is_destroyed());
}

#[tokio::test(start_paused = true)]
async fn test_unresolved_disconnect_triggers_recovery() {
    let transport = FakeVoiceTransport::new(ConnectScript::Ready);
    let session = spawn(&transport, 5);
    session.start().await.expect("connect");
    let mut events = session.subscribe();
    let link = transport.last_link().expect("link");

    let before = tokio::time::Instant::now();
    link.set_status(LinkStatus::Disconnected);
    let seen = wait_for_event(&mut events, |event| {
        matches!(event, SessionEvent::Failure { kind: FailureKind::AmbiguousDisconnect, .. })
    })
    .await;
    assert!(tokio::time::Instant::now() - before >= Duration::from_secs(5));
    assert_eq!(failures(&seen, FailureKind::AmbiguousDisconnect), 1);

    wait_for_event(&mut events, entered(SessionState::Connected)).await;
    assert!(link.is_destroyed());
    assert_eq!(transport.resolve_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_ready_timeout_discards_link_and_retries() {
    let transport = FakeVoiceTransport::scripted([ConnectScript::NeverReady], ConnectScript::Ready);
    let session = spawn(&transport, 5);
    let mut events = session.subscribe();

    let err = session.start().await.expect_err("never-ready link fails the attempt");
    assert!(matches!(err, Error::Timeout(_)));

    wait_for_event(&mut events, entered(SessionState::Connected)).await;
    let links = transport.links();
    assert_eq!(links.len(), 2);
    assert!(links[0].is_destroyed());
    assert_eq!(links[0].total_listeners(), 0);
    assert!(!links[1].is_destroyed());
}

#[tokio::test(start_paused = true)]
async fn test_start_while_connecting_is_rejected() {
    let transport = FakeVoiceTransport::scripted([ConnectScript::NeverReady], ConnectScript::Ready);
    let session = spawn(&transport, 5);

    let (first, second) = tokio::join!(session.start(), session.start());
    assert!(first.is_err());
    assert!(second.is_ok());
    assert_eq!(transport.resolve_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_releases_everything() {
    let transport = FakeVoiceTransport::new(ConnectScript::Ready);
    let session = spawn(&transport, 5);
    session.start().await.expect("connect");
    let link = transport.last_link().expect("link");
    let player = transport.player().expect("player");

    session.destroy().await;

    assert_eq!(session.state(), SessionState::Destroyed);
    assert!(!session.is_connected());
    assert!(link.is_destroyed());
    assert_eq!(link.total_listeners(), 0);
    assert_eq!(player.listener_count(PlayerEvent::Idle), 0);
    assert_eq!(player.listener_count(PlayerEvent::Error), 0);
    assert!(player.stop_count() >= 1);

    // Signals from disposed objects reach nobody.
    assert_eq!(player.emit(PlayerEvent::Idle, None), 0);
    sleep(Duration::from_secs(3600)).await;
    session.stop().await;
    assert_eq!(session.state(), SessionState::Destroyed);
    assert_eq!(transport.resolve_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_state_sequence_is_totally_ordered() {
    let transport = FakeVoiceTransport::scripted([ConnectScript::AdapterFailure], ConnectScript::Ready);
    let session = spawn(&transport, 5);
    let mut events = session.subscribe();
    let mut seen = Vec::new();

    let _ = session.start().await;
    session.stop().await;
    session.start().await.expect("later start");
    seen.extend(wait_for_event(&mut events, entered(SessionState::Connected)).await);
    session.stop().await;
    session.stop().await;
    session.destroy().await;
    session.start().await.expect("no-op on a destroyed session");
    session.destroy().await;
    sleep(Duration::from_secs(120)).await;
    seen.extend(drain(&mut events));

    let chain = transitions(&seen);
    let mut current = SessionState::Idle;
    for (from, to) in &chain {
        assert_eq!(*from, current, "transition chain broken in {chain:?}");
        assert_ne!(from, to);
        current = *to;
    }
    assert_eq!(current, SessionState::Destroyed);
    assert_eq!(chain.iter().filter(|(_, to)| *to == SessionState::Destroyed).count(), 1);
    assert_eq!(transport.resolve_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_destroys_session() {
    let transport = FakeVoiceTransport::new(ConnectScript::Ready);
    let session = spawn(&transport, 5);
    session.start().await.expect("connect");
    let link = transport.last_link().expect("link");

    drop(session);
    sleep(Duration::from_millis(10)).await;

    assert!(link.is_destroyed());
    assert_eq!(link.total_listeners(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_during_adapter_lookup_never_joins() {
    let transport = FakeVoiceTransport::new(ConnectScript::Ready);
    transport.set_resolve_delay(Duration::from_secs(3));
    let session = spawn(&transport, 5);

    let (started, ()) = tokio::join!(session.start(), async {
        sleep(Duration::from_secs(1)).await;
        session.destroy().await;
    });
    assert_ok!(started);
    assert_eq!(session.state(), SessionState::Destroyed);
    assert_eq!(transport.resolve_count(), 1);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.join_count(), 0, "lookup finished after destroy but must not join");
    assert!(transport.links().is_empty());
    assert_eq!(transport.resolve_count(), 1);
    assert_eq!(session.state(), SessionState::Destroyed);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_adapter_lookup_then_fresh_start() {
    let transport = FakeVoiceTransport::new(ConnectScript::Ready);
    transport.set_resolve_delay(Duration::from_secs(3));
    let session = spawn(&transport, 5);

    let (started, ()) = tokio::join!(session.start(), async {
        sleep(Duration::from_secs(1)).await;
        session.stop().await;
    });
    assert_ok!(started);
    assert_eq!(session.state(), SessionState::Idle);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.join_count(), 0);
    assert_eq!(session.state(), SessionState::Idle);

    session.start().await.expect("fresh start connects");
    assert!(session.is_connected());
    assert_eq!(transport.join_count(), 1);
    assert_eq!(transport.links().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_waiting_for_ready_tears_link_down() {
    let transport = FakeVoiceTransport::scripted([ConnectScript::NeverReady], ConnectScript::Ready);
    let session = spawn(&transport, 5);
    let begun = tokio::time::Instant::now();

    let (started, ()) = tokio::join!(session.start(), async {
        sleep(Duration::from_secs(1)).await;
        session.stop().await;
    });
    assert_ok!(started);
    sleep(Duration::from_millis(10)).await;

    let link = transport.last_link().expect("link joined before stop");
    assert!(link.is_destroyed());
    assert_eq!(link.total_listeners(), 0);
    assert!(tokio::time::Instant::now() - begun < Duration::from_secs(5));

    sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.resolve_count(), 1);
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_that_returns_to_ready_is_left_alone() {
    let transport = FakeVoiceTransport::new(ConnectScript::Ready);
    let session = spawn(&transport, 5);
    session.start().await.expect("connect");
    let mut events = session.subscribe();
    let link = transport.last_link().expect("link");

    link.set_status(LinkStatus::Disconnected);
    sleep(Duration::from_millis(100)).await;
    link.set_status(LinkStatus::Ready);
    sleep(Duration::from_secs(10)).await;

    let seen = drain(&mut events);
    assert_eq!(failures(&seen, FailureKind::AmbiguousDisconnect), 0);
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(transport.resolve_count(), 1);
    assert!(!link.is_destroyed());
}
