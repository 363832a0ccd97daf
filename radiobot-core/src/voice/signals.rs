// File: src/voice/signals.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use radiobot_common::models::voice::{LinkEvent, LinkStatus};
use radiobot_common::traits::voice_traits::{ListenerId, SignalHandler};
use crate::Error;

/// Minimal multi-listener emitter shared by all voice backends.
pub struct SignalHub<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, E, SignalHandler)>>,
}

impl<E> SignalHub<E>
where
    E: Copy + Eq + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn on(&self, event: E, handler: SignalHandler) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, event, handler));
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut guard = self.listeners.lock();
        let before = guard.len();
        guard.retain(|(existing, _, _)| *existing != id);
        guard.len() != before
    }

    /// Calls every handler bound to `event` and returns how many ran.
    pub fn emit(&self, event: E, detail: Option<&str>) -> usize {
        // Handlers may call back into the hub, so never run them under the lock.
        let handlers: Vec<SignalHandler> = self
            .listeners
            .lock()
            .iter()
            .filter(|(_, bound, _)| *bound == event)
            .map(|(_, _, handler)| handler.clone())
            .collect();

        for handler in &handlers {
            handler(detail);
        }
        handlers.len()
    }

    pub fn listener_count(&self, event: E) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|(_, bound, _)| *bound == event)
            .count()
    }

    pub fn total_listeners(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl<E> Default for SignalHub<E>
where
    E: Copy + Eq + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Status cell plus signal hub for one transport link.
///
/// Status changes are published on a `watch` channel (for bounded waits)
/// and mirrored as named signals (for listeners).
pub struct LinkSignals {
    hub: SignalHub<LinkEvent>,
    status: watch::Sender<LinkStatus>,
}

impl LinkSignals {
    pub fn new(initial: LinkStatus) -> Self {
        let (status, _) = watch::channel(initial);
        Self {
            hub: SignalHub::new(),
            status,
        }
    }

    pub fn hub(&self) -> &SignalHub<LinkEvent> {
        &self.hub
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    pub fn set_status(&self, next: LinkStatus) {
        self.set_status_with_detail(next, None);
    }

    pub fn set_status_with_detail(&self, next: LinkStatus, detail: Option<&str>) {
        let previous = self.status.send_replace(next);
        trace!("(LinkSignals) {previous} -> {next}");
        if let Some(event) = LinkEvent::for_status(next) {
            self.hub.emit(event, detail);
        }
    }

    pub async fn wait_for(&self, target: LinkStatus, timeout: Duration) -> Result<(), Error> {
        let mut rx = self.status.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|status| *status == target))
            .await?
            .map_err(|_| Error::Voice(format!("link dropped while waiting for {target}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use radiobot_common::models::voice::PlayerEvent;

    fn counting_handler(counter: &Arc<AtomicUsize>) -> SignalHandler {
        let counter = counter.clone();
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_emit_reaches_only_matching_listeners() {
        let hub = SignalHub::new();
        let idle = Arc::new(AtomicUsize::new(0));
        let error = Arc::new(AtomicUsize::new(0));
        hub.on(PlayerEvent::Idle, counting_handler(&idle));
        hub.on(PlayerEvent::Error, counting_handler(&error));

        assert_eq!(hub.emit(PlayerEvent::Idle, None), 1);
        assert_eq!(idle.load(Ordering::SeqCst), 1);
        assert_eq!(error.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_off_removes_listener_once() {
        let hub = SignalHub::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = hub.on(PlayerEvent::Idle, counting_handler(&hits));

        assert!(hub.off(id));
        assert!(!hub.off(id));
        assert_eq!(hub.emit(PlayerEvent::Idle, None), 0);
        assert_eq!(hub.total_listeners(), 0);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let hub = Arc::new(SignalHub::new());
        let slot = Arc::new(Mutex::new(None::<ListenerId>));
        let hub_ref = hub.clone();
        let slot_ref = slot.clone();
        let id = hub.on(
            PlayerEvent::Error,
            Arc::new(move |_| {
                if let Some(id) = *slot_ref.lock() {
                    hub_ref.off(id);
                }
            }),
        );
        *slot.lock() = Some(id);

        hub.emit(PlayerEvent::Error, Some("boom"));
        assert_eq!(hub.listener_count(PlayerEvent::Error), 0);
    }

    #[test]
    fn test_status_change_emits_mapped_signal() {
        let signals = LinkSignals::new(LinkStatus::Signalling);
        let ready = Arc::new(AtomicUsize::new(0));
        signals.hub().on(LinkEvent::Ready, counting_handler(&ready));

        signals.set_status(LinkStatus::Connecting);
        assert_eq!(ready.load(Ordering::SeqCst), 0);
        signals.set_status(LinkStatus::Ready);
        assert_eq!(ready.load(Ordering::SeqCst), 1);
        assert_eq!(signals.status(), LinkStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out_and_resolves() {
        let signals = Arc::new(LinkSignals::new(LinkStatus::Signalling));

        let err = signals
            .wait_for(LinkStatus::Ready, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        let waiter = {
            let signals = signals.clone();
            tokio::spawn(async move { signals.wait_for(LinkStatus::Ready, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        signals.set_status(LinkStatus::Ready);
        assert!(waiter.await.unwrap().is_ok());

        // Already in the requested status: resolves immediately.
        assert!(signals.wait_for(LinkStatus::Ready, Duration::from_millis(1)).await.is_ok());
    }
}
