// File: src/voice/timer.rs

use std::time::Duration;

use tokio::task::JoinHandle;

/// Holds at most one pending one-shot timer.
///
/// Each armed timer gets a fresh id which is passed to its callback. When the
/// fire message comes back, `settle` accepts it only if that id is still the
/// armed one, so a callback that raced a `cancel` is ignored.
#[derive(Default)]
pub struct TimerSlot {
    next_id: u64,
    armed: Option<(u64, JoinHandle<()>)>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the slot, replacing (and cancelling) anything already armed.
    pub fn arm<F>(&mut self, delay: Duration, fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.next_id += 1;
        let id = self.next_id;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(id);
        });
        self.armed = Some((id, handle));
        id
    }

    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Disarms the slot if `id` is the armed timer.
    pub fn settle(&mut self, id: u64) -> bool {
        match &self.armed {
            Some((armed, _)) if *armed == id => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
