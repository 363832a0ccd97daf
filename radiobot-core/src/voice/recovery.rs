// File: src/voice/recovery.rs

use std::time::Duration;

use tracing::{debug, info};

use crate::voice::timer::TimerSlot;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Exponential backoff policy for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Reaching this many consecutive failures is fatal.
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// `min(base * 2^(attempt-1), max)`; `attempt` is 1-based.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    Retry { attempt: u32, delay: Duration },
    /// A retry timer is already outstanding; nothing was scheduled.
    AlreadyScheduled,
    Exhausted { attempts: u32 },
}

/// Counts consecutive connect failures and owns the single retry timer.
pub struct RecoveryScheduler {
    policy: BackoffPolicy,
    attempts: u32,
    timer: TimerSlot,
}

impl RecoveryScheduler {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            timer: TimerSlot::new(),
        }
    }

    /// Records a failure and, unless the ceiling is hit, arms the retry timer.
    /// `fire` runs with the timer id once the delay elapses.
    pub fn on_failure<F>(&mut self, fire: F) -> RecoveryDecision
    where
        F: FnOnce(u64) + Send + 'static,
    {
        if self.timer.is_armed() {
            debug!("[Recovery] retry already pending; ignoring duplicate request");
            return RecoveryDecision::AlreadyScheduled;
        }

        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            return RecoveryDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        let delay = self.policy.delay_for(self.attempts);
        self.timer.arm(delay, fire);
        info!(
            "[Recovery] attempt {}/{} scheduled in {:?}",
            self.attempts, self.policy.max_attempts, delay
        );
        RecoveryDecision::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    /// Accepts a fire notification; false for cancelled or superseded timers.
    pub fn settle(&mut self, timer_id: u64) -> bool {
        self.timer.settle(timer_id)
    }

    pub fn cancel(&mut self) -> bool {
        self.timer.cancel()
    }

    /// Clears the failure count and any pending retry.
    pub fn reset(&mut self) {
        self.timer.cancel();
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_armed()
    }
}
