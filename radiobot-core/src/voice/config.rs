// File: src/voice/config.rs

use std::time::Duration;

use crate::voice::recovery::BackoffPolicy;

pub const DEFAULT_STREAM_VOLUME: f32 = 0.8;
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RENEGOTIATION_WINDOW: Duration = Duration::from_secs(5);
pub const DEFAULT_STREAM_RESTART_DELAY: Duration = Duration::from_secs(2);

/// Tunables for one voice session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Fixed source every playback attempt is bound to.
    pub stream_url: String,
    /// Output gain applied to each new resource.
    pub volume: f32,
    /// Bound on waiting for a fresh link to become ready.
    pub ready_timeout: Duration,
    /// How long a disconnected link gets to start renegotiating before it is
    /// treated as dead.
    pub renegotiation_window: Duration,
    /// Debounce delay for stream-only restarts.
    pub restart_delay: Duration,
    pub backoff: BackoffPolicy,
}

impl SessionConfig {
    pub fn new(stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
            volume: DEFAULT_STREAM_VOLUME,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            renegotiation_window: DEFAULT_RENEGOTIATION_WINDOW,
            restart_delay: DEFAULT_STREAM_RESTART_DELAY,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}
