// File: radiobot-common/src/models/voice.rs

use std::fmt;
use std::time::Duration;

use twilight_model::id::marker::{ChannelMarker, GuildMarker};
use twilight_model::id::Id;

/// Lifecycle state of the voice session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Reconnecting,
    Destroyed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Destroyed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Disconnecting => write!(f, "disconnecting"),
            SessionState::Reconnecting => write!(f, "reconnecting"),
            SessionState::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Status reported by a live voice transport link.
///
/// `Signalling` and `Connecting` are the two renegotiation states a link may
/// pass through after a `Disconnected` blip without being dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    Signalling,
    Connecting,
    Ready,
    Disconnected,
    Destroyed,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Signalling => write!(f, "signalling"),
            LinkStatus::Connecting => write!(f, "connecting"),
            LinkStatus::Ready => write!(f, "ready"),
            LinkStatus::Disconnected => write!(f, "disconnected"),
            LinkStatus::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Named signals a link emits to its listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkEvent {
    Ready,
    Disconnected,
    Destroyed,
}

impl LinkEvent {
    pub const ALL: [LinkEvent; 3] = [LinkEvent::Disconnected, LinkEvent::Destroyed, LinkEvent::Ready];

    /// Maps a status change to the signal it emits, if any.
    pub fn for_status(status: LinkStatus) -> Option<LinkEvent> {
        match status {
            LinkStatus::Ready => Some(LinkEvent::Ready),
            LinkStatus::Disconnected => Some(LinkEvent::Disconnected),
            LinkStatus::Destroyed => Some(LinkEvent::Destroyed),
            LinkStatus::Signalling | LinkStatus::Connecting => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LinkEvent::Ready => "ready",
            LinkEvent::Disconnected => "disconnected",
            LinkEvent::Destroyed => "destroyed",
        }
    }
}

/// Named signals the output pipeline emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerEvent {
    /// Nothing further is queued (the stream ended).
    Idle,
    Error,
}

impl PlayerEvent {
    pub const ALL: [PlayerEvent; 2] = [PlayerEvent::Error, PlayerEvent::Idle];

    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::Idle => "idle",
            PlayerEvent::Error => "error",
        }
    }
}

/// The guild/channel pair the session keeps audio flowing into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceTarget {
    pub guild_id: Id<GuildMarker>,
    pub channel_id: Id<ChannelMarker>,
    pub self_deaf: bool,
}

impl VoiceTarget {
    pub fn new(guild_id: Id<GuildMarker>, channel_id: Id<ChannelMarker>) -> Self {
        Self {
            guild_id,
            channel_id,
            self_deaf: true,
        }
    }
}

/// Result of the directory lookup for a target: what the transport needs to
/// open a link for that guild's signalling channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceAdapter {
    pub guild_id: Id<GuildMarker>,
    pub channel_id: Id<ChannelMarker>,
    pub channel_name: Option<String>,
}

/// One playback attempt of the fixed stream. Never reused across restarts.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioResource {
    pub id: u64,
    pub url: String,
    pub volume: f32,
}

/// Failure classes the controller distinguishes when routing recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Adapter resolution, handshake or ready-timeout errors.
    TransientNetwork,
    /// A disconnect that did not heal inside the renegotiation window.
    AmbiguousDisconnect,
    /// Output pipeline error or idle; only the stream is restarted.
    Playback,
    ExhaustedRetries,
    /// Errors while disposing an already superseded link or player.
    Teardown,
}

impl FailureKind {
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::ExhaustedRetries)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::TransientNetwork => write!(f, "transient-network"),
            FailureKind::AmbiguousDisconnect => write!(f, "ambiguous-disconnect"),
            FailureKind::Playback => write!(f, "playback"),
            FailureKind::ExhaustedRetries => write!(f, "exhausted-retries"),
            FailureKind::Teardown => write!(f, "teardown"),
        }
    }
}

/// Reports the session broadcasts to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    RetryScheduled {
        attempt: u32,
        delay: Duration,
    },
    StreamStarted {
        resource: AudioResource,
    },
    StreamRestartScheduled {
        delay: Duration,
    },
    Failure {
        kind: FailureKind,
        detail: String,
    },
}
