//! src/voice/mod.rs
//!
//! Keeps one audio stream playing into one voice channel, recovering from
//! transport drops and playback failures without outside help.
//!
//! The [`VoiceSession`] actor composes the pieces in this module:
//!   - [`listeners::ListenerRegistry`] owns the signal bindings of each link/player
//!   - [`connection::ConnectionManager`] opens links and classifies disconnects
//!   - [`playback::PlaybackEngine`] starts the stream and debounces restarts
//!   - [`recovery::RecoveryScheduler`] decides when (and whether) to reconnect

pub mod config;
pub mod connection;
pub mod listeners;
pub mod playback;
pub mod recovery;
pub mod session;
pub mod signals;
pub mod timer;

pub use config::SessionConfig;
pub use recovery::BackoffPolicy;
pub use session::{SessionSnapshot, VoiceSession};
pub use signals::{LinkSignals, SignalHub};
