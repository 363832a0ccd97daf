// src/lib.rs

pub mod voice;
pub mod platforms;
pub mod status;
pub mod tasks;
pub mod test_utils;

pub use radiobot_common::error::Error;
pub use voice::{SessionConfig, SessionSnapshot, VoiceSession};
