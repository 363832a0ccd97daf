// File: radiobot-core/src/test_utils/mod.rs

pub mod fakes;

pub use fakes::{ConnectScript, FakeAudioPlayer, FakeVoiceLink, FakeVoiceTransport};
