pub mod voice_traits;

pub use voice_traits::{AudioPlayer, EventSource, ListenerId, SignalHandler, VoiceLink, VoiceTransport};
