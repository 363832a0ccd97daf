use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Error;
use crate::models::voice::{
    AudioResource, LinkEvent, LinkStatus, PlayerEvent, VoiceAdapter, VoiceTarget,
};

/// Callback bound to a named signal. The argument carries an optional
/// human-readable detail (e.g. the error text of a player failure).
pub type SignalHandler = Arc<dyn Fn(Option<&str>) + Send + Sync>;

/// Opaque handle returned by [`EventSource::on`]; pass it back to `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Anything that emits named signals to registered handlers.
pub trait EventSource<E>: Send + Sync {
    fn on(&self, event: E, handler: SignalHandler) -> ListenerId;

    /// Returns false if the id was not (or no longer) registered.
    fn off(&self, id: ListenerId) -> bool;
}

/// The voice library as seen by the session: directory lookup, link
/// construction and output pipeline construction.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn resolve_adapter(&self, target: &VoiceTarget) -> Result<VoiceAdapter, Error>;

    /// Constructs a new link and starts its handshake. Readiness is signalled
    /// later through the link itself.
    fn join(&self, adapter: &VoiceAdapter, target: &VoiceTarget) -> Result<Arc<dyn VoiceLink>, Error>;

    fn create_player(&self) -> Result<Arc<dyn AudioPlayer>, Error>;
}

/// A live transport session to one voice channel.
#[async_trait]
pub trait VoiceLink: EventSource<LinkEvent> {
    fn status(&self) -> LinkStatus;

    /// Resolves once the link is (or becomes) `status`, failing with
    /// `Error::Timeout` after `timeout`.
    async fn wait_for(&self, status: LinkStatus, timeout: Duration) -> Result<(), Error>;

    /// Routes the player's output into this link.
    async fn subscribe(&self, player: &Arc<dyn AudioPlayer>) -> Result<(), Error>;

    async fn destroy(&self) -> Result<(), Error>;
}

/// The continuous audio output pipeline.
#[async_trait]
pub trait AudioPlayer: EventSource<PlayerEvent> {
    async fn play(&self, resource: &AudioResource) -> Result<(), Error>;

    async fn stop(&self) -> Result<(), Error>;

    fn as_any(&self) -> &dyn Any;
}
