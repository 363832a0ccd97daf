// File: src/voice/connection.rs

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use radiobot_common::models::voice::{LinkEvent, LinkStatus, VoiceTarget};
use radiobot_common::traits::voice_traits::{SignalHandler, VoiceLink, VoiceTransport};
use crate::voice::listeners::ListenerRegistry;
use crate::Error;

/// Callback the manager wires every link signal into. Receives the
/// generation of the attempt that created the link.
pub type LinkSignalSink = Arc<dyn Fn(u64, LinkEvent, Option<&str>) + Send + Sync>;

/// A live link to the target channel together with its listener bindings.
/// Never reused: each reconnect builds a new one.
pub struct Connection {
    generation: u64,
    link: Arc<dyn VoiceLink>,
    listeners: ListenerRegistry<LinkEvent>,
}

impl Connection {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn link(&self) -> &Arc<dyn VoiceLink> {
        &self.link
    }

    pub fn is_ready(&self) -> bool {
        self.link.status() == LinkStatus::Ready
    }

    /// Unbinds every listener, then destroys the link. Destroy errors are
    /// returned for logging only; the connection is gone either way.
    pub async fn teardown(mut self) -> Result<(), Error> {
        let removed = self.listeners.teardown(self.link.as_ref());
        debug!("[Connection] gen={} removed {removed} listener(s)", self.generation);
        self.link.destroy().await
    }
}

/// Outcome of the renegotiation race after a `Disconnected` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectVerdict {
    /// The link entered a renegotiation state, or came back ready, in time.
    Healing(LinkStatus),
    Lost,
}

/// Opens links to a single voice target. Never retries on its own; failures
/// go back to the caller.
pub struct ConnectionManager {
    transport: Arc<dyn VoiceTransport>,
    target: VoiceTarget,
    ready_timeout: Duration,
    renegotiation_window: Duration,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        target: VoiceTarget,
        ready_timeout: Duration,
        renegotiation_window: Duration,
    ) -> Self {
        Self {
            transport,
            target,
            ready_timeout,
            renegotiation_window,
        }
    }

    pub fn target(&self) -> &VoiceTarget {
        &self.target
    }

    /// Resolves the adapter, builds a fresh link, binds its signals and waits
    /// (bounded) for it to become ready.
    ///
    /// Once `cancel` fires the attempt makes no further transport calls apart
    /// from tearing down a link it already joined.
    pub async fn connect(
        &self,
        generation: u64,
        sink: LinkSignalSink,
        cancel: CancellationToken,
    ) -> Result<Connection, Error> {
        info!(
            "[Connection] gen={generation} connecting to channel {} in guild {}",
            self.target.channel_id, self.target.guild_id
        );

        let adapter = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("[Connection] gen={generation} cancelled during adapter lookup");
                return Err(Error::Cancelled);
            }
            adapter = self.transport.resolve_adapter(&self.target) => adapter?,
        };
        let link = self.transport.join(&adapter, &self.target)?;

        let mut listeners = ListenerRegistry::new("voice link");
        let handlers: Vec<(LinkEvent, SignalHandler)> = LinkEvent::ALL
            .iter()
            .map(|event| {
                let event = *event;
                let sink = sink.clone();
                let handler: SignalHandler = Arc::new(move |detail| sink(generation, event, detail));
                (event, handler)
            })
            .collect();
        listeners.install(link.as_ref(), handlers);

        let connection = Connection {
            generation,
            link,
            listeners,
        };

        let ready = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            ready = connection.link.wait_for(LinkStatus::Ready, self.ready_timeout) => ready,
        };
        if let Err(e) = ready {
            warn!("[Connection] gen={generation} link never became ready: {e}");
            if let Err(teardown_err) = connection.teardown().await {
                warn!("[Connection] gen={generation} teardown after failed connect: {teardown_err}");
            }
            return Err(e);
        }

        info!(
            "[Connection] gen={generation} voice link ready in {}",
            adapter.channel_name.as_deref().unwrap_or("unnamed channel")
        );
        Ok(connection)
    }

    /// Races "entering signalling" against "entering connecting" against
    /// "ready again". Any of them means the transport is healing by itself.
    pub async fn classify_disconnect(&self, link: Arc<dyn VoiceLink>) -> DisconnectVerdict {
        let window = self.renegotiation_window;
        let signalling = link.wait_for(LinkStatus::Signalling, window);
        let connecting = link.wait_for(LinkStatus::Connecting, window);
        let ready = link.wait_for(LinkStatus::Ready, window);
        tokio::pin!(signalling, connecting, ready);

        let mut signalling_done = false;
        let mut connecting_done = false;
        let mut ready_done = false;
        while !(signalling_done && connecting_done && ready_done) {
            tokio::select! {
                res = &mut signalling, if !signalling_done => {
                    if res.is_ok() {
                        return DisconnectVerdict::Healing(LinkStatus::Signalling);
                    }
                    signalling_done = true;
                }
                res = &mut connecting, if !connecting_done => {
                    if res.is_ok() {
                        return DisconnectVerdict::Healing(LinkStatus::Connecting);
                    }
                    connecting_done = true;
                }
                res = &mut ready, if !ready_done => {
                    if res.is_ok() {
                        return DisconnectVerdict::Healing(LinkStatus::Ready);
                    }
                    ready_done = true;
                }
            }
        }
        DisconnectVerdict::Lost
    }
}
