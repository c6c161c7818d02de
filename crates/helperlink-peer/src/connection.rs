use std::sync::atomic::{AtomicU64, Ordering};

use helperlink_frame::{Command, FieldSet, Frame, Generation};
use helperlink_transport::{ChannelParts, TransportChannel};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::collab::{Collaborators, HttpExchange, ProxyOutcome};
use crate::config::ConnectionConfig;
use crate::dispatch::{Dispatcher, Route};
use crate::engine::{Actor, CloseCallback, Core, Request};
use crate::error::{CloseReason, PeerError, Result};
use crate::handlers::proxy_exchange;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Snapshot of a connection, published whenever it changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Generation used for outbound frames.
    pub generation: Generation,
    /// Set by the first pong.
    pub generation_confirmed: bool,
    /// Subsystem named by the peer's `REGISTER`.
    pub subsystem: Option<String>,
    /// Proxied HTTP requests awaiting a closing response.
    pub pending_http: usize,
    /// Encoded frames queued or in flight.
    pub pending_writes: usize,
    /// Event names the peer is subscribed to, sorted.
    pub subscriptions: Vec<String>,
    /// Set once, when the connection closes.
    pub closed: Option<CloseReason>,
}

/// Configures and starts a connection over a transport channel.
pub struct ConnectionBuilder {
    config: ConnectionConfig,
    collab: Collaborators,
    label: Option<String>,
    on_close: Option<CloseCallback>,
    forwards: Vec<(Command, mpsc::UnboundedSender<Frame>)>,
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self {
            config: ConnectionConfig::default(),
            collab: Collaborators::default(),
            label: None,
            on_close: None,
            forwards: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_collaborators(mut self, collab: Collaborators) -> Self {
        self.collab = collab;
        self
    }

    /// Name used in logs. Defaults to the transport and peer.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Called exactly once with the close reason.
    pub fn on_close(mut self, f: impl FnOnce(&CloseReason) + Send + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    /// Deliver frames of `command` to `tx` instead of the built-in table.
    ///
    /// Commands with no route are protocol errors, so owners forward the
    /// ones their subsystem understands.
    pub fn forward(mut self, command: Command, tx: mpsc::UnboundedSender<Frame>) -> Self {
        self.forwards.push((command, tx));
        self
    }

    /// Start the connection task. Must be called within a tokio runtime.
    pub fn attach(self, channel: TransportChannel) -> ConnectionHandle {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let label = self
            .label
            .unwrap_or_else(|| format!("{} {}", channel.kind(), channel.peer()));
        let ChannelParts {
            reader,
            writer,
            subprocess,
        } = channel.into_parts();
        let pid = subprocess.as_ref().map(|s| s.pid());

        let (tx, rx) = mpsc::unbounded_channel();
        let core = Core::new(
            id,
            self.config,
            self.collab,
            tx.downgrade(),
            subprocess,
            self.on_close,
        );
        let (status_tx, status_rx) = watch::channel(core.status(false));
        let token = CancellationToken::new();

        let mut dispatcher = Dispatcher::with_builtins();
        for (command, forward) in self.forwards {
            dispatcher.register(command, Route::Forward(forward));
        }

        let actor = Actor {
            core,
            dispatcher,
            requests: rx,
            status: status_tx,
            token: token.clone(),
            writer: Some(writer),
        };
        tokio::spawn(actor.run(reader));
        info!(connection = id, label = %label, ?pid, "connection attached");

        ConnectionHandle {
            id,
            label,
            pid,
            requests: tx,
            status: status_rx,
            token,
        }
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle to a running connection.
///
/// The connection closes itself once every handle has been dropped.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: u64,
    label: String,
    pid: Option<u32>,
    requests: mpsc::UnboundedSender<Request>,
    status: watch::Receiver<ConnectionStatus>,
    token: CancellationToken,
}

impl ConnectionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Pid of the attached helper, for pipe connections.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status changes.
    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Queue `command` for the peer at the negotiated generation.
    pub fn send(&self, command: Command, fields: FieldSet) -> Result<()> {
        self.send_with_code(command, 0, fields)
    }

    /// Like [`Self::send`], with a generation-3 status code.
    pub fn send_with_code(&self, command: Command, code: u16, fields: FieldSet) -> Result<()> {
        self.submit(Request::Send {
            command,
            code,
            fields,
        })
    }

    /// Tunnel an HTTP request to the peer and wait for its response.
    pub async fn proxy_http(&self, exchange: Box<dyn HttpExchange>) -> ProxyOutcome {
        proxy_exchange(&self.requests, exchange).await
    }

    /// Send `SHUTDOWN`, flush, then close. Resolves once closed.
    pub async fn shutdown(&self, reason: Option<String>) -> CloseReason {
        let _ = self.requests.send(Request::Shutdown { reason });
        self.closed().await
    }

    /// Close immediately, discarding queued writes. Resolves once closed.
    pub async fn close(&self, reason: impl Into<String>) -> CloseReason {
        let _ = self.requests.send(Request::Close {
            reason: CloseReason::Local(reason.into()),
        });
        self.closed().await
    }

    /// Wait for the connection to close, for any reason.
    pub async fn closed(&self) -> CloseReason {
        self.token.cancelled().await;
        self.close_reason()
    }

    fn close_reason(&self) -> CloseReason {
        self.status
            .borrow()
            .closed
            .clone()
            .unwrap_or_else(|| CloseReason::Local("connection task ended".to_string()))
    }

    fn submit(&self, request: Request) -> Result<()> {
        if self.is_closed() {
            return Err(PeerError::Closed(self.close_reason()));
        }
        self.requests
            .send(request)
            .map_err(|_| PeerError::Closed(self.close_reason()))
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("pid", &self.pid)
            .field("closed", &self.is_closed())
            .finish()
    }
}
