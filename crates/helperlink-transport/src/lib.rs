//! Transport channels for the helper interface protocol.
//!
//! One contract, three realizations:
//! - anonymous pipes to a launched helper subprocess
//! - a connected TCP socket to a remote capture agent
//! - a WebSocket carrying frames as binary messages
//!
//! The channel halves only move bytes. Framing lives in `helperlink-frame`
//! and the read/dispatch/write cycle in `helperlink-peer`.
//!
//! Unix only: helpers are wired up with `pipe(2)`, `fork` and signals.

pub mod channel;
pub mod error;
pub mod pipe;
pub mod subprocess;
pub mod tcp;
pub mod tracker;
pub mod websocket;

pub use channel::{ChannelParts, ChannelReader, ChannelWriter, TransportChannel, TransportKind};
pub use error::{LaunchError, Result, TransportError};
pub use subprocess::{launch, resolve_binary, Credentials, LaunchSpec, Subprocess};
pub use tcp::TcpAcceptor;
pub use tracker::{ProcessCallbacks, ProcessTracker};
