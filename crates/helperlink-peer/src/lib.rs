//! Connection engine for external helper processes and remote agents.
//!
//! A connection owns one transport channel and speaks the framed helper
//! protocol over it: it negotiates the frame generation with keepalive
//! pings, dispatches inbound frames to built-in handlers or forwarded
//! routes, tunnels HTTP requests to the peer, and bridges events.
//! Everything for one connection runs on a single task; callers drive
//! it through a cloneable [`ConnectionHandle`].

pub mod bridge;
pub mod collab;
pub mod config;
pub mod connection;
pub mod connector;
mod dispatch;
mod engine;
pub mod error;
mod handlers;
pub mod keepalive;
pub mod listener;

pub use bridge::{SessionTable, BAD_GATEWAY};
pub use collab::{
    Collaborators, Event, EventBus, EventCallback, HttpExchange, HttpServer, MessageLog,
    ProxyOutcome, RouteHandler, SubscriptionId, TracingLog,
};
pub use config::{ConnectionConfig, KeepaliveConfig};
pub use connection::{ConnectionBuilder, ConnectionHandle, ConnectionStatus};
pub use connector::{connect_tcp, connect_websocket, launch_helper};
pub use error::{CloseReason, DispatchError, PeerError, Result};
pub use handlers::EMPTY_MESSAGE;
pub use keepalive::KeepaliveMonitor;
pub use listener::RemoteListener;
