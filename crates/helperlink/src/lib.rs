//! Protocol engine for external capture helpers and remote agents.
//!
//! A server launches helper binaries (or accepts remote agents over TCP and
//! WebSocket) and talks to them with a framed, versioned protocol: log
//! messages, keepalive pings, proxied HTTP routes and event-bus traffic.
//!
//! # Crate Structure
//!
//! - [`frame`]: wire codec for protocol generations 2 and 3
//! - [`transport`]: pipe, TCP and WebSocket channels plus helper process management
//! - [`peer`]: the connection engine and its collaborator traits

/// Re-export frame types.
pub mod frame {
    pub use helperlink_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use helperlink_transport::*;
}

/// Re-export connection engine types.
pub mod peer {
    pub use helperlink_peer::*;
}
