use std::net::SocketAddr;

use helperlink_transport::{websocket, TcpAcceptor};
use tokio::net::ToSocketAddrs;

use crate::connection::{ConnectionBuilder, ConnectionHandle};
use crate::error::Result;

/// Accepts remote capture agents (raw TCP) or browser plugins (WebSocket).
#[derive(Debug)]
pub struct RemoteListener {
    acceptor: TcpAcceptor,
    websocket: bool,
}

impl RemoteListener {
    /// Listen for agents speaking frames directly over TCP.
    pub async fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        Ok(Self {
            acceptor: TcpAcceptor::bind(addr).await?,
            websocket: false,
        })
    }

    /// Listen for WebSocket clients carrying frames as binary messages.
    pub async fn bind_websocket(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        Ok(Self {
            acceptor: TcpAcceptor::bind(addr).await?,
            websocket: true,
        })
    }

    /// Accept the next peer and attach a connection configured by `builder`.
    pub async fn accept(&self, builder: ConnectionBuilder) -> Result<ConnectionHandle> {
        let channel = if self.websocket {
            websocket::accept(self.acceptor.accept_stream().await?).await?
        } else {
            self.acceptor.accept().await?
        };
        Ok(builder.attach(channel))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.acceptor.local_addr()?)
    }

    pub fn is_websocket(&self) -> bool {
        self.websocket
    }
}
