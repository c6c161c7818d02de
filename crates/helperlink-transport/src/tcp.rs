use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info};

use crate::channel::{TransportChannel, TransportKind};
use crate::error::{Result, TransportError};

/// Connect to a remote capture agent.
pub async fn connect(addr: &str) -> Result<TransportChannel> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    debug!(addr, "connected over tcp");
    from_stream(stream)
}

/// Wrap an already-connected socket.
pub fn from_stream(stream: TcpStream) -> Result<TransportChannel> {
    stream.set_nodelay(true)?;
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "tcp peer".to_string());
    let (read, write) = stream.into_split();
    Ok(TransportChannel::from_stream(TransportKind::Tcp, peer, read, write))
}

/// Accepts remote agents over TCP.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Bind and listen. Port 0 picks a free port; see [`Self::local_addr`].
    pub async fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let shown = addr.to_string();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: shown.clone(),
                source,
            })?;
        info!(addr = %shown, "listening for tcp agents");
        Ok(Self { listener })
    }

    /// Accept the next raw socket.
    pub async fn accept_stream(&self) -> Result<TcpStream> {
        let (stream, addr) = self.listener.accept().await.map_err(TransportError::Accept)?;
        debug!(%addr, "accepted tcp connection");
        Ok(stream)
    }

    /// Accept the next agent as a framed byte-stream channel.
    pub async fn accept(&self) -> Result<TransportChannel> {
        from_stream(self.accept_stream().await?)
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_and_connect_exchange_bytes() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
        let addr = acceptor.local_addr().unwrap().to_string();

        let client = tokio::spawn(async move {
            let mut parts = connect(&addr).await.unwrap().into_parts();
            parts.writer.write_all(b"hello").await.unwrap();
        });

        let server = acceptor.accept().await.unwrap();
        assert_eq!(server.kind(), TransportKind::Tcp);
        let mut parts = server.into_parts();
        let mut buf = [0u8; 5];
        parts.reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused_is_reported_with_address() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
        let addr = acceptor.local_addr().unwrap().to_string();
        drop(acceptor);

        let err = connect(&addr).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { addr: ref a, .. } if *a == addr));
    }
}
