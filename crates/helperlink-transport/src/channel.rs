use std::fmt;
use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::subprocess::Subprocess;

/// The read half of a transport channel.
///
/// Reads take `&mut self`, so at most one read can be outstanding.
#[async_trait]
pub trait ChannelReader: Send {
    /// Fill `buf` completely, or fail. EOF is `ErrorKind::UnexpectedEof`.
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

/// The write half of a transport channel.
#[async_trait]
pub trait ChannelWriter: Send {
    /// Write all of `buf`. Callers issue one write at a time.
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Flush and close the write direction.
    async fn shutdown(&mut self) -> io::Result<()>;
}

/// Which concrete transport backs a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Anonymous pipes to a spawned helper.
    Pipe,
    /// A connected TCP socket.
    Tcp,
    /// A WebSocket carrying frames as binary messages.
    WebSocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Pipe => "pipe",
            TransportKind::Tcp => "tcp",
            TransportKind::WebSocket => "websocket",
        };
        f.write_str(name)
    }
}

/// Byte-stream reader over any tokio `AsyncRead`.
pub struct StreamReader<R>(R);

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ChannelReader for StreamReader<R> {
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        AsyncReadExt::read_exact(&mut self.0, buf).await.map(|_| ())
    }
}

/// Byte-stream writer over any tokio `AsyncWrite`.
pub struct StreamWriter<W>(W);

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ChannelWriter for StreamWriter<W> {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        AsyncWriteExt::write_all(&mut self.0, buf).await?;
        self.0.flush().await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        AsyncWriteExt::shutdown(&mut self.0).await
    }
}

/// One established transport, ready to be attached to a connection.
///
/// The channel exclusively owns its descriptors; dropping the halves closes
/// them. A pipe channel also carries the [`Subprocess`] record of its helper.
pub struct TransportChannel {
    kind: TransportKind,
    peer: String,
    reader: Box<dyn ChannelReader>,
    writer: Box<dyn ChannelWriter>,
    subprocess: Option<Subprocess>,
}

/// The owned pieces of a [`TransportChannel`].
pub struct ChannelParts {
    pub reader: Box<dyn ChannelReader>,
    pub writer: Box<dyn ChannelWriter>,
    pub subprocess: Option<Subprocess>,
}

impl TransportChannel {
    /// Assemble a channel from boxed halves.
    pub fn new(
        kind: TransportKind,
        peer: impl Into<String>,
        reader: Box<dyn ChannelReader>,
        writer: Box<dyn ChannelWriter>,
    ) -> Self {
        Self {
            kind,
            peer: peer.into(),
            reader,
            writer,
            subprocess: None,
        }
    }

    /// Assemble a channel from the two halves of a byte stream.
    pub fn from_stream<R, W>(kind: TransportKind, peer: impl Into<String>, read: R, write: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::new(
            kind,
            peer,
            Box::new(StreamReader(read)),
            Box::new(StreamWriter(write)),
        )
    }

    /// Replace the peer description.
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }

    /// Attach the helper process this channel talks to.
    pub fn with_subprocess(mut self, subprocess: Subprocess) -> Self {
        self.subprocess = Some(subprocess);
        self
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Peer description for diagnostics.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn subprocess(&self) -> Option<&Subprocess> {
        self.subprocess.as_ref()
    }

    /// Split into owned halves.
    pub fn into_parts(self) -> ChannelParts {
        ChannelParts {
            reader: self.reader,
            writer: self.writer,
            subprocess: self.subprocess,
        }
    }
}

impl fmt::Debug for TransportChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportChannel")
            .field("kind", &self.kind)
            .field("peer", &self.peer)
            .field("pid", &self.subprocess.as_ref().map(Subprocess::pid))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_halves_move_bytes_in_order() {
        let (left, right) = tokio::io::duplex(64);
        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);

        let a = TransportChannel::from_stream(TransportKind::Tcp, "a", left_read, left_write);
        let b = TransportChannel::from_stream(TransportKind::Tcp, "b", right_read, right_write);
        assert_eq!(a.kind(), TransportKind::Tcp);
        assert_eq!(b.peer(), "b");

        let mut a = a.into_parts();
        let mut b = b.into_parts();
        a.writer.write_all(b"first").await.unwrap();
        a.writer.write_all(b"second").await.unwrap();

        let mut buf = [0u8; 11];
        b.reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"firstsecond");
    }

    #[tokio::test]
    async fn eof_is_reported_as_unexpected_eof() {
        let (left, right) = tokio::io::duplex(64);
        let (right_read, right_write) = tokio::io::split(right);
        let mut parts =
            TransportChannel::from_stream(TransportKind::Pipe, "p", right_read, right_write)
                .into_parts();
        drop(left);

        let mut buf = [0u8; 4];
        let err = parts.reader.read_exact(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
