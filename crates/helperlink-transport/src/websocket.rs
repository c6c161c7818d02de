//! WebSocket transport for browser-embedded plugins.
//!
//! Each outbound write becomes one binary message. Inbound binary messages
//! are concatenated into a byte stream, so a frame may span messages or a
//! message may carry several frames. Text messages are a protocol violation.

use std::io;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::channel::{ChannelReader, ChannelWriter, TransportChannel, TransportKind};
use crate::error::{Result, TransportError};

/// Read half: buffers binary messages until a read can be satisfied.
pub struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
    pending: BytesMut,
}

/// Write half: one binary message per write.
pub struct WsWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> ChannelReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        while self.pending.len() < buf.len() {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => self.pending.extend_from_slice(&data),
                Some(Ok(Message::Text(_))) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "text message on a binary frame channel",
                    ));
                }
                // Control frames are answered by tungstenite itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "websocket closed by peer");
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                Some(Err(err)) => return Err(into_io(err)),
                None => return Err(io::ErrorKind::UnexpectedEof.into()),
            }
        }
        buf.copy_from_slice(&self.pending[..buf.len()]);
        self.pending.advance(buf.len());
        Ok(())
    }
}

#[async_trait]
impl<S> ChannelWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.sink
            .send(Message::Binary(buf.to_vec()))
            .await
            .map_err(into_io)
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.sink.close().await.map_err(into_io)
    }
}

fn into_io(err: tungstenite::Error) -> io::Error {
    match err {
        tungstenite::Error::Io(err) => err,
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            io::ErrorKind::UnexpectedEof.into()
        }
        other => io::Error::other(other),
    }
}

/// Wrap an established WebSocket as a channel.
pub fn from_websocket<S>(ws: WebSocketStream<S>, peer: impl Into<String>) -> TransportChannel
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    TransportChannel::new(
        TransportKind::WebSocket,
        peer,
        Box::new(WsReader {
            stream,
            pending: BytesMut::new(),
        }),
        Box::new(WsWriter { sink }),
    )
}

/// Open a client WebSocket to `url` (`ws://host:port/path`).
pub async fn connect(url: &str) -> Result<TransportChannel> {
    let (ws, response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|err| match err {
            tungstenite::Error::Io(source) => TransportError::Connect {
                addr: url.to_string(),
                source,
            },
            other => TransportError::WebSocket(other.to_string()),
        })?;
    debug!(url, status = %response.status(), "websocket handshake complete");
    Ok(from_websocket(ws, url))
}

/// Run the server side of the handshake on an accepted socket.
pub async fn accept(stream: TcpStream) -> Result<TransportChannel> {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "websocket peer".to_string());
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|err| TransportError::WebSocket(err.to_string()))?;
    debug!(peer = %peer, "accepted websocket");
    Ok(from_websocket(ws, peer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn ws_pair() -> (
        WebSocketStream<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (a, b) = tokio::io::duplex(4096);
        let client = WebSocketStream::from_raw_socket(a, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(b, Role::Server, None).await;
        (client, server)
    }

    #[tokio::test]
    async fn reads_span_message_boundaries() {
        let (mut client, server) = ws_pair().await;
        let mut parts = from_websocket(server, "browser").into_parts();

        client.send(Message::Binary(b"abc".to_vec())).await.unwrap();
        client.send(Message::Binary(b"defgh".to_vec())).await.unwrap();

        let mut head = [0u8; 2];
        parts.reader.read_exact(&mut head).await.unwrap();
        assert_eq!(&head, b"ab");
        let mut rest = [0u8; 6];
        parts.reader.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"cdefgh");
    }

    #[tokio::test]
    async fn writes_become_binary_messages() {
        let (mut client, server) = ws_pair().await;
        let mut parts = from_websocket(server, "browser").into_parts();

        parts.writer.write_all(b"frame").await.unwrap();
        match client.next().await {
            Some(Ok(Message::Binary(data))) => assert_eq!(data, b"frame"),
            other => panic!("expected binary message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_message_is_invalid_data() {
        let (mut client, server) = ws_pair().await;
        let mut parts = from_websocket(server, "browser").into_parts();

        client.send(Message::Text("hello".to_string())).await.unwrap();
        let mut buf = [0u8; 4];
        let err = parts.reader.read_exact(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn close_reads_as_eof() {
        let (mut client, server) = ws_pair().await;
        let mut parts = from_websocket(server, "browser").into_parts();

        client.close(None).await.unwrap();
        let mut buf = [0u8; 4];
        let err = parts.reader.read_exact(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
