use std::io;
use std::os::fd::OwnedFd;

use tokio::net::unix::pipe;

use crate::channel::{TransportChannel, TransportKind};

/// Wrap a pair of anonymous pipe ends as a channel.
///
/// `read` is the end frames arrive on, `write` the end they leave by. Both
/// are switched to non-blocking mode. Used by the launcher for the parent's
/// ends and by async helpers for the descriptors named by `--in-fd`/`--out-fd`.
pub fn from_fds(read: OwnedFd, write: OwnedFd, peer: impl Into<String>) -> io::Result<TransportChannel> {
    let reader = pipe::Receiver::from_owned_fd(read)?;
    let writer = pipe::Sender::from_owned_fd(write)?;
    Ok(TransportChannel::from_stream(TransportKind::Pipe, peer, reader, writer))
}
