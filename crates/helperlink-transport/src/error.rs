use std::path::PathBuf;

/// Errors that can occur while establishing a transport channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// The WebSocket handshake or framing failed.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Launching a helper subprocess failed.
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Errors reported synchronously by [`crate::subprocess::launch`].
///
/// No process has been spawned when any of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Helper names must be bare file names, resolved against the search path.
    #[error("invalid helper name {0:?}: must be a bare file name")]
    InvalidName(String),

    /// No search path entry contains the helper.
    #[error("helper {binary:?} not found in search path {searched:?}")]
    NotFound {
        binary: String,
        searched: Vec<PathBuf>,
    },

    /// The only match is a directory.
    #[error("{path} is a directory, not a helper binary")]
    IsDirectory { path: PathBuf },

    /// The helper exists but the current user may not execute it.
    #[error("{path} is not executable by the current user (check owner, group membership and mode)")]
    PermissionDenied { path: PathBuf },

    /// Creating the helper pipes failed.
    #[error("failed to create helper pipes: {0}")]
    Pipe(std::io::Error),

    /// fork/exec of the helper failed.
    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, TransportError>;
