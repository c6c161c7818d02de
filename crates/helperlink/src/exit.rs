use std::fmt;
use std::io;

use helperlink_frame::FrameError;
use helperlink_peer::{CloseReason, PeerError};
use helperlink_transport::{LaunchError, TransportError};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn launch_error(context: &str, err: LaunchError) -> CliError {
    match err {
        LaunchError::InvalidName(_) | LaunchError::IsDirectory { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        LaunchError::NotFound { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        LaunchError::PermissionDenied { .. } => {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        LaunchError::Pipe(source) | LaunchError::Spawn { source, .. } => io_error(context, source),
    }
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::Launch(err) => launch_error(context, err),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Launch(err) => launch_error(context, err),
        PeerError::Frame(err) => frame_error(context, err),
        PeerError::Closed(reason) => CliError::new(close_code(&reason), format!("{context}: {reason}")),
    }
}

/// Exit code for a connection that ended with `reason`.
pub fn close_code(reason: &CloseReason) -> i32 {
    match reason {
        CloseReason::Local(_) | CloseReason::RemoteShutdown(_) => SUCCESS,
        CloseReason::KeepaliveTimeout => TIMEOUT,
        CloseReason::Protocol(_) => DATA_INVALID,
        CloseReason::Transport(_) => TRANSPORT_ERROR,
    }
}
