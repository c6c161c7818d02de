use std::fmt;

/// Errors returned by the connection API.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] helperlink_transport::TransportError),

    /// Helper launch failed; nothing was spawned.
    #[error("launch failed: {0}")]
    Launch(#[from] helperlink_transport::LaunchError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] helperlink_frame::FrameError),

    /// The connection has already closed.
    #[error("connection closed: {0}")]
    Closed(CloseReason),
}

pub type Result<T> = std::result::Result<T, PeerError>;

/// Why a connection closed.
///
/// Every close funnels through one path, so exactly one reason is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Framing or dispatch failure: bad signature, oversized or malformed
    /// frame, unknown command.
    Protocol(String),
    /// EOF or an OS-level read/write failure.
    Transport(String),
    /// No pong within the keepalive window.
    KeepaliveTimeout,
    /// The peer sent `SHUTDOWN`.
    RemoteShutdown(String),
    /// Closed by the owner.
    Local(String),
}

impl CloseReason {
    /// True for closes the owner did not ask for.
    pub fn is_failure(&self) -> bool {
        !matches!(self, CloseReason::Local(_) | CloseReason::RemoteShutdown(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Protocol(detail) => write!(f, "protocol error: {detail}"),
            CloseReason::Transport(detail) => write!(f, "transport error: {detail}"),
            CloseReason::KeepaliveTimeout => f.write_str("keepalive timeout"),
            CloseReason::RemoteShutdown(reason) => write!(f, "remote shutdown: {reason}"),
            CloseReason::Local(reason) => write!(f, "closed locally: {reason}"),
        }
    }
}

/// Outcome of a failed dispatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Fatal: the connection closes.
    #[error("{0}")]
    Protocol(String),

    /// The frame is logged and dropped; the connection stays up.
    #[error("{0}")]
    Application(String),
}

impl From<helperlink_frame::FrameError> for DispatchError {
    /// Payload decode failures inside a well-framed message are
    /// application-level.
    fn from(err: helperlink_frame::FrameError) -> Self {
        DispatchError::Application(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_timeout_is_distinct_from_transport_failure() {
        let timeout = CloseReason::KeepaliveTimeout;
        let eof = CloseReason::Transport("end of stream".to_string());
        assert_ne!(timeout, eof);
        assert_eq!(timeout.to_string(), "keepalive timeout");
        assert!(timeout.is_failure());
        assert!(eof.is_failure());
        assert!(!CloseReason::Local("done".to_string()).is_failure());
    }

    #[test]
    fn frame_errors_are_application_level() {
        let err: DispatchError = helperlink_frame::FrameError::MissingField(1).into();
        assert!(matches!(err, DispatchError::Application(_)));
    }
}
