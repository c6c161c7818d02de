use helperlink_transport::{launch, tcp, websocket, LaunchSpec, ProcessCallbacks, ProcessTracker};
use tracing::debug;

use crate::connection::{ConnectionBuilder, ConnectionHandle};
use crate::error::Result;

/// Launch a helper subprocess and attach a connection to its pipes.
///
/// `callbacks` fire when the tracker reaps the helper; closing the
/// connection sends the helper `SIGTERM`.
pub fn launch_helper(
    spec: &LaunchSpec,
    tracker: &ProcessTracker,
    callbacks: ProcessCallbacks,
    builder: ConnectionBuilder,
) -> Result<ConnectionHandle> {
    let channel = launch(spec, tracker, callbacks)?;
    debug!(binary = %spec.binary, "helper launched; attaching connection");
    Ok(builder.attach(channel))
}

/// Connect to a remote capture agent over TCP.
pub async fn connect_tcp(addr: &str, builder: ConnectionBuilder) -> Result<ConnectionHandle> {
    let channel = tcp::connect(addr).await?;
    Ok(builder.attach(channel))
}

/// Connect to a WebSocket endpoint (`ws://...`).
pub async fn connect_websocket(url: &str, builder: ConnectionBuilder) -> Result<ConnectionHandle> {
    let channel = websocket::connect(url).await?;
    Ok(builder.attach(channel))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::error::PeerError;

    #[tokio::test]
    async fn launch_errors_surface_before_attach() {
        let tracker = ProcessTracker::new();
        let spec = LaunchSpec::new("../escape", vec![PathBuf::from("/usr/bin")]);
        let err = launch_helper(&spec, &tracker, ProcessCallbacks::new(), ConnectionBuilder::new())
            .unwrap_err();
        assert!(matches!(
            err,
            PeerError::Launch(helperlink_transport::LaunchError::InvalidName(_))
        ));
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn tcp_connect_failure_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = connect_tcp(&addr, ConnectionBuilder::new()).await.unwrap_err();
        assert!(matches!(err, PeerError::Transport(_)));
    }
}
