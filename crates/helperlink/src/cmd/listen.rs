use helperlink_peer::{ConnectionBuilder, ConnectionHandle, PeerError, RemoteListener};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cmd::{print_datasource_frames, stop_requested, ListenArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_status, OutputFormat};

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.engine.to_config()?;
    let listener = if args.websocket {
        RemoteListener::bind_websocket(args.addr.as_str()).await
    } else {
        RemoteListener::bind(args.addr.as_str()).await
    }
    .map_err(|err| peer_error("bind failed", err))?;

    let local = listener
        .local_addr()
        .map_err(|err| peer_error("bind failed", err))?;
    info!(addr = %local, websocket = args.websocket, "listening for remote agents");

    let mut open: Vec<ConnectionHandle> = Vec::new();
    let mut sessions = JoinSet::new();
    let mut accepted = 0usize;

    let stop = stop_requested(None);
    tokio::pin!(stop);

    while args.count.is_none_or(|count| accepted < count) {
        let builder = print_datasource_frames(
            ConnectionBuilder::new().with_config(config.clone()),
            local.to_string(),
            format,
        );
        tokio::select! {
            result = listener.accept(builder) => match result {
                Ok(handle) => {
                    accepted += 1;
                    info!(connection = handle.id(), label = handle.label(), "agent connected");
                    open.push(handle.clone());
                    sessions.spawn(async move {
                        handle.closed().await;
                        print_status(handle.label(), &handle.status(), format);
                    });
                }
                Err(PeerError::Transport(err)) => {
                    warn!(error = %err, "rejected incoming connection");
                }
                Err(err) => return Err(peer_error("accept failed", err)),
            },
            why = &mut stop => {
                info!(reason = why, "closing remote connections");
                for handle in &open {
                    handle.shutdown(Some(why.to_string())).await;
                }
                break;
            }
        }
        open.retain(|handle| !handle.is_closed());
    }

    while sessions.join_next().await.is_some() {}
    Ok(SUCCESS)
}
