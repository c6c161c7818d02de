use helperlink_frame::messages::{LogMessage, Register};
use helperlink_frame::{Command, Severity};
use helperlink_peer::{connect_tcp, connect_websocket, ConnectionBuilder};
use tracing::info;

use crate::cmd::{parse_optional_duration, print_datasource_frames, stop_requested, ConnectArgs};
use crate::exit::{close_code, peer_error, CliResult};
use crate::output::{print_status, OutputFormat};

fn is_websocket_url(target: &str) -> bool {
    target.starts_with("ws://") || target.starts_with("wss://")
}

pub async fn run(args: ConnectArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.engine.to_config()?;
    let limit = parse_optional_duration(args.duration.as_deref())?;

    let builder = print_datasource_frames(
        ConnectionBuilder::new().with_config(config),
        args.target.clone(),
        format,
    );
    let handle = if is_websocket_url(&args.target) {
        connect_websocket(&args.target, builder).await
    } else {
        connect_tcp(&args.target, builder).await
    }
    .map_err(|err| peer_error("connect failed", err))?;
    info!(connection = handle.id(), target = %args.target, "connected");

    if let Some(subsystem) = &args.register {
        let register = Register {
            subsystem: subsystem.clone(),
        };
        handle
            .send(Command::Register, register.to_fields())
            .map_err(|err| peer_error("register failed", err))?;
    }
    if let Some(text) = &args.message {
        let message = LogMessage {
            severity: Severity::Info,
            text: text.clone(),
        };
        handle
            .send(Command::Message, message.to_fields())
            .map_err(|err| peer_error("message failed", err))?;
    }

    let reason = tokio::select! {
        reason = handle.closed() => reason,
        why = stop_requested(limit) => handle.shutdown(Some(why.to_string())).await,
    };

    print_status(handle.label(), &handle.status(), format);
    Ok(close_code(&reason))
}
