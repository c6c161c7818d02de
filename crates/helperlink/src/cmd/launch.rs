use std::time::Duration;

use helperlink_peer::{launch_helper, ConnectionBuilder};
use helperlink_transport::{LaunchSpec, ProcessCallbacks, ProcessTracker};
use tracing::{info, warn};

use crate::cmd::{
    parse_duration, parse_optional_duration, print_datasource_frames, search_paths_or_default,
    stop_requested, LaunchArgs,
};
use crate::exit::{close_code, peer_error, CliResult};
use crate::output::{print_status, OutputFormat};

const REAP_SOFT_DELAY: Duration = Duration::from_millis(500);
const REAP_MAX_DELAY: Duration = Duration::from_secs(3);

pub async fn run(args: LaunchArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.engine.to_config()?;
    let limit = parse_optional_duration(args.duration.as_deref())?;
    let shutdown_timeout = parse_duration(&args.shutdown_timeout)?;

    let spec = LaunchSpec::new(args.binary.clone(), search_paths_or_default(&args.helper_path))
        .with_args(args.args.clone());
    let tracker = ProcessTracker::new();
    let callbacks = ProcessCallbacks::new()
        .on_exit(|pid, status| info!(pid, %status, "helper exited"))
        .on_error(|pid, err| warn!(pid, error = %err, "failed to reap helper"));

    let builder = print_datasource_frames(
        ConnectionBuilder::new().with_config(config),
        args.binary.clone(),
        format,
    );
    let handle = launch_helper(&spec, &tracker, callbacks, builder)
        .map_err(|err| peer_error("launch failed", err))?;
    info!(pid = ?handle.pid(), helper = %args.binary, "helper running");

    let reason = tokio::select! {
        reason = handle.closed() => reason,
        why = stop_requested(limit) => {
            info!(reason = why, "stopping helper");
            match tokio::time::timeout(shutdown_timeout, handle.shutdown(Some(why.to_string()))).await {
                Ok(reason) => reason,
                Err(_) => handle.close("shutdown timed out").await,
            }
        }
    };

    print_status(handle.label(), &handle.status(), format);

    if !tracker
        .ensure_all_killed(REAP_SOFT_DELAY, REAP_MAX_DELAY)
        .await
    {
        warn!(pids = ?tracker.tracked(), "helpers survived SIGKILL");
    }

    Ok(close_code(&reason))
}
