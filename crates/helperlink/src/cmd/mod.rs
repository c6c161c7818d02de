use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use helperlink_frame::{Command as FrameCommand, FrameConfig, MAX_FRAME_SIZE};
use helperlink_peer::{ConnectionBuilder, ConnectionConfig, KeepaliveConfig};
use tokio::sync::mpsc;

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::{print_frame, OutputFormat};

pub mod connect;
pub mod decode;
pub mod doctor;
pub mod launch;
pub mod listen;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch a helper binary and run it until it exits or Ctrl-C.
    Launch(LaunchArgs),
    /// Accept remote agents over TCP or WebSocket.
    Listen(ListenArgs),
    /// Connect to a remote peer over TCP or WebSocket.
    Connect(ConnectArgs),
    /// Decode captured frames and print them.
    Decode(DecodeArgs),
    /// Run helper environment health checks.
    Doctor(DoctorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Launch(args) => runtime()?.block_on(launch::run(args, format)),
        Command::Listen(args) => runtime()?.block_on(listen::run(args, format)),
        Command::Connect(args) => runtime()?.block_on(connect::run(args, format)),
        Command::Doctor(args) => runtime()?.block_on(doctor::run(args, format)),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))
}

/// Connection engine tuning shared by every command that opens a connection.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Keepalive ping interval (e.g. 1s, 500ms).
    #[arg(long, env = "HELPERLINK_KEEPALIVE_INTERVAL", default_value = "1s")]
    pub keepalive_interval: String,
    /// Missed intervals before the peer is declared dead.
    #[arg(long, env = "HELPERLINK_KEEPALIVE_MISSES", default_value_t = 5)]
    pub keepalive_misses: u32,
    /// Largest accepted frame in bytes.
    #[arg(long, env = "HELPERLINK_MAX_FRAME_SIZE", default_value_t = MAX_FRAME_SIZE)]
    pub max_frame_size: usize,
    /// Only speak the newest generation; never probe with an older ping.
    #[arg(long)]
    pub no_probe: bool,
}

impl EngineArgs {
    pub fn to_config(&self) -> CliResult<ConnectionConfig> {
        if self.max_frame_size == 0 || self.max_frame_size > MAX_FRAME_SIZE {
            return Err(CliError::new(
                USAGE,
                format!("max frame size must be in 1..={MAX_FRAME_SIZE}"),
            ));
        }
        let keepalive = KeepaliveConfig::default()
            .with_interval(parse_duration(&self.keepalive_interval)?)
            .with_max_missed(self.keepalive_misses);
        Ok(ConnectionConfig::default()
            .with_frame(FrameConfig::default().with_max_frame_size(self.max_frame_size))
            .with_keepalive(keepalive)
            .with_probe_older_generation(!self.no_probe))
    }
}

#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// Helper binary name, resolved against the helper search path.
    pub binary: String,
    /// Extra arguments passed to the helper after the descriptor flags.
    #[arg(last = true)]
    pub args: Vec<String>,
    /// Directories searched for the helper (colon-separated).
    #[arg(long, env = "HELPERLINK_HELPER_PATH", value_delimiter = ':')]
    pub helper_path: Vec<PathBuf>,
    /// Stop the helper after this long (e.g. 10s).
    #[arg(long)]
    pub duration: Option<String>,
    /// How long a graceful shutdown may take before the helper is closed.
    #[arg(long, default_value = "2s")]
    pub shutdown_timeout: String,
    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to bind (e.g. 127.0.0.1:3501).
    pub addr: String,
    /// Expect WebSocket clients instead of raw TCP agents.
    #[arg(long)]
    pub websocket: bool,
    /// Stop accepting after N connections and exit once they close.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// `host:port` for TCP, or a `ws://` URL.
    pub target: String,
    /// Announce this subsystem with a REGISTER frame.
    #[arg(long)]
    pub register: Option<String>,
    /// Send an informational MESSAGE frame after connecting.
    #[arg(long)]
    pub message: Option<String>,
    /// Disconnect after this long (e.g. 5s).
    #[arg(long)]
    pub duration: Option<String>,
    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Hex-encoded frame bytes (whitespace ignored).
    #[arg(conflicts_with = "file", required_unless_present = "file")]
    pub hex: Option<String>,
    /// Read raw frame bytes from a file.
    #[arg(long, conflicts_with = "hex")]
    pub file: Option<PathBuf>,
    /// Largest accepted frame in bytes.
    #[arg(long, default_value_t = MAX_FRAME_SIZE)]
    pub max_frame_size: usize,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {
    /// Helper to resolve against the search path.
    #[arg(long)]
    pub helper: Option<String>,
    /// Directories searched for helpers (colon-separated).
    #[arg(long, env = "HELPERLINK_HELPER_PATH", value_delimiter = ':')]
    pub helper_path: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Search path used when none is configured: next to this binary, then the
/// usual install prefixes.
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
    {
        paths.push(dir);
    }
    paths.push(PathBuf::from("/usr/local/bin"));
    paths.push(PathBuf::from("/usr/bin"));
    paths
}

pub fn search_paths_or_default(configured: &[PathBuf]) -> Vec<PathBuf> {
    if configured.is_empty() {
        default_search_paths()
    } else {
        configured.to_vec()
    }
}

fn is_datasource(command: FrameCommand) -> bool {
    (10..=19).contains(&command.code())
}

/// Route datasource frames to stdout instead of rejecting them as unknown.
///
/// The printer task ends when the connection drops its routes.
pub fn print_datasource_frames(
    builder: ConnectionBuilder,
    peer: String,
    format: OutputFormat,
) -> ConnectionBuilder {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let builder = FrameCommand::ALL
        .iter()
        .copied()
        .filter(|command| is_datasource(*command))
        .fold(builder, |builder, command| builder.forward(command, tx.clone()));
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            print_frame(&frame, &peer, format);
        }
    });
    builder
}

/// Resolves when the operator presses Ctrl-C or `limit` elapses.
pub async fn stop_requested(limit: Option<Duration>) -> &'static str {
    let limit = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::warn!(error = %err, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            "operator interrupt"
        }
        _ = limit => "duration elapsed",
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub fn parse_optional_duration(input: Option<&str>) -> CliResult<Option<Duration>> {
    input.map(parse_duration).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn engine_args_build_connection_config() {
        let args = EngineArgs {
            keepalive_interval: "250ms".to_string(),
            keepalive_misses: 3,
            max_frame_size: 4096,
            no_probe: true,
        };
        let config = args.to_config().unwrap();
        assert_eq!(config.keepalive.timeout(), Duration::from_millis(750));
        assert_eq!(config.frame.max_frame_size, 4096);
        assert!(!config.probe_older_generation);
    }

    #[test]
    fn oversized_frame_limit_is_a_usage_error() {
        let args = EngineArgs {
            keepalive_interval: "1s".to_string(),
            keepalive_misses: 5,
            max_frame_size: MAX_FRAME_SIZE + 1,
            no_probe: false,
        };
        assert_eq!(args.to_config().unwrap_err().code, USAGE);
    }

    #[test]
    fn offline_commands_run_without_a_runtime() {
        let command = Command::Version(VersionArgs { extended: false });
        assert_eq!(run(command, OutputFormat::Raw).unwrap(), crate::exit::SUCCESS);

        let command = Command::Decode(DecodeArgs {
            hex: Some("00".to_string()),
            file: None,
            max_frame_size: MAX_FRAME_SIZE,
        });
        assert_eq!(run(command, OutputFormat::Raw).unwrap_err().code, crate::exit::DATA_INVALID);
    }

    #[test]
    fn datasource_commands_are_the_kds_range() {
        assert!(is_datasource(FrameCommand::OpenSource));
        assert!(is_datasource(FrameCommand::DataReport));
        assert!(!is_datasource(FrameCommand::Ping));
        assert!(!is_datasource(FrameCommand::EventRegister));
    }
}
