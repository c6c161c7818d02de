use std::path::PathBuf;

use helperlink_frame::{Generation, MAX_FRAME_SIZE, V2_HEADER_SIZE, V3_HEADER_SIZE};
use helperlink_transport::{resolve_binary, Credentials, TcpAcceptor};
use serde::Serialize;

use crate::cmd::{search_paths_or_default, DoctorArgs};
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub async fn run(args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let search_paths = search_paths_or_default(&args.helper_path);
    let creds = Credentials::current();

    let checks = vec![
        search_path_check(&search_paths),
        helper_check(args.helper.as_deref(), &search_paths, &creds),
        loopback_listener_check().await,
        protocol_check(),
        compiled_features_check(),
    ];

    let has_fail = checks.iter().any(|c| c.status == CheckStatus::Fail);
    let output = DoctorOutput {
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("helperlink doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<20} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

fn search_path_check(paths: &[PathBuf]) -> CheckResult {
    let (present, missing): (Vec<&PathBuf>, Vec<&PathBuf>) =
        paths.iter().partition(|path| path.is_dir());
    let list = |paths: &[&PathBuf]| {
        paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":")
    };

    if present.is_empty() {
        CheckResult::new(
            "helper_search_path",
            CheckStatus::Fail,
            format!("no search directory exists ({})", list(&missing)),
        )
    } else if missing.is_empty() {
        CheckResult::new("helper_search_path", CheckStatus::Pass, list(&present))
    } else {
        CheckResult::new(
            "helper_search_path",
            CheckStatus::Warn,
            format!("{} (missing: {})", list(&present), list(&missing)),
        )
    }
}

fn helper_check(helper: Option<&str>, paths: &[PathBuf], creds: &Credentials) -> CheckResult {
    let Some(helper) = helper else {
        return CheckResult::new("helper_binary", CheckStatus::Skip, "no --helper given");
    };
    match resolve_binary(helper, paths, creds) {
        Ok(path) => CheckResult::new(
            "helper_binary",
            CheckStatus::Pass,
            format!("{} is executable", path.display()),
        ),
        Err(err) => CheckResult::new("helper_binary", CheckStatus::Fail, err.to_string()),
    }
}

async fn loopback_listener_check() -> CheckResult {
    match TcpAcceptor::bind("127.0.0.1:0").await {
        Ok(acceptor) => {
            let detail = acceptor
                .local_addr()
                .map(|addr| format!("bound {addr}"))
                .unwrap_or_else(|_| "bound".to_string());
            CheckResult::new("loopback_listener", CheckStatus::Pass, detail)
        }
        Err(err) => CheckResult::new("loopback_listener", CheckStatus::Fail, err.to_string()),
    }
}

fn protocol_check() -> CheckResult {
    let mut generations = vec![format!("v3 (header {V3_HEADER_SIZE} B)")];
    if Generation::V2.is_supported() {
        generations.push(format!("v2 (header {V2_HEADER_SIZE} B)"));
    }
    CheckResult::new(
        "protocol",
        CheckStatus::Info,
        format!("{}; max frame {MAX_FRAME_SIZE} B", generations.join(", ")),
    )
}

fn compiled_features_check() -> CheckResult {
    let mut features = Vec::new();
    if cfg!(feature = "v2") {
        features.push("v2");
    }
    if cfg!(feature = "cli") {
        features.push("cli");
    }

    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}
