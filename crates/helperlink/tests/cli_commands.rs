#![cfg(feature = "cli")]

use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use helperlink::frame::messages::Register;
use helperlink::frame::{Command as FrameCommand, FieldSet, Frame, Generation};
use helperlink::peer::{connect_tcp, ConnectionBuilder};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/hlcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn helperlink(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_helperlink"))
        .args(["--log-level", "error"])
        .args(args)
        .env_remove("HELPERLINK_HELPER_PATH")
        .output()
        .expect("helperlink should run")
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .expect("ephemeral port")
        .port()
}

#[test]
fn version_prints_package_version() {
    let output = helperlink(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("helperlink {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn decode_prints_frames_as_json() {
    let register = Register {
        subsystem: "rtlamr".to_string(),
    };
    let frame = Frame::new(Generation::V3, FrameCommand::Register, 9, register.to_fields());
    let hex = to_hex(&frame.encode().unwrap());

    let output = helperlink(&["--format", "json", "decode", &hex]);
    assert!(output.status.success());
    let line = String::from_utf8_lossy(&output.stdout);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("json frame");
    assert_eq!(value["command"], "REGISTER");
    assert_eq!(value["sequence"], 9);
    assert_eq!(value["generation"], 3);
    assert_eq!(value["fields"]["1"], "rtlamr");
}

#[test]
fn decode_reads_frames_from_file() {
    let dir = unique_temp_dir("decode");
    let path = dir.join("capture.bin");
    let mut bytes = Frame::new(Generation::V3, FrameCommand::Ping, 1, FieldSet::new())
        .encode()
        .unwrap()
        .to_vec();
    bytes.extend_from_slice(
        &Frame::new(Generation::V3, FrameCommand::Pong, 1, FieldSet::new())
            .encode()
            .unwrap(),
    );
    std::fs::write(&path, bytes).unwrap();

    let output = helperlink(&["--format", "pretty", "decode", "--file", path.to_str().unwrap()]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 2);
    assert!(stdout.contains("command=PING"));
    assert!(stdout.contains("command=PONG"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn decode_garbage_returns_60() {
    let output = helperlink(&["decode", "0011223344556677"]);
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("bad frame signature"));
}

#[test]
fn launch_rejects_path_like_helper_names_with_64() {
    let output = helperlink(&["launch", "../escape", "--helper-path", "/usr/bin"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn launch_missing_helper_returns_1() {
    let dir = unique_temp_dir("missing");
    let output = helperlink(&[
        "launch",
        "no-such-helper",
        "--helper-path",
        dir.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn launch_helper_that_dies_reports_transport_failure() {
    let output = helperlink(&[
        "--format",
        "json",
        "launch",
        "false",
        "--helper-path",
        "/bin:/usr/bin",
        "--duration",
        "10s",
    ]);
    assert_eq!(output.status.code(), Some(3));
    let line = String::from_utf8_lossy(&output.stdout);
    let status: serde_json::Value = serde_json::from_str(line.trim()).expect("json status");
    assert_eq!(status["failed"], true);
}

#[test]
fn doctor_passes_with_existing_search_path() {
    let dir = unique_temp_dir("doctor");
    let output = helperlink(&[
        "--format",
        "json",
        "doctor",
        "--helper-path",
        dir.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"overall\":\"pass\""));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn doctor_fails_for_unresolvable_helper() {
    let dir = unique_temp_dir("doctor-helper");
    let output = helperlink(&[
        "--format",
        "json",
        "doctor",
        "--helper",
        "no-such-helper",
        "--helper-path",
        dir.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(30));
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn listen_accepts_agent_and_reports_its_close() {
    let addr = format!("127.0.0.1:{}", free_port());
    let child = Command::new(env!("CARGO_BIN_EXE_helperlink"))
        .args(["--log-level", "error", "--format", "json", "listen", &addr, "--count", "1"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("listen should start");

    let handle = {
        let mut attempts = 0;
        loop {
            match connect_tcp(&addr, ConnectionBuilder::new()).await {
                Ok(handle) => break handle,
                Err(err) => {
                    attempts += 1;
                    assert!(attempts < 200, "listener never came up: {err}");
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
            }
        }
    };

    let register = Register {
        subsystem: "remote-rtl433".to_string(),
    };
    handle
        .send(FrameCommand::Register, register.to_fields())
        .unwrap();
    let mut watch = handle.watch();
    tokio::time::timeout(
        Duration::from_secs(5),
        watch.wait_for(|status| status.generation_confirmed),
    )
    .await
    .unwrap()
    .unwrap();
    handle.shutdown(Some("bye".to_string())).await;

    let output = tokio::task::spawn_blocking(move || child.wait_with_output())
        .await
        .unwrap()
        .unwrap();
    assert!(output.status.success());
    let line = String::from_utf8_lossy(&output.stdout);
    let status: serde_json::Value = serde_json::from_str(line.trim()).expect("json status");
    assert_eq!(status["subsystem"], "remote-rtl433");
    assert_eq!(status["closed"], "remote shutdown: bye");
    assert_eq!(status["failed"], false);
}
