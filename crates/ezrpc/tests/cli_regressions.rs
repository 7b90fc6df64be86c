#![cfg(all(unix, feature = "cli"))]

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/ezrpc-reg-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while UnixStream::connect(path).is_err() {
        if start.elapsed() >= timeout {
            panic!("server socket did not come up");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn call(endpoint: &str, method: &str, params: &str) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ezrpc"))
        .args(["--log-level", "error", "--format", "json", "call"])
        .arg(endpoint)
        .arg(method)
        .arg("--params")
        .arg(params)
        .output()
        .expect("call should run")
}

#[test]
fn validate_rejects_bad_params_and_keeps_serving() {
    let dir = unique_temp_dir("validate");
    let sock_path = dir.join("serve.sock");
    let schema_dir = dir.join("schemas");
    std::fs::create_dir_all(&schema_dir).expect("schema dir should be creatable");
    std::fs::write(
        schema_dir.join("sum.schema.json"),
        r#"{
            "type": "array",
            "items": { "type": "integer" }
        }"#,
    )
    .expect("schema file should be writable");

    let endpoint = format!("unix:{}", sock_path.display());
    let mut child = Command::new(env!("CARGO_BIN_EXE_ezrpc"))
        .args(["--log-level", "error", "serve"])
        .arg(&endpoint)
        .arg("--validate")
        .arg(&schema_dir)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("serve command should start");
    wait_for_socket(&sock_path, Duration::from_secs(3));

    let rejected = call(&endpoint, "sum", r#"{"nope":true}"#);
    assert_eq!(rejected.status.code(), Some(70));
    let out: Value = serde_json::from_slice(&rejected.stdout).expect("stdout should be json");
    assert_eq!(out["error"]["code"], json!(-32602));

    let accepted = call(&endpoint, "sum", "[4,5]");
    assert!(accepted.status.success());
    let out: Value = serde_json::from_slice(&accepted.stdout).expect("stdout should be json");
    assert_eq!(out["result"], json!(9));

    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invalid_params_json_exits_60() {
    let output = call("unix:/tmp/ezrpc-never-used.sock", "echo", "{not json");
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn invalid_endpoint_exits_64() {
    let output = call("definitely not an endpoint", "echo", "1");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn invalid_timeout_exits_64() {
    let output = Command::new(env!("CARGO_BIN_EXE_ezrpc"))
        .args(["info", "127.0.0.1:1", "--timeout", "soon"])
        .output()
        .expect("info should run");
    assert_eq!(output.status.code(), Some(64));
}
