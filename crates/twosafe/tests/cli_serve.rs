#![cfg(all(unix, feature = "cli"))]

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use twosafe::transport::{probe, EndpointState};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/twosafe-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn spawn_server(sock_path: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_twosafe"))
        .arg("--log-level")
        .arg("error")
        .arg("serve")
        .arg("--socket")
        .arg(sock_path)
        .arg("--poll-interval")
        .arg("10ms")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start")
}

fn wait_until_live(sock_path: &Path, timeout: Duration) {
    let start = Instant::now();
    loop {
        if matches!(probe(sock_path), Ok(EndpointState::Live)) {
            return;
        }
        if start.elapsed() >= timeout {
            panic!("server did not come up at {}", sock_path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn wait_for_file(path: &Path, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if path.exists() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    false
}

fn terminate(child: &mut Child) -> std::process::ExitStatus {
    // SAFETY: sending a signal to a child process id we own.
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    assert_eq!(rc, 0, "SIGTERM should be delivered");
    child.wait().expect("server should exit")
}

fn send_raw(sock_path: &Path, payload: &[u8]) {
    let mut stream = UnixStream::connect(sock_path).expect("client should connect");
    stream.write_all(payload).expect("client write");
    stream
        .shutdown(std::net::Shutdown::Write)
        .expect("half close");
}

#[test]
fn send_hash_then_graceful_shutdown_removes_socket() {
    let dir = unique_temp_dir("hash");
    let sock_path = dir.join("2safe.sock");
    let source = dir.join("input.txt");
    std::fs::write(&source, b"The quick brown fox jumps over the lazy dog")
        .expect("source should be writable");

    let mut child = spawn_server(&sock_path);
    wait_until_live(&sock_path, Duration::from_secs(5));

    let output = Command::new(env!("CARGO_BIN_EXE_twosafe"))
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg("--socket")
        .arg(&sock_path)
        .arg("--path")
        .arg(&source)
        .output()
        .expect("send should run");
    assert!(output.status.success());
    let receipt: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("receipt should be json");
    assert_eq!(receipt["verb"], "hash");

    let artifact = dir.join("input.txt.md5.txt");
    assert!(wait_for_file(&artifact, Duration::from_secs(5)));

    let status = terminate(&mut child);
    assert_eq!(status.code(), Some(0));
    assert!(!sock_path.exists(), "socket file must be removed on shutdown");
    assert_eq!(
        std::fs::read(&artifact).expect("artifact should exist"),
        b"9e107d9d372bb6826bd81d3542a419d6"
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn bad_commands_do_not_crash_the_daemon() {
    let dir = unique_temp_dir("bad");
    let sock_path = dir.join("2safe.sock");
    let source = dir.join("after.txt");
    std::fs::write(&source, b"hello world").expect("source should be writable");
    let missing = dir.join("nonexistent");

    let mut child = spawn_server(&sock_path);
    wait_until_live(&sock_path, Duration::from_secs(5));

    send_raw(&sock_path, br#"{"verb":"hash","path":"#);
    send_raw(&sock_path, &[0xff, 0xfe, 0xfd]);
    send_raw(
        &sock_path,
        format!(r#"{{"verb":"unknown","path":"{}"}}"#, source.display()).as_bytes(),
    );
    send_raw(
        &sock_path,
        format!(r#"{{"verb":"hash","path":"{}"}}"#, missing.display()).as_bytes(),
    );
    send_raw(&sock_path, br#"{"verb":"hash","path":""}"#);
    send_raw(
        &sock_path,
        format!(r#"{{"verb":"hash","path":"{}"}}"#, source.display()).as_bytes(),
    );

    let artifact = dir.join("after.txt.md5.txt");
    assert!(wait_for_file(&artifact, Duration::from_secs(5)));
    assert!(!dir.join("nonexistent.md5.txt").exists());
    assert!(matches!(probe(&sock_path), Ok(EndpointState::Live)));

    let status = terminate(&mut child);
    assert_eq!(status.code(), Some(0));
    assert_eq!(
        std::fs::read(&artifact).expect("artifact should exist"),
        b"5eb63bbbe01eeed093cb22bb8f5acdc3"
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn second_instance_fails_while_first_is_live() {
    let dir = unique_temp_dir("live");
    let sock_path = dir.join("2safe.sock");

    let mut first = spawn_server(&sock_path);
    wait_until_live(&sock_path, Duration::from_secs(5));

    let output = Command::new(env!("CARGO_BIN_EXE_twosafe"))
        .arg("serve")
        .arg("--socket")
        .arg(&sock_path)
        .output()
        .expect("second serve should run");
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains(&sock_path.display().to_string()));

    assert!(matches!(probe(&sock_path), Ok(EndpointState::Live)));

    let status = terminate(&mut first);
    assert_eq!(status.code(), Some(0));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn sigterm_with_silent_client_still_removes_socket() {
    let dir = unique_temp_dir("silent");
    let sock_path = dir.join("2safe.sock");

    let mut child = Command::new(env!("CARGO_BIN_EXE_twosafe"))
        .arg("--log-level")
        .arg("error")
        .arg("serve")
        .arg("--socket")
        .arg(&sock_path)
        .arg("--poll-interval")
        .arg("10ms")
        .arg("--shutdown-grace")
        .arg("100ms")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start");
    wait_until_live(&sock_path, Duration::from_secs(5));

    let _silent = UnixStream::connect(&sock_path).expect("client should connect");
    thread::sleep(Duration::from_millis(50));

    let status = terminate(&mut child);
    assert_eq!(status.code(), Some(0));
    assert!(!sock_path.exists(), "socket file must be removed on shutdown");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn restart_after_crash_recovers_stale_socket() {
    let dir = unique_temp_dir("crash");
    let sock_path = dir.join("2safe.sock");

    let mut crashed = spawn_server(&sock_path);
    wait_until_live(&sock_path, Duration::from_secs(5));
    crashed.kill().expect("SIGKILL should be delivered");
    let _ = crashed.wait();
    assert!(matches!(probe(&sock_path), Ok(EndpointState::Stale)));

    let mut restarted = spawn_server(&sock_path);
    wait_until_live(&sock_path, Duration::from_secs(5));

    let status = terminate(&mut restarted);
    assert_eq!(status.code(), Some(0));
    assert!(!sock_path.exists());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unbindable_path_exits_nonzero() {
    let dir = unique_temp_dir("nodir");
    let sock_path = dir.join("missing-dir").join("2safe.sock");

    let output = Command::new(env!("CARGO_BIN_EXE_twosafe"))
        .arg("serve")
        .arg("--socket")
        .arg(&sock_path)
        .output()
        .expect("serve should run");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing-dir"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn doctor_reports_endpoint_state() {
    let dir = unique_temp_dir("doctor");
    let sock_path = dir.join("2safe.sock");

    let output = Command::new(env!("CARGO_BIN_EXE_twosafe"))
        .arg("--format")
        .arg("json")
        .arg("doctor")
        .arg("--socket")
        .arg(&sock_path)
        .output()
        .expect("doctor should run");

    assert!(output.status.success());
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("doctor should emit json");
    assert_eq!(report["overall"], "pass");
    let endpoint = report["checks"]
        .as_array()
        .expect("checks array")
        .iter()
        .find(|c| c["name"] == "endpoint_state")
        .expect("endpoint check present");
    assert_eq!(endpoint["status"], "info");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_twosafe"))
        .arg("version")
        .output()
        .expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("twosafe {}", env!("CARGO_PKG_VERSION"))
    );
}
