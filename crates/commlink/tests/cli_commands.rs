#![cfg(all(unix, feature = "cli"))]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn commlink() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_commlink"));
    command.arg("--log-level").arg("error");
    command
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("ephemeral port should be available")
}

fn wait_for_connect(port: u16, timeout: Duration) -> TcpStream {
    let start = Instant::now();
    loop {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)) {
            return stream;
        }
        if start.elapsed() >= timeout {
            panic!("connect timeout");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn stop(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn version_prints_package_version() {
    let output = commlink()
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("commlink {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn server_echoes_frames_back_to_sender() {
    let port = free_port();
    let child = commlink()
        .arg("--format")
        .arg("json")
        .arg("server")
        .arg(port.to_string())
        .arg("--bind")
        .arg("127.0.0.1")
        .arg("--echo")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("server should start");

    let mut peer = wait_for_connect(port, Duration::from_secs(3));
    peer.set_read_timeout(Some(Duration::from_secs(3)))
        .expect("timeout should apply");
    peer.write_all(&[0x01, 0x02, 0x00]).expect("frame should send");

    let mut echoed = [0u8; 3];
    peer.read_exact(&mut echoed).expect("echo should arrive");
    assert_eq!(echoed, [0x01, 0x02, 0x00]);

    stop(child);
}

#[test]
fn server_prints_frames_as_json_and_exits_after_count() {
    let port = free_port();
    let child = commlink()
        .arg("--format")
        .arg("json")
        .arg("server")
        .arg(port.to_string())
        .arg("--bind")
        .arg("127.0.0.1")
        .arg("--count")
        .arg("1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("server should start");

    let mut peer = wait_for_connect(port, Duration::from_secs(3));
    peer.write_all(b"PING\x00").expect("frame should send");

    let output = child.wait_with_output().expect("server should exit");
    assert!(output.status.success());
    let line = String::from_utf8_lossy(&output.stdout);
    let value: serde_json::Value =
        serde_json::from_str(line.trim()).expect("output should be json");
    assert_eq!(value["size"], 5);
    assert_eq!(value["hex"], "50 49 4E 47 00");
    assert_eq!(value["text"], "PING");
}

#[test]
fn client_sync_exchange_prints_reply() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("device should bind");
    let addr = listener.local_addr().expect("device addr");
    let device = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("client should connect");
        let mut request = [0u8; 3];
        stream.read_exact(&mut request).expect("request should arrive");
        assert_eq!(request, [0x01, 0x03, 0x00]);
        stream.write_all(&[0xAA, 0x00]).expect("reply should send");
        thread::sleep(Duration::from_millis(200));
    });

    let output = commlink()
        .arg("--format")
        .arg("pretty")
        .arg("client")
        .arg(addr.to_string())
        .arg("--no-probe")
        .arg("--hex")
        .arg("01 03 00")
        .arg("--sync")
        .arg("--timeout")
        .arg("2s")
        .output()
        .expect("client should run");

    device.join().expect("device should finish");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("payload=AA 00"), "stdout: {stdout}");
}

#[test]
fn client_without_remote_times_out_with_124() {
    let port = free_port();
    let output = commlink()
        .arg("client")
        .arg(format!("127.0.0.1:{port}"))
        .arg("--no-probe")
        .arg("--connect-timeout")
        .arg("300ms")
        .arg("--reconnect-interval")
        .arg("50ms")
        .output()
        .expect("client should run");

    assert_eq!(output.status.code(), Some(124));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not connected"));
}

#[test]
fn invalid_hex_payload_is_usage_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("device should bind");
    let addr = listener.local_addr().expect("device addr");

    let output = commlink()
        .arg("client")
        .arg(addr.to_string())
        .arg("--no-probe")
        .arg("--hex")
        .arg("0g")
        .output()
        .expect("client should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn server_port_in_use_fails_with_transport_error() {
    let holder = TcpListener::bind("127.0.0.1:0").expect("port holder should bind");
    let port = holder.local_addr().expect("holder addr").port();

    let output = commlink()
        .arg("server")
        .arg(port.to_string())
        .arg("--bind")
        .arg("127.0.0.1")
        .output()
        .expect("server should run");

    assert_eq!(output.status.code(), Some(3));
}
