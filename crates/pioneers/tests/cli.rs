#![cfg(all(unix, feature = "cli"))]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use pioneers_frame::{decode, encode, ids, ClearScope, IdClass, Message, PacketReader, PACKET_SIZE};

fn pioneers() -> Command {
    Command::new(env!("CARGO_BIN_EXE_pioneers"))
}

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "pioneers-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

/// A sysfs-shaped GPIO tree with every pin already exported and released.
fn fake_gpio(root: &Path, pins: &[u32]) {
    for pin in pins {
        let dir = root.join(format!("gpio{pin}"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("direction"), "in").unwrap();
        std::fs::write(dir.join("value"), "1").unwrap();
    }
}

fn set_pin(root: &Path, pin: u32, high: bool) {
    std::fs::write(
        root.join(format!("gpio{pin}/value")),
        if high { "1" } else { "0" },
    )
    .unwrap();
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> std::process::ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            panic!("process did not exit within {timeout:?}");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn decode_all(bytes: &[u8]) -> Vec<Message> {
    let mut reader = PacketReader::new();
    reader.extend(bytes);
    std::iter::from_fn(|| reader.next_packet())
        .filter_map(|p| decode(&p).ok())
        .collect()
}

#[test]
fn version_prints_package_version() {
    let output = pioneers().arg("version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("pioneers {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn produce_streams_packets_and_reports_device_fault() {
    let dir = unique_temp_dir("produce");
    let output = pioneers()
        .args(["produce", "--name", "imu", "--node", "a", "--device", "sim"])
        .args(["--interval-ms", "5", "--fail-after", "4", "--data-dir"])
        .arg(&dir)
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(10));
    assert_eq!(output.stdout.len() % PACKET_SIZE, 0);
    let messages = decode_all(&output.stdout);
    assert_eq!(messages.len(), 8);
    assert_eq!(messages[0].id, ids::IMU_A_ACC_GYR);
    assert_eq!(messages[1].id, ids::IMU_A_MAG_TIME);
    assert_eq!(messages[2].index, messages[0].index.wrapping_add(1));

    let files: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
    assert!(!files.is_empty(), "backup file should be written");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_delivers_a_command_packet() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let mut child = pioneers()
        .args(["send", &addr, "clear", "video"])
        .spawn()
        .unwrap();

    let (mut stream, _) = listener.accept().unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut bytes = [0u8; PACKET_SIZE];
    stream.read_exact(&mut bytes).unwrap();
    assert!(wait_for_exit(&mut child, Duration::from_secs(5)).success());

    let message = decode_all(&bytes).pop().expect("one packet");
    assert!(ids::is_command(message.id));
    assert_eq!(
        pioneers_frame::Command::parse(&message).unwrap(),
        pioneers_frame::Command::ClearFiles(ClearScope::Video)
    );
}

#[test]
fn send_rejects_unknown_command() {
    let output = pioneers()
        .args(["send", "127.0.0.1:1", "launch"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn send_and_monitor_reach_serial_devices() {
    for args in [
        vec!["send", "/nonexistent/tty-ground", "reboot"],
        vec!["monitor", "/nonexistent/tty-ground", "--count", "1"],
    ] {
        let output = pioneers().args(&args).output().unwrap();
        assert_eq!(output.status.code(), Some(3), "{args:?}");
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("/nonexistent/tty-ground"), "{stderr}");
    }
}

#[test]
fn monitor_prints_decoded_packets_as_json() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let child = pioneers()
        .args(["monitor", &addr, "--count", "2", "--format", "json"])
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();

    let (mut stream, _) = listener.accept().unwrap();
    stream
        .write_all(encode(ids::STATUS_A, 3, b"I:LO").unwrap().as_bytes())
        .unwrap();
    stream
        .write_all(encode(ids::IMU_A_ACC_GYR, 4, &[1; 12]).unwrap().as_bytes())
        .unwrap();

    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("monitor output should be json"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["id_name"], "STATUS_A");
    assert_eq!(lines[0]["payload"], "I:LO");
    assert_eq!(lines[1]["class"], "measurement");
    assert_eq!(lines[1]["index"], 4);
}

#[test]
fn selftest_reports_json_and_passes_on_bench_setup() {
    let dir = unique_temp_dir("selftest");
    let gpio = dir.join("gpio");
    fake_gpio(&gpio, &[21, 20, 16]);
    let config = dir.join("pioneers.json");
    std::fs::write(
        &config,
        serde_json::json!({
            "node": "a",
            "pins": { "sysfs_root": gpio },
            "producers": [{ "name": "imu", "device": { "kind": "sim" } }],
            "storage": {
                "data_dir": dir.join("data"),
                "video_dir": dir.join("video"),
                "log_dir": dir.join("logs"),
            },
        })
        .to_string(),
    )
    .unwrap();

    let output = pioneers()
        .args(["selftest", "--format", "json", "--config"])
        .arg(&config)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["node"], "a");
    assert_eq!(report["overall"], "warn");
    let names: Vec<&str> = report["checks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    for expected in ["data", "LO", "SODS", "link", "producer:imu"] {
        assert!(names.contains(&expected), "missing check {expected}");
    }
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn selftest_fails_without_gpio() {
    let dir = unique_temp_dir("selftest-fail");
    let output = pioneers()
        .args(["selftest", "--format", "raw", "--gpio-root"])
        .arg(dir.join("missing"))
        .arg("--data-dir")
        .arg(dir.join("data"))
        .current_dir(&dir)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(30));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "fail");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn malformed_config_is_rejected() {
    let dir = unique_temp_dir("bad-config");
    let config = dir.join("pioneers.json");
    std::fs::write(&config, r#"{ "node": "c" }"#).unwrap();
    let output = pioneers()
        .args(["run", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(78));
    let _ = std::fs::remove_dir_all(&dir);
}

/// Reads packets from the supervisor until `done` is satisfied.
fn read_until(
    stream: &mut TcpStream,
    reader: &mut PacketReader,
    seen: &mut Vec<Message>,
    timeout: Duration,
    done: impl Fn(&[Message]) -> bool,
) {
    let start = Instant::now();
    let mut chunk = [0u8; 256];
    while !done(seen) {
        assert!(start.elapsed() < timeout, "timed out; saw {} packets", seen.len());
        match stream.read(&mut chunk) {
            Ok(0) => panic!("supervisor closed the link"),
            Ok(n) => reader.extend(&chunk[..n]),
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(err) => panic!("read failed: {err}"),
        }
        while let Some(packet) = reader.next_packet() {
            if let Ok(message) = decode(&packet) {
                seen.push(message);
            }
        }
    }
}

fn has_status(seen: &[Message], text: &str) -> bool {
    seen.iter()
        .any(|m| IdClass::of(m.id) == IdClass::Status && m.text() == text)
}

#[test]
fn run_follows_event_lines_and_forwards_producer_packets() {
    let dir = unique_temp_dir("run");
    let gpio = dir.join("gpio");
    fake_gpio(&gpio, &[21, 20, 16, 23]);
    let port = free_port();
    let config = dir.join("pioneers.json");
    std::fs::write(
        &config,
        serde_json::json!({
            "node": "a",
            "pins": { "sysfs_root": gpio },
            "link": { "kind": "tcp-server", "address": format!("127.0.0.1:{port}") },
            "producers": [{ "name": "imu", "device": { "kind": "sim" }, "interval_ms": 20 }],
            "camera": { "command": null },
            "timing": { "stop_interval_ms": 200 },
            "storage": {
                "data_dir": dir.join("data"),
                "video_dir": dir.join("video"),
                "log_dir": dir.join("logs"),
            },
        })
        .to_string(),
    )
    .unwrap();

    let mut child = pioneers()
        .args(["run", "--config"])
        .arg(&config)
        .stdout(Stdio::null())
        .spawn()
        .unwrap();

    let start = Instant::now();
    let mut stream = loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => break stream,
            Err(_) if start.elapsed() < Duration::from_secs(10) => {
                thread::sleep(Duration::from_millis(50))
            }
            Err(err) => {
                let _ = child.kill();
                panic!("supervisor never listened: {err}");
            }
        }
    };
    stream
        .set_read_timeout(Some(Duration::from_millis(100)))
        .unwrap();
    let mut reader = PacketReader::new();
    let mut seen = Vec::new();
    let timeout = Duration::from_secs(10);

    // Give the supervisor a few ticks to accept us before the first event.
    thread::sleep(Duration::from_millis(300));
    set_pin(&gpio, 21, false);
    read_until(&mut stream, &mut reader, &mut seen, timeout, |s| {
        has_status(s, "I:LO")
    });

    set_pin(&gpio, 20, false);
    read_until(&mut stream, &mut reader, &mut seen, timeout, |s| {
        has_status(s, "I:SOE") && s.iter().filter(|m| m.id == ids::IMU_A_ACC_GYR).count() >= 3
    });

    let status = Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());
    assert!(wait_for_exit(&mut child, Duration::from_secs(10)).success());

    let burn = std::fs::read_to_string(gpio.join("gpio23/value")).unwrap();
    assert_eq!(burn.trim(), "0");
    assert!(std::fs::read_dir(dir.join("data")).unwrap().count() > 0);
    let _ = std::fs::remove_dir_all(&dir);
}
