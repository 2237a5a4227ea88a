use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command};
use std::thread;
use std::time::Duration;

const CONFIG: &str = r#"{ "fans": [ {
    "inventory": "fan0",
    "deviation": 10,
    "num_sensors_nonfunc_for_fan_nonfunc": 1,
    "sensors": [ { "name": "fan0_0", "method": "timebased", "timeout": 1 } ]
} ] }"#;

struct MonitorProcess {
    child: Child,
    addr: String,
    _dir: tempfile::TempDir,
}

impl MonitorProcess {
    fn start(extra_args: &[&str]) -> Self {
        let bin_path = env!("CARGO_BIN_EXE_fan-monitor");

        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = dir.path().join("fans.json");
        std::fs::write(&config_path, CONFIG).expect("Failed to write config");

        let listener = TcpListener::bind("127.0.0.1:0")
            .expect("Failed to bind ephemeral port for integration test");
        let addr = listener
            .local_addr()
            .expect("Failed to resolve bound address");
        let bind_addr = format!("127.0.0.1:{}", addr.port());
        drop(listener);

        let child = Command::new(bin_path)
            .arg("--config")
            .arg(&config_path)
            .args(["--bind", &bind_addr, "--run-seconds", "30"])
            .args(extra_args)
            .spawn()
            .expect("Failed to start fan-monitor");

        // Loop until port is open (up to 5s)
        let start = std::time::Instant::now();
        while start.elapsed().as_secs() < 5 {
            if TcpStream::connect(&bind_addr).is_ok() {
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }

        Self {
            child,
            addr: bind_addr,
            _dir: dir,
        }
    }

    fn connect(&self) -> (TcpStream, BufReader<TcpStream>) {
        let stream = TcpStream::connect(&self.addr).expect("Failed to connect to feed");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("Failed to set read timeout");
        let reader = BufReader::new(stream.try_clone().expect("Failed to clone stream"));
        (stream, reader)
    }
}

impl Drop for MonitorProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn status(stream: &mut TcpStream, reader: &mut BufReader<TcpStream>) -> serde_json::Value {
    stream
        .write_all(b"{\"type\":\"status\"}\n")
        .expect("Failed to send status request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("Failed to read status");
    serde_json::from_str(&line).expect("Status reply should be JSON")
}

#[test]
fn test_slow_fan_marked_nonfunctional() {
    let monitor = MonitorProcess::start(&["--power-on"]);
    let (mut stream, mut reader) = monitor.connect();

    stream
        .write_all(
            concat!(
                "{\"type\":\"presence\",\"fan\":\"fan0\",\"present\":true}\n",
                "{\"type\":\"target\",\"sensor\":\"fan0_0\",\"value\":4000}\n",
                "{\"type\":\"tach\",\"sensor\":\"fan0_0\",\"value\":4100}\n",
            )
            .as_bytes(),
        )
        .expect("Failed to send readings");

    let reply = status(&mut stream, &mut reader);
    assert_eq!(reply["type"], "status");
    assert_eq!(reply["power_on"], true);
    assert_eq!(reply["fans"][0]["functional"], true);

    stream
        .write_all(b"{\"type\":\"tach\",\"sensor\":\"fan0_0\",\"value\":1000}\n")
        .expect("Failed to send slow reading");
    thread::sleep(Duration::from_millis(1500));

    let reply = status(&mut stream, &mut reader);
    assert_eq!(reply["fans"][0]["functional"], false);
    assert_eq!(reply["fans"][0]["sensors"][0]["functional"], false);
}

#[test]
fn test_malformed_lines_keep_connection() {
    let monitor = MonitorProcess::start(&[]);
    let (mut stream, mut reader) = monitor.connect();

    stream
        .write_all(b"garbage\n{\"type\":\"unknown\"}\n")
        .expect("Failed to send garbage");

    let reply = status(&mut stream, &mut reader);
    assert_eq!(reply["power_on"], false);
    assert_eq!(reply["fans"][0]["name"], "fan0");
    assert_eq!(reply["fans"][0]["monitor_ready"], false);
}

#[test]
fn test_power_change_is_audited() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let audit = dir.path().join("audit.jsonl");
    let audit_arg = audit.to_string_lossy().to_string();
    let monitor = MonitorProcess::start(&["--audit-log", &audit_arg]);
    let (mut stream, mut reader) = monitor.connect();

    stream
        .write_all(b"{\"type\":\"power\",\"on\":true}\n")
        .expect("Failed to send power event");
    let reply = status(&mut stream, &mut reader);
    assert_eq!(reply["power_on"], true);

    let content = std::fs::read_to_string(&audit).expect("Audit log should exist");
    let events: Vec<String> = content
        .lines()
        .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
        .filter_map(|v| v["event_type"].as_str().map(str::to_string))
        .collect();
    assert!(events.iter().any(|e| e == "system_start"));
    assert!(events.iter().any(|e| e == "power_change"));
}
