//! Runs the `node-emulator` binary the way a supervisor would and checks its exit codes.

use std::{
    fs::{create_dir, read_to_string, write},
    net::{SocketAddr, TcpListener, TcpStream},
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use serde_json::{Value, json};
use temp_dir::TempDir;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const EXIT_TIMEOUT: Duration = Duration::from_secs(15);

struct Node {
    temp_dir: TempDir,
}

impl Node {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        create_dir(temp_dir.path().join("data")).unwrap();
        create_dir(temp_dir.path().join("storage")).unwrap();
        write(temp_dir.path().join("config.json"), r#"{"skaleConfig": {}}"#).unwrap();
        Self { temp_dir }
    }

    fn data_file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join("data").join(name)
    }

    fn command(&self, fault_profile: &str) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_node-emulator"));
        command
            .arg("--db-path")
            .arg(self.temp_dir.path().join("data"))
            .arg("--config")
            .arg(self.temp_dir.path().join("config.json"))
            .arg("--fault-profile")
            .arg(fault_profile)
            .env("DATA_DIR", self.temp_dir.path().join("storage"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }

    fn run(&self, fault_profile: &str, extra_args: &[&str]) -> ExitStatus {
        self.command(fault_profile).args(extra_args).status().unwrap()
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn wait_for_listening(child: &mut Child, port: u16) {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let started = Instant::now();
    while TcpStream::connect(address).is_err() {
        assert!(
            child.try_wait().unwrap().is_none(),
            "node exited before listening"
        );
        assert!(started.elapsed() < STARTUP_TIMEOUT, "node never listened");
        thread::sleep(Duration::from_millis(50));
    }
}

fn wait_for_exit(child: &mut Child) -> ExitStatus {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if started.elapsed() > EXIT_TIMEOUT {
            let _ = child.kill();
            panic!("node did not exit in time");
        }
        thread::sleep(Duration::from_millis(50));
    }
}

fn terminate(child: &Child, signal: Signal) {
    kill(Pid::from_raw(child.id() as i32), signal).unwrap();
}

/// Serves with the given fault profile, sends `signal` and returns the exit status together with
/// the time it took to exit after the signal.
fn serve_then_signal(fault_profile: &str, signal: Signal) -> (ExitStatus, Duration) {
    let node = Node::new();
    let port = free_port();
    let mut child = node
        .command(fault_profile)
        .arg("--http-port")
        .arg(port.to_string())
        .spawn()
        .unwrap();
    wait_for_listening(&mut child, port);

    let signalled = Instant::now();
    terminate(&child, signal);
    let status = wait_for_exit(&mut child);
    (status, signalled.elapsed())
}

#[test]
fn corrupting_work_failure_is_replayed_by_the_next_start() {
    // Arrange
    let node = Node::new();

    // Act
    let first = node.run("work-failure=200,db-corruption", &[]);
    write(node.temp_dir.path().join("config.json"), "{ broken").unwrap();
    let second = node.run("none", &[]);

    // Assert
    assert_eq!(first.code(), Some(200));
    assert_eq!(read_to_string(node.data_file("corrupted_db.txt")).unwrap(), "200");
    assert_eq!(second.code(), Some(200));
}

#[test]
fn download_failure_leaves_only_a_corrupted_snapshot() {
    // Arrange
    let node = Node::new();

    // Act
    let status = node.run("download-failure", &["--download-snapshot", "unused"]);

    // Assert
    assert_eq!(status.code(), Some(1));
    assert!(node.data_file("corrupted_snapshot.txt").is_file());
    assert!(!node.data_file("snapshot.txt").exists());
}

#[test]
fn unreadable_config_is_a_soft_failure() {
    // Arrange
    let node = Node::new();
    write(node.temp_dir.path().join("config.json"), "not json at all").unwrap();

    // Act
    let status = node.run("none", &[]);

    // Assert
    assert_eq!(status.code(), Some(0));
    assert!(!node.data_file("working.txt").exists());
}

#[test]
fn unknown_arguments_are_tolerated() {
    // Arrange
    let node = Node::new();

    // Act
    let status = node.run("none", &["--ipcpath", "/tmp/node.ipc", "--web3-trace"]);

    // Assert
    assert_eq!(status.code(), Some(0));
    assert!(node.data_file("working.txt").is_file());
}

#[test]
fn termination_signals_exit_cleanly() {
    for signal in [Signal::SIGTERM, Signal::SIGINT, Signal::SIGHUP] {
        // Act
        let (status, elapsed) = serve_then_signal("none", signal);

        // Assert
        assert_eq!(status.code(), Some(0), "{signal}");
        assert!(elapsed < Duration::from_secs(3), "{signal}");
    }
}

#[test]
fn faulty_termination_on_sigterm_hangs_then_exits_with_14() {
    // Act
    let (status, elapsed) = serve_then_signal("termination-failure=14", Signal::SIGTERM);

    // Assert
    assert_eq!(status.code(), Some(14));
    assert!(elapsed >= Duration::from_secs(4));
}

#[test]
fn faulty_termination_on_sigint_hangs_then_exits_with_14() {
    // Act
    let (status, elapsed) = serve_then_signal("termination-failure=14", Signal::SIGINT);

    // Assert
    assert_eq!(status.code(), Some(14));
    assert!(elapsed >= Duration::from_secs(4));
}

#[test]
fn faulty_termination_on_sighup_hangs_then_exits_with_14() {
    // Act
    let (status, elapsed) = serve_then_signal("termination-failure=14", Signal::SIGHUP);

    // Assert
    assert_eq!(status.code(), Some(14));
    assert!(elapsed >= Duration::from_secs(4));
}

#[test]
fn port_zero_exits_without_listening() {
    // Arrange
    let node = Node::new();

    // Act
    let status = node.run("none", &["--http-port", "0"]);

    // Assert
    assert_eq!(status.code(), Some(0));
    assert!(node.data_file("working.txt").is_file());
}

#[test]
fn serving_node_answers_json_rpc() {
    // Arrange
    let node = Node::new();
    let port = free_port();
    let mut child = node
        .command("none")
        .arg(format!("--http-port={port}"))
        .spawn()
        .unwrap();
    wait_for_listening(&mut child, port);
    let client = reqwest::blocking::Client::new();

    // Act
    let block: Value = client
        .post(format!("http://127.0.0.1:{port}"))
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "eth_getBlockByNumber",
            "params": ["0x5", false]
        }))
        .send()
        .unwrap()
        .json()
        .unwrap();
    let unsupported = client
        .post(format!("http://127.0.0.1:{port}"))
        .body(r#"{"jsonrpc":"2.0","id":4,"method":"eth_sendTransaction"}"#)
        .send()
        .unwrap();
    terminate(&child, Signal::SIGTERM);
    let status = wait_for_exit(&mut child);

    // Assert
    assert_eq!(block["id"], json!(3));
    assert_eq!(block["result"]["number"], json!(5));
    let timestamp = block["result"]["timestamp"].as_u64().unwrap();
    assert!(timestamp > 5);
    assert_eq!(unsupported.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(status.code(), Some(0));
}
