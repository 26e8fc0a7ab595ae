#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)] // Integration tests use unwrap for brevity

//! End-to-end tests against real processes.
//!
//! Router tests run standard Unix tools in place of the configured binary;
//! the server test drives the NDJSON socket protocol over loopback TCP.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use execrelay_daemon::channel::{Message, QueueChannel};
use execrelay_daemon::launcher::ProcessLauncher;
use execrelay_daemon::router::{Routed, Router, RouterConfig};
use execrelay_daemon::server::RelayServer;
use execrelay_daemon::session::SessionRegistry;

fn config(binary: &str) -> RouterConfig {
    RouterConfig {
        binary: PathBuf::from(binary),
        watchdog_timeout_ms: 10_000,
        stop_timeout_ms: 2_000,
        ..Default::default()
    }
}

fn router(binary: &str) -> (Arc<Router<ProcessLauncher>>, Arc<QueueChannel>) {
    let bus = Arc::new(QueueChannel::new());
    let router = Router::new(
        config(binary),
        Arc::new(SessionRegistry::new(8)),
        bus.clone(),
        ProcessLauncher::new(),
    );
    (Arc::new(router), bus)
}

/// Collect messages up to and including the exit event.
async fn until_exit(rx: &mut mpsc::UnboundedReceiver<Message>) -> (Vec<Message>, Message) {
    let mut output = Vec::new();
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for exit")
            .unwrap();
        if message.headers.get("event").map(String::as_str) == Some("exit") {
            return (output, message);
        }
        output.push(message);
    }
}

fn stream_bytes(messages: &[Message], stream: &str) -> Vec<u8> {
    messages
        .iter()
        .filter(|m| m.headers.get("stream").map(String::as_str) == Some(stream))
        .flat_map(|m| m.payload.iter().copied())
        .collect()
}

#[tokio::test]
async fn command_output_then_exit() {
    let (router, bus) = router("echo");
    let mut rx = bus.subscribe(&router.destination("s1"));

    let routed = router.route("s1", "cf hello").await.unwrap();
    assert!(matches!(routed, Routed::Launched { pid: Some(_) }));

    let (output, exit) = until_exit(&mut rx).await;
    assert_eq!(stream_bytes(&output, "stdout"), b"hello\n");
    assert_eq!(exit.headers.get("exit_code").map(String::as_str), Some("0"));
    assert_eq!(exit.headers.get("killed").map(String::as_str), Some("false"));
    assert!(!exit.headers.contains_key("error"));
}

#[tokio::test]
async fn follow_up_message_is_process_input() {
    let (router, bus) = router("head");
    let mut rx = bus.subscribe(&router.destination("s1"));

    router.route("s1", "cf -n 1").await.unwrap();
    let routed = router.route("s1", "yes").await.unwrap();
    assert_eq!(routed, Routed::Forwarded { bytes: 4 });

    let (output, exit) = until_exit(&mut rx).await;
    assert_eq!(stream_bytes(&output, "stdout"), b"yes\n");
    assert_eq!(stream_bytes(&output, "stdin"), b"yes\n");
    assert_eq!(exit.headers.get("exit_code").map(String::as_str), Some("0"));

    // The session is idle again: the next message is a new command.
    let routed = router.route("s1", "cf -n 0").await.unwrap();
    assert!(matches!(routed, Routed::Launched { .. }));
}

#[tokio::test]
async fn disconnect_kills_running_process() {
    let (router, _bus) = router("sleep");
    router.route("s1", "cf 30").await.unwrap();
    let watchdog = {
        let session = router.registry().get("s1").await.unwrap();
        let session = session.lock().await;
        session.watchdog().cloned().unwrap()
    };
    assert!(watchdog.is_watching());

    router.disconnect("s1").await;

    tokio::time::timeout(Duration::from_secs(10), async {
        while watchdog.is_watching() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("process was not stopped");
    assert!(watchdog.killed());
    assert!(router.registry().is_empty().await);
}

#[tokio::test]
async fn unread_input_does_not_block_disconnect() {
    let bus = Arc::new(QueueChannel::new());
    let router = Arc::new(Router::new(
        RouterConfig {
            binary: PathBuf::from("sleep"),
            watchdog_timeout_ms: 0,
            input_timeout_ms: 0,
            stop_timeout_ms: 500,
            ..Default::default()
        },
        Arc::new(SessionRegistry::new(8)),
        bus,
        ProcessLauncher::new(),
    ));
    router.route("s1", "cf 300").await.unwrap();
    let watchdog = {
        let session = router.registry().get("s1").await.unwrap();
        let session = session.lock().await;
        session.watchdog().cloned().unwrap()
    };

    // `sleep` never reads stdin, so this write fills every pipe and stalls.
    let writer = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.route("s1", &"y".repeat(400_000)).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    tokio::time::timeout(Duration::from_secs(3), router.disconnect("s1"))
        .await
        .expect("disconnect blocked by pending input");

    tokio::time::timeout(Duration::from_secs(10), async {
        while watchdog.is_watching() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("process was not stopped");
    assert!(watchdog.killed());

    // Once the process is gone the pending write fails instead of hanging.
    let pending = tokio::time::timeout(Duration::from_secs(5), writer)
        .await
        .expect("input write still pending")
        .unwrap();
    assert!(pending.is_err());
}

type FrameLines = tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>;

async fn read_frame(lines: &mut FrameLines) -> Value {
    let line = tokio::time::timeout(Duration::from_secs(10), lines.next_line())
        .await
        .expect("timed out waiting for frame")
        .unwrap()
        .expect("server closed connection");
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn socket_client_runs_command() {
    let (router, bus) = router("echo");
    let server = RelayServer::new(router, bus);
    let listener = RelayServer::<ProcessLauncher>::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let serving = tokio::spawn(async move { server.serve(listener, shutdown_rx).await });

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let hello = read_frame(&mut lines).await;
    assert_eq!(hello["type"], "hello");
    assert!(hello["session"].as_str().is_some_and(|s| !s.is_empty()));

    writer.write_all(b"{\"type\":\"ping\"}\n").await.unwrap();
    assert_eq!(read_frame(&mut lines).await, json!({"type": "pong"}));

    writer
        .write_all(b"{\"type\":\"run\",\"line\":\"cf over the wire\"}\n")
        .await
        .unwrap();

    let mut stdout = String::new();
    let exit = loop {
        let frame = read_frame(&mut lines).await;
        match frame["type"].as_str() {
            Some("output") => {
                assert_eq!(frame["stream"], "stdout");
                stdout.push_str(frame["data"].as_str().unwrap());
            }
            Some("exit") => break frame,
            other => panic!("unexpected frame {other:?}"),
        }
    };
    assert_eq!(stdout, "over the wire\n");
    assert_eq!(exit, json!({"type": "exit", "code": 0, "killed": false}));

    writer.write_all(b"not json\n").await.unwrap();
    assert_eq!(read_frame(&mut lines).await["type"], "error");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn slow_socket_client_receives_all_output() {
    const TOTAL: usize = 3_000_000;

    let (router, bus) = router("head");
    let server = RelayServer::new(router, bus);
    let listener = RelayServer::<ProcessLauncher>::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move { server.serve(listener, shutdown_rx).await });

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    assert_eq!(read_frame(&mut lines).await["type"], "hello");

    let run = json!({"type": "run", "line": format!("cf -c {TOTAL} /dev/zero")});
    writer
        .write_all(format!("{run}\n").as_bytes())
        .await
        .unwrap();

    // Let the process finish while nothing is read from the socket.
    tokio::time::sleep(Duration::from_secs(2)).await;

    let mut received = 0;
    let exit = loop {
        let frame = read_frame(&mut lines).await;
        match frame["type"].as_str() {
            Some("output") => received += frame["data"].as_str().unwrap().chars().count(),
            Some("exit") => break frame,
            other => panic!("unexpected frame {other:?}"),
        }
    };
    assert_eq!(received, TOTAL);
    assert_eq!(exit["code"], 0);
}
