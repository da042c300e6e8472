//! End-to-end tests: spawn the real daemon binary against a throwaway
//! runtime directory and speak the wire protocol over its socket.

use std::io::Write as _;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use mcp_queue_proto::{sync_recv_message, sync_send_message, Message};

struct DaemonUnderTest {
    child: Child,
    runtime_dir: tempfile::TempDir,
}

impl DaemonUnderTest {
    fn spawn() -> Self {
        let runtime_dir = tempfile::tempdir().unwrap();
        let child = Command::new(env!("CARGO_BIN_EXE_mcp-queued"))
            .arg("--runtime-dir")
            .arg(runtime_dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");
        let daemon = Self { child, runtime_dir };
        daemon.wait_for_socket();
        daemon
    }

    fn socket_path(&self) -> PathBuf {
        self.runtime_dir.path().join("mcp-queue.sock")
    }

    fn wait_for_socket(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.socket_path().exists() {
                if let Ok(mut stream) = UnixStream::connect(self.socket_path()) {
                    stream
                        .set_read_timeout(Some(Duration::from_secs(1)))
                        .unwrap();
                    sync_send_message(&mut stream, &Message::Ping).unwrap();
                    if let Ok(Some(Message::Pong)) = sync_recv_message(&mut stream) {
                        return;
                    }
                }
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        panic!("daemon socket never came up");
    }

    fn connect(&self) -> UnixStream {
        let stream = UnixStream::connect(self.socket_path()).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(30)))
            .unwrap();
        stream
    }

    fn shutdown(mut self) {
        let mut stream = self.connect();
        sync_send_message(&mut stream, &Message::Shutdown).unwrap();
        let reply = sync_recv_message(&mut stream).unwrap();
        assert_eq!(reply, Some(Message::ShutdownAck));

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                assert!(
                    !self.socket_path().exists(),
                    "socket file should be removed on clean shutdown"
                );
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        let _ = self.child.kill();
        panic!("daemon did not exit after shutdown ack");
    }
}

impl Drop for DaemonUnderTest {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn submit_payload(job_id: &str, duration: f64, interval: f64) -> Message {
    serde_json::from_value(serde_json::json!({
        "type": "submit_job",
        "job_id": job_id,
        "endpoint": "mock://ok",
        "submit_tool": "submit",
        "submit_args": {"duration": duration, "mock_poll_interval": interval},
        "status_tool": "status",
        "result_tool": "result",
        "poll_interval": 1.0,
        "max_polls": 10,
    }))
    .unwrap()
}

#[test]
fn daemon_end_to_end() {
    let daemon = DaemonUnderTest::spawn();

    // Ping / pong.
    let mut stream = daemon.connect();
    sync_send_message(&mut stream, &Message::Ping).unwrap();
    assert_eq!(sync_recv_message(&mut stream).unwrap(), Some(Message::Pong));

    // An unknown message type gets an error and the connection survives.
    let bogus = serde_json::json!({"type": "bogus"}).to_string();
    let mut frame = Vec::new();
    frame.extend_from_slice(&(bogus.len() as u32).to_be_bytes());
    frame.extend_from_slice(bogus.as_bytes());
    stream.write_all(&frame).unwrap();
    match sync_recv_message(&mut stream).unwrap() {
        Some(Message::Error { error }) => {
            assert_eq!(error, "Unknown message type: bogus");
        }
        other => panic!("expected an error reply, got {other:?}"),
    }
    sync_send_message(&mut stream, &Message::Ping).unwrap();
    assert_eq!(sync_recv_message(&mut stream).unwrap(), Some(Message::Pong));

    // Submit a mock job and ride the connection to completion.
    let submit = submit_payload("e2e-1", 0.4, 0.2);
    sync_send_message(&mut stream, &submit).unwrap();
    match sync_recv_message(&mut stream).unwrap() {
        Some(Message::JobAccepted { job_id }) => assert_eq!(job_id, "e2e-1"),
        other => panic!("expected job_accepted, got {other:?}"),
    }
    match sync_recv_message(&mut stream).unwrap() {
        Some(Message::JobCompleted {
            job_id,
            success,
            result,
        }) => {
            assert_eq!(job_id, "e2e-1");
            assert!(success);
            let result = result.unwrap();
            assert_eq!(result["mock"], true);
            assert_eq!(result["poll_count"], 2);
        }
        other => panic!("expected job_completed, got {other:?}"),
    }

    // Status reflects the finished job.
    let mut status_conn = daemon.connect();
    sync_send_message(&mut status_conn, &Message::Status).unwrap();
    match sync_recv_message(&mut status_conn).unwrap() {
        Some(Message::StatusResponse(status)) => {
            assert_eq!(status.completed, 1);
            assert_eq!(status.failed, 0);
            assert_eq!(status.jobs.len(), 1);
            assert_eq!(status.jobs[0].job_id, "e2e-1");
            assert_eq!(status.jobs[0].status, "completed");
        }
        other => panic!("expected status_response, got {other:?}"),
    }

    daemon.shutdown();
}

#[test]
fn disconnected_client_job_still_completes() {
    let daemon = DaemonUnderTest::spawn();

    let mut stream = daemon.connect();
    let submit = submit_payload("orphan-1", 0.6, 0.2);
    sync_send_message(&mut stream, &submit).unwrap();
    match sync_recv_message(&mut stream).unwrap() {
        Some(Message::JobAccepted { .. }) => {}
        other => panic!("expected job_accepted, got {other:?}"),
    }
    // Walk away before the job finishes.
    drop(stream);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let mut status_conn = daemon.connect();
        sync_send_message(&mut status_conn, &Message::Status).unwrap();
        let Some(Message::StatusResponse(status)) = sync_recv_message(&mut status_conn).unwrap()
        else {
            panic!("expected status_response");
        };
        if status.completed == 1 {
            assert_eq!(status.jobs[0].status, "completed");
            break;
        }
        assert!(
            Instant::now() < deadline,
            "job never completed after client disconnect: {status:?}"
        );
        std::thread::sleep(Duration::from_millis(200));
    }

    daemon.shutdown();
}
