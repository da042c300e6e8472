#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Synchronous client for the `mcp-queue` daemon: auto-launch, job
//! submission with blocking wait, status, and shutdown.

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{bail, Context as _};
use serde_json::Value;

use mcp_queue_proto::{sync_recv_message, sync_send_message, Message, QueueStatus};
pub use mcp_queue_proto::JobRequest;

const SOCKET_NAME: &str = "mcp-queue.sock";
const PID_NAME: &str = "mcp-queue.pid";
const DAEMON_BIN: &str = "mcp-queued";

/// Read timeout on a fresh connection; removed once a job is accepted
/// and the client settles in to wait for completion.
const CONNECT_READ_TIMEOUT: Duration = Duration::from_secs(600);

fn default_runtime_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var_os("HOME").ok_or_else(|| anyhow::anyhow!("HOME is not set"))?;
    let home = PathBuf::from(home);
    if home.as_os_str().is_empty() {
        bail!("HOME is set but empty");
    }
    Ok(home.join(".cache").join("mcp-queue"))
}

fn resolve_runtime_dir(runtime_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    match runtime_dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => default_runtime_dir(),
    }
}

fn socket_path(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join(SOCKET_NAME)
}

fn pid_path(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join(PID_NAME)
}

fn process_alive(pid: i32) -> bool {
    // Signal 0: existence probe only.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Is a daemon serving this runtime directory? Checks the PID file, the
/// socket file, and that the recorded process still exists.
pub fn is_daemon_running(runtime_dir: Option<&Path>) -> bool {
    let Ok(dir) = resolve_runtime_dir(runtime_dir) else {
        return false;
    };
    if !socket_path(&dir).exists() {
        return false;
    }
    let Ok(raw) = std::fs::read_to_string(pid_path(&dir)) else {
        return false;
    };
    let Ok(pid) = raw.trim().parse::<i32>() else {
        return false;
    };
    process_alive(pid)
}

fn daemon_binary() -> PathBuf {
    if let Some(bin) = std::env::var_os("MCP_QUEUED_BIN") {
        return PathBuf::from(bin);
    }
    // Prefer a daemon installed beside this binary, fall back to PATH.
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join(DAEMON_BIN);
            if sibling.exists() {
                return sibling;
            }
        }
    }
    PathBuf::from(DAEMON_BIN)
}

/// Launch a background daemon and wait (up to ~3 s) until its socket
/// answers a ping.
pub fn start_daemon(runtime_dir: Option<&Path>, config_path: Option<&Path>) -> anyhow::Result<()> {
    if is_daemon_running(runtime_dir) {
        return Ok(());
    }

    let dir = resolve_runtime_dir(runtime_dir)?;
    let mut command = Command::new(daemon_binary());
    command
        .arg("--background")
        .arg("--runtime-dir")
        .arg(&dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    if let Some(config) = config_path {
        command.arg("--config").arg(config);
    }

    eprintln!("[queue] starting daemon...");
    let output = command.output().context("launch mcp-queued")?;
    if !output.status.success() {
        bail!(
            "failed to start daemon: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let socket = socket_path(&dir);
    for _ in 0..30 {
        if socket.exists() {
            if let Ok(mut stream) = UnixStream::connect(&socket) {
                let _ = stream.set_read_timeout(Some(Duration::from_secs(1)));
                if sync_send_message(&mut stream, &Message::Ping).is_ok() {
                    if let Ok(Some(Message::Pong)) = sync_recv_message(&mut stream) {
                        eprintln!("[queue] daemon started");
                        return Ok(());
                    }
                }
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    bail!("daemon failed to start (timeout)")
}

/// Connect to the daemon, optionally auto-starting it first.
pub fn connect(
    runtime_dir: Option<&Path>,
    auto_start: bool,
    config_path: Option<&Path>,
) -> anyhow::Result<UnixStream> {
    if auto_start && !is_daemon_running(runtime_dir) {
        start_daemon(runtime_dir, config_path)?;
    }

    let dir = resolve_runtime_dir(runtime_dir)?;
    let socket = socket_path(&dir);
    if !socket.exists() {
        bail!("daemon socket not found: {}", socket.display());
    }
    let stream = UnixStream::connect(&socket)
        .with_context(|| format!("connect to {}", socket.display()))?;
    stream.set_read_timeout(Some(CONNECT_READ_TIMEOUT))?;
    Ok(stream)
}

/// Fetch the queue status from a running daemon.
pub fn get_status(runtime_dir: Option<&Path>) -> anyhow::Result<QueueStatus> {
    let mut stream = connect(runtime_dir, false, None)?;
    sync_send_message(&mut stream, &Message::Status)?;
    match sync_recv_message(&mut stream)? {
        Some(Message::StatusResponse(status)) => Ok(status),
        Some(other) => bail!("unexpected status reply: {other:?}"),
        None => bail!("connection closed while reading status"),
    }
}

/// Ask the daemon to shut down; returns once it acknowledges.
pub fn shutdown_daemon(runtime_dir: Option<&Path>) -> anyhow::Result<()> {
    let mut stream = connect(runtime_dir, false, None)?;
    sync_send_message(&mut stream, &Message::Shutdown)?;
    match sync_recv_message(&mut stream)? {
        Some(Message::ShutdownAck) => {
            eprintln!("[queue] daemon shutdown requested");
            Ok(())
        }
        Some(other) => bail!("unexpected shutdown reply: {other:?}"),
        None => bail!("connection closed while shutting down"),
    }
}

fn apply_client_defaults(request: &mut JobRequest) {
    if request.job_id.is_empty() {
        request.job_id = uuid::Uuid::new_v4().to_string();
    }
    if request.poll_interval <= 0.0 {
        request.poll_interval = 2.0;
    }
    if request.max_polls == 0 {
        request.max_polls = 300;
    }
    if request.output_dir.is_none() {
        request.output_dir = Some("./output".to_string());
    }
}

/// Submit a job and block until the daemon reports its terminal state.
///
/// Auto-starts the daemon when needed. Returns the result payload on
/// success; a failed job surfaces its error string.
pub fn submit_and_wait(
    mut request: JobRequest,
    runtime_dir: Option<&Path>,
    config_path: Option<&Path>,
) -> anyhow::Result<Value> {
    apply_client_defaults(&mut request);
    let job_id = request.job_id.clone();

    let mut stream = connect(runtime_dir, true, config_path)?;
    sync_send_message(&mut stream, &Message::SubmitJob(request))?;
    eprintln!("[queue] job submitted: {job_id}");

    match sync_recv_message(&mut stream)? {
        Some(Message::JobAccepted { .. }) => {}
        Some(Message::Error { error }) => bail!("job submission error: {error}"),
        Some(other) => bail!("unexpected response: {other:?}"),
        None => bail!("connection closed unexpectedly"),
    }
    eprintln!("[queue] job accepted, waiting for completion...");

    // Remote jobs run for minutes; from here on only the daemon decides
    // when this connection hears back.
    stream.set_read_timeout(None)?;
    loop {
        match sync_recv_message(&mut stream)? {
            Some(Message::JobCompleted { result, .. }) => {
                eprintln!("[queue] job completed");
                return Ok(result.unwrap_or(Value::Null));
            }
            Some(Message::JobFailed { error, .. }) => {
                bail!("job failed: {}", error.unwrap_or_else(|| "unknown error".into()))
            }
            Some(Message::Error { error }) => bail!("error: {error}"),
            Some(_) => continue,
            None => bail!("connection closed while waiting for job"),
        }
    }
}
