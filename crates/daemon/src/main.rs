mod paths;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mcp_queue_engine::{interrupted_jobs, load_config, Dispatcher, Wal};

use crate::server::QueueServer;

#[derive(Debug, Parser)]
#[command(name = "mcp-queued", version, about = "MCP async job-queue daemon")]
struct Cli {
    /// Detach from the terminal and run in the background.
    #[arg(short = 'b', long)]
    background: bool,

    /// Config file path (default: search for queue_config.json).
    #[arg(short = 'c', long, env = "MCP_QUEUE_CONFIG")]
    config: Option<PathBuf>,

    /// Runtime directory for the socket, PID file, and WAL.
    #[arg(long, env = "MCP_QUEUE_RUNTIME_DIR")]
    runtime_dir: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Relaunch the daemon as a detached child (own session, null stdio) and
/// report its PID. The child runs the exact same command line minus the
/// background flag.
fn spawn_detached() -> anyhow::Result<()> {
    use std::os::unix::process::CommandExt as _;
    use std::process::Stdio;

    let exe = std::env::current_exe().context("resolve current executable")?;
    let mut command = std::process::Command::new(exe);
    for arg in std::env::args()
        .skip(1)
        .filter(|arg| arg != "--background" && arg != "-b")
    {
        command.arg(arg);
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0);

    let child = command.spawn().context("spawn background daemon")?;
    println!("Daemon started (PID: {})", child.id());
    Ok(())
}

fn create_runtime_dir(dir: &std::path::Path) -> anyhow::Result<()> {
    use std::os::unix::fs::DirBuilderExt as _;

    // Mode 0700: the socket's only access control is the filesystem.
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    builder.mode(0o700);
    builder
        .create(dir)
        .with_context(|| format!("create runtime dir {}", dir.display()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.background {
        return spawn_detached();
    }

    init_logging(cli.debug);

    let runtime_dir = match &cli.runtime_dir {
        Some(dir) => dir.clone(),
        None => paths::default_runtime_dir()?,
    };
    create_runtime_dir(&runtime_dir)?;

    let config = load_config(cli.config.as_deref(), Some(runtime_dir.as_path()));
    info!(
        "config: max_concurrent={}, start_interval={}s, rate={}/min, burst={}, job_timeout={}s",
        config.max_concurrent,
        config.start_interval,
        config.global_rate_per_min,
        config.global_burst,
        config.job_timeout,
    );

    let wal = Wal::new(paths::wal_path(&runtime_dir));
    let records = wal.read_all();
    if !records.is_empty() {
        let interrupted = interrupted_jobs(&records);
        warn!(
            "found {} WAL entries from a previous run ({} job(s) without a terminal state); truncating",
            records.len(),
            interrupted.len(),
        );
        for job_id in &interrupted {
            warn!("interrupted job: {job_id}");
        }
        wal.clear().await?;
    }

    let dispatcher = Arc::new(Dispatcher::new(&config, wal)?);
    let server = QueueServer::new(
        paths::socket_path(&runtime_dir),
        paths::pid_path(&runtime_dir),
        config,
        dispatcher,
    );
    server.run().await
}
