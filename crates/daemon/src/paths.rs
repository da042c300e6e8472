use std::path::{Path, PathBuf};

pub const SOCKET_NAME: &str = "mcp-queue.sock";
pub const PID_NAME: &str = "mcp-queue.pid";
pub const WAL_NAME: &str = "mcp-queue.wal";

/// Default runtime directory: `~/.cache/mcp-queue`.
pub fn default_runtime_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .ok_or_else(|| anyhow::anyhow!("HOME is not set"))?;
    let home = PathBuf::from(home);
    if home.as_os_str().is_empty() {
        anyhow::bail!("HOME is set but empty");
    }
    Ok(home.join(".cache").join("mcp-queue"))
}

pub fn socket_path(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join(SOCKET_NAME)
}

pub fn pid_path(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join(PID_NAME)
}

pub fn wal_path(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join(WAL_NAME)
}
