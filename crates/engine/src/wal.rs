use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::job::unix_now;

/// One append-only log entry. `submit` carries the whole serialized job;
/// terminal records carry only the payload a restart would care about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum WalRecord {
    /// A job entered the queue.
    Submit {
        /// Serialized job (request fields plus lifecycle timestamps).
        job: Value,
        /// Epoch seconds.
        timestamp: f64,
    },
    /// A job transitioned to running.
    Start {
        /// Job id.
        job_id: String,
        /// Epoch seconds.
        timestamp: f64,
    },
    /// A job finished successfully.
    Complete {
        /// Job id.
        job_id: String,
        /// Result payload delivered to the client.
        result: Value,
        /// Epoch seconds.
        timestamp: f64,
    },
    /// A job finished with an error.
    Fail {
        /// Job id.
        job_id: String,
        /// Failure reason delivered to the client.
        error: String,
        /// Epoch seconds.
        timestamp: f64,
    },
}

impl WalRecord {
    /// Build a `submit` record stamped with the current time.
    pub fn submit(job: Value) -> Self {
        WalRecord::Submit {
            job,
            timestamp: unix_now(),
        }
    }

    /// Build a `start` record stamped with the current time.
    pub fn start(job_id: impl Into<String>) -> Self {
        WalRecord::Start {
            job_id: job_id.into(),
            timestamp: unix_now(),
        }
    }

    /// Build a `complete` record stamped with the current time.
    pub fn complete(job_id: impl Into<String>, result: Value) -> Self {
        WalRecord::Complete {
            job_id: job_id.into(),
            result,
            timestamp: unix_now(),
        }
    }

    /// Build a `fail` record stamped with the current time.
    pub fn fail(job_id: impl Into<String>, error: impl Into<String>) -> Self {
        WalRecord::Fail {
            job_id: job_id.into(),
            error: error.into(),
            timestamp: unix_now(),
        }
    }

    fn job_id(&self) -> Option<&str> {
        match self {
            WalRecord::Submit { job, .. } => job.get("job_id").and_then(Value::as_str),
            WalRecord::Start { job_id, .. }
            | WalRecord::Complete { job_id, .. }
            | WalRecord::Fail { job_id, .. } => Some(job_id),
        }
    }
}

/// Append-only write-ahead log, newline-delimited JSON, serialised by an
/// internal mutex. Used for restart bookkeeping, not replay.
pub struct Wal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Wal {
    /// Open a WAL at `path`. The file is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Append one record and flush it.
    pub async fn append(&self, record: &WalRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read every parseable record. Malformed lines are skipped with a
    /// warning; the daemon keeps going.
    pub fn read_all(&self) -> Vec<WalRecord> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!("failed to read WAL {}: {err}", self.path.display());
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(_) => {
                    let head: String = line.chars().take(100).collect();
                    warn!("invalid WAL entry: {head}");
                }
            }
        }
        records
    }

    /// Remove the log after recovery.
    pub async fn clear(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Ids of jobs that were submitted or started but never reached a
/// terminal record: the work interrupted by the previous shutdown.
pub fn interrupted_jobs(records: &[WalRecord]) -> Vec<String> {
    let mut open: Vec<String> = Vec::new();
    let mut terminal: HashSet<&str> = HashSet::new();

    for record in records {
        if let WalRecord::Complete { job_id, .. } | WalRecord::Fail { job_id, .. } = record {
            terminal.insert(job_id);
        }
    }
    for record in records {
        if let WalRecord::Submit { .. } = record {
            if let Some(id) = record.job_id() {
                if !terminal.contains(id) && !open.iter().any(|j| j == id) {
                    open.push(id.to_string());
                }
            }
        }
    }
    open
}
