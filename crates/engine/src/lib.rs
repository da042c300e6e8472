#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Queue engine for the `mcp-queue` daemon: admission gates, worker
//! pool, write-ahead log, and the remote submit/poll/fetch/download
//! transaction.

mod config;
mod dispatcher;
mod download;
mod extract;
mod job;
mod mcp;
mod rate;
mod runner;
mod wal;

pub use config::{load_config, EndpointRate, QueueConfig, StatusSets};
pub use dispatcher::Dispatcher;
pub use job::{ClientNotifier, JobStatus};
pub use mcp::{McpClient, McpError};
pub use rate::TokenBucket;
pub use runner::{run_mock_job, run_remote_job, RunError};
pub use wal::{interrupted_jobs, Wal, WalRecord};
