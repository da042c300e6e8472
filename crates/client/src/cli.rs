use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "mcp-queue", version, about = "Client for the MCP job-queue daemon")]
pub struct Cli {
    /// Show queue status.
    #[arg(short = 's', long)]
    pub status: bool,

    /// Shut the daemon down.
    #[arg(long)]
    pub shutdown: bool,

    /// Start the daemon if it is not running.
    #[arg(long)]
    pub start: bool,

    /// Runtime directory shared with the daemon.
    #[arg(long, env = "MCP_QUEUE_RUNTIME_DIR")]
    pub runtime_dir: Option<PathBuf>,

    /// Config file path handed to an auto-started daemon.
    #[arg(short = 'c', long, env = "MCP_QUEUE_CONFIG")]
    pub config: Option<PathBuf>,

    /// MCP server endpoint URL (or mock:// for testing).
    #[arg(short = 'e', long)]
    pub endpoint: Option<String>,

    /// Submit tool name.
    #[arg(long)]
    pub submit_tool: Option<String>,

    /// Status tool name.
    #[arg(long, default_value = "status")]
    pub status_tool: String,

    /// Result tool name.
    #[arg(long, default_value = "result")]
    pub result_tool: String,

    /// Submit arguments as a JSON string.
    #[arg(short = 'a', long)]
    pub args: Option<String>,

    /// Submit arguments from a JSON file.
    #[arg(long)]
    pub args_file: Option<PathBuf>,

    /// Output directory for downloaded artifacts.
    #[arg(short = 'o', long, default_value = "./output")]
    pub output: String,

    /// Output file path (overrides the generated filename).
    #[arg(short = 'O', long)]
    pub output_file: Option<String>,

    /// Name artifacts {request_id}_{timestamp}.{ext}.
    #[arg(long)]
    pub auto_filename: bool,

    /// Seconds between status polls.
    #[arg(long, default_value_t = 2.0)]
    pub poll_interval: f64,

    /// Maximum poll attempts.
    #[arg(long, default_value_t = 300)]
    pub max_polls: u32,

    /// Extra HTTP header for remote calls (repeatable, Key:Value).
    #[arg(long = "header", value_name = "KEY:VALUE")]
    pub headers: Vec<String>,

    /// Field name carrying the remote id when polling.
    #[arg(long = "id-param", default_value = "request_id")]
    pub id_param: String,

    /// Save request/response logs under {output}/logs/.
    #[arg(long = "save-logs")]
    pub save_logs: bool,

    /// Save request/response logs beside the downloaded file.
    #[arg(long = "save-logs-inline")]
    pub save_logs_inline: bool,
}
