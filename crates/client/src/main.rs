mod cli;

use std::collections::HashMap;

use anyhow::{bail, Context as _};
use clap::Parser;
use serde_json::Value;

use mcp_queue_client::{
    get_status, is_daemon_running, shutdown_daemon, start_daemon, submit_and_wait, JobRequest,
};
use mcp_queue_proto::QueueStatus;

use crate::cli::Cli;

fn print_status(status: &QueueStatus) {
    println!("=== MCP Queue Status ===");
    println!("Running:   {}", status.running);
    println!("Queued:    {}", status.queued);
    println!("Completed: {}", status.completed);
    println!("Failed:    {}", status.failed);

    if !status.jobs.is_empty() {
        println!("\n--- Jobs ---");
        for job in &status.jobs {
            let id: String = job.job_id.chars().take(8).collect();
            println!(
                "  {id}... [{}] {} -> {}",
                job.status, job.endpoint, job.submit_tool
            );
        }
    }
}

fn parse_headers(raw: &[String]) -> anyhow::Result<Option<HashMap<String, String>>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let mut headers = HashMap::new();
    for entry in raw {
        let Some((key, value)) = entry.split_once(':') else {
            bail!("invalid header {entry:?}, expected Key:Value");
        };
        headers.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(Some(headers))
}

fn submit_args(cli: &Cli) -> anyhow::Result<Value> {
    if let Some(raw) = &cli.args {
        return serde_json::from_str(raw).context("parse --args as JSON");
    }
    if let Some(path) = &cli.args_file {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        return serde_json::from_str(&raw).context("parse --args-file as JSON");
    }
    Ok(serde_json::json!({}))
}

fn build_request(cli: &Cli, endpoint: String, submit_tool: String) -> anyhow::Result<JobRequest> {
    Ok(JobRequest {
        job_id: String::new(),
        endpoint,
        submit_tool,
        submit_args: submit_args(cli)?,
        status_tool: cli.status_tool.clone(),
        result_tool: cli.result_tool.clone(),
        headers: parse_headers(&cli.headers)?,
        id_param_name: cli.id_param.clone(),
        poll_interval: cli.poll_interval,
        max_polls: cli.max_polls,
        output_dir: Some(cli.output.clone()),
        output_file: cli.output_file.clone(),
        auto_filename: cli.auto_filename,
        save_logs_to_dir: cli.save_logs,
        save_logs_inline: cli.save_logs_inline,
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let runtime_dir = cli.runtime_dir.as_deref();

    if cli.status {
        let status = get_status(runtime_dir).context("daemon not running or unreachable")?;
        print_status(&status);
        return Ok(());
    }

    if cli.shutdown {
        return shutdown_daemon(runtime_dir);
    }

    if cli.start {
        return start_daemon(runtime_dir, cli.config.as_deref());
    }

    if let (Some(endpoint), Some(submit_tool)) = (cli.endpoint.clone(), cli.submit_tool.clone()) {
        let request = build_request(&cli, endpoint, submit_tool)?;
        let result = submit_and_wait(request, runtime_dir, cli.config.as_deref())?;
        println!("\n=== Result ===");
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    // No sub-command: show status when a daemon is up, usage otherwise.
    if is_daemon_running(runtime_dir) {
        print_status(&get_status(runtime_dir)?);
    } else {
        println!("Daemon not running");
        println!("\nUsage:");
        println!("  mcp-queue --start       # Start daemon");
        println!("  mcp-queue --status      # Show status");
        println!("  mcp-queue --shutdown    # Stop daemon");
    }
    Ok(())
}
