use serde_json::{json, Value};
use tracing::{debug, info};

use mcp_queue_proto::JobRequest;

use crate::config::StatusSets;
use crate::download::{download_file, save_logs, split_ext, RunLogs};
use crate::extract::{extract_download_urls, extract_remote_id, parse_status};
use crate::mcp::{McpClient, McpError};

/// Terminal failure of one remote job transaction. The display string is
/// what the client sees in `JobFailed.error`.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The submit response carried nothing recognizable as a remote id.
    #[error("could not extract a remote id from submit response: {0}")]
    NoRemoteId(Value),
    /// Polling saw one of the configured failure statuses.
    #[error("job failed with status: {status}, details: {details}")]
    RemoteFailed {
        /// The status string that matched the failed set.
        status: String,
        /// The payload the status came from.
        details: Value,
    },
    /// The poll budget ran out without a terminal status.
    #[error("job did not complete within {0} polls")]
    PollTimeout(u32),
    /// JSON-RPC conversation failure.
    #[error(transparent)]
    Mcp(#[from] McpError),
    /// Artifact download or log-writing failure.
    #[error("download failed: {0:#}")]
    Download(anyhow::Error),
}

fn timestamp_now() -> Value {
    Value::String(chrono::Local::now().to_rfc3339())
}

/// Execute one submit → poll → fetch → download transaction against a
/// remote MCP endpoint. Cancellable: the caller wraps this future in the
/// per-job timeout and dropping it aborts the in-flight HTTP call.
pub async fn run_remote_job(
    http: &reqwest::Client,
    request: &JobRequest,
    statuses: &StatusSets,
) -> Result<Value, RunError> {
    let mut client = McpClient::new(http.clone(), &request.endpoint, request.headers.as_ref());
    let mut logs = RunLogs::default();
    let output_dir = request.output_dir.as_deref();

    // Submit.
    info!("submitting via {}", request.submit_tool);
    logs.push(
        "submit_request",
        json!({
            "timestamp": timestamp_now(),
            "tool": request.submit_tool,
            "arguments": request.submit_args,
        }),
    );
    let submit_resp = client
        .call_tool(&request.submit_tool, &request.submit_args)
        .await?;
    let remote_id =
        extract_remote_id(&submit_resp).ok_or_else(|| RunError::NoRemoteId(submit_resp.clone()))?;
    logs.push(
        "submit_response",
        json!({
            "timestamp": timestamp_now(),
            "tool": request.submit_tool,
            "request_id": remote_id,
        }),
    );
    info!("remote id: {remote_id}");

    // Poll until a configured terminal status shows up.
    let mut poll_args_map = serde_json::Map::new();
    poll_args_map.insert(
        request.id_param_name.clone(),
        Value::String(remote_id.clone()),
    );
    let poll_args = Value::Object(poll_args_map);
    let poll_interval = std::time::Duration::from_secs_f64(request.poll_interval.max(0.0));
    let mut status = "pending".to_string();
    let mut status_payload = Value::Null;
    let mut polls = 0u32;
    let mut done = false;

    while polls < request.max_polls {
        polls += 1;
        let resp = client.call_tool(&request.status_tool, &poll_args).await?;
        let (parsed_status, payload) = parse_status(&resp);
        status = parsed_status;
        status_payload = payload;
        debug!("poll {polls}: {status}");

        if statuses.is_completed(&status) {
            done = true;
            break;
        }
        if statuses.is_failed(&status) {
            return Err(RunError::RemoteFailed {
                status,
                details: status_payload,
            });
        }
        tokio::time::sleep(poll_interval).await;
    }
    if !done {
        return Err(RunError::PollTimeout(request.max_polls));
    }
    logs.push(
        "status_final",
        json!({
            "timestamp": timestamp_now(),
            "tool": request.status_tool,
            "poll_count": polls,
            "status": status,
            "response": status_payload,
        }),
    );

    // Fetch the result and harvest artifact URLs; the last status
    // response is the fallback source.
    let result_resp = client.call_tool(&request.result_tool, &poll_args).await?;
    logs.push(
        "result_response",
        json!({
            "timestamp": timestamp_now(),
            "tool": request.result_tool,
            "response": result_resp,
        }),
    );
    let mut urls = extract_download_urls(&result_resp);
    if urls.is_empty() {
        urls = extract_download_urls(&status_payload);
    }

    let want_logs = request.save_logs_to_dir || request.save_logs_inline;
    if urls.is_empty() {
        let log_paths = if want_logs {
            // No artifact, so inline placement has nothing to sit beside.
            save_logs(&logs, output_dir, None, request.save_logs_to_dir, false)
                .map_err(RunError::Download)?
        } else {
            Vec::new()
        };
        return Ok(json!({
            "request_id": remote_id,
            "status": status,
            "result": result_resp,
            "note": "No download URL found in result",
            "log_paths": log_paths,
        }));
    }

    // Download every artifact in discovery order.
    let mut saved_paths: Vec<String> = Vec::new();
    for (index, url) in urls.iter().enumerate() {
        info!("downloading ({}/{}) {url}", index + 1, urls.len());
        let per_file_name = request.output_file.as_deref().map(|file| {
            if urls.len() > 1 {
                let (base, ext) = split_ext(file);
                format!("{base}_{}{ext}", index + 1)
            } else {
                file.to_string()
            }
        });
        let saved = download_file(
            http,
            url,
            output_dir,
            per_file_name.as_deref(),
            Some(&remote_id),
            request.auto_filename,
        )
        .await
        .map_err(RunError::Download)?;
        debug!("saved to {}", saved.display());
        saved_paths.push(saved.to_string_lossy().into_owned());
    }

    let log_paths = if want_logs {
        let first = saved_paths.first().map(std::path::Path::new);
        save_logs(
            &logs,
            output_dir,
            first,
            request.save_logs_to_dir,
            request.save_logs_inline,
        )
        .map_err(RunError::Download)?
    } else {
        Vec::new()
    };

    Ok(json!({
        "request_id": remote_id,
        "status": status,
        "download_urls": urls,
        "saved_paths": saved_paths,
        "download_url": urls.first(),
        "saved_path": saved_paths.first(),
        "log_paths": log_paths,
    }))
}

/// Simulated runner for `mock://` endpoints: sleeps for
/// `submit_args.duration` seconds in `submit_args.mock_poll_interval`
/// slices and returns a synthetic completed result.
pub async fn run_mock_job(request: &JobRequest) -> Value {
    let duration = request
        .submit_args
        .get("duration")
        .and_then(Value::as_f64)
        .unwrap_or(3.0);
    let interval = request
        .submit_args
        .get("mock_poll_interval")
        .and_then(Value::as_f64)
        .unwrap_or(2.0);
    let poll_count = ((duration / interval) as u32).max(1);

    info!(
        "mock job {}: {poll_count} polls @ {interval}s interval",
        request.job_id
    );
    for poll in 1..=poll_count {
        tokio::time::sleep(std::time::Duration::from_secs_f64(interval.max(0.0))).await;
        debug!("mock job {}: poll {poll}/{poll_count}", request.job_id);
    }

    json!({
        "request_id": request.job_id,
        "status": "completed",
        "mock": true,
        "duration": duration,
        "poll_count": poll_count,
        "poll_interval": interval,
        "saved_path": null,
    })
}
