//! Message types exchanged between clients and the queue daemon.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_id_param() -> String {
    "request_id".to_string()
}

/// A job submission as it travels on the wire.
///
/// Required fields mirror the remote submit/status/result contract; the
/// rest default so that older clients stay compatible.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRequest {
    /// Client-supplied job id; the daemon generates a UUID when empty.
    #[serde(default)]
    pub job_id: String,
    /// MCP endpoint URL (or `mock://...` for the test runner).
    pub endpoint: String,
    /// Tool that starts the remote job.
    pub submit_tool: String,
    /// Arguments passed to the submit tool, opaque to the daemon.
    pub submit_args: Value,
    /// Tool polled for the remote job status.
    pub status_tool: String,
    /// Tool that returns the remote job result.
    pub result_tool: String,
    /// Extra HTTP headers for the remote calls (auth and the like).
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    /// Field name carrying the remote id in status/result calls.
    #[serde(default = "default_id_param")]
    pub id_param_name: String,
    /// Seconds between status polls; `<= 0` means "use the daemon default".
    #[serde(default)]
    pub poll_interval: f64,
    /// Maximum status polls; `0` means "derive from the job timeout".
    #[serde(default)]
    pub max_polls: u32,
    /// Directory artifacts are saved under.
    #[serde(default)]
    pub output_dir: Option<String>,
    /// Explicit artifact filename (overwrites are allowed when set).
    #[serde(default)]
    pub output_file: Option<String>,
    /// Name artifacts `{remote-id}_{timestamp}{.ext}` instead of guessing.
    #[serde(default)]
    pub auto_filename: bool,
    /// Write request/response logs under `{output_dir}/logs/`.
    #[serde(default)]
    pub save_logs_to_dir: bool,
    /// Write request/response logs beside the first saved artifact.
    #[serde(default)]
    pub save_logs_inline: bool,
}

/// One row of the queue status job listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobInfo {
    /// Job id.
    pub job_id: String,
    /// Lifecycle state (`pending`, `running`, `completed`, `failed`).
    pub status: String,
    /// Remote endpoint the job targets.
    pub endpoint: String,
    /// Submit tool name.
    pub submit_tool: String,
    /// Submission time, epoch seconds.
    pub created_at: f64,
    /// Start time, epoch seconds; unset while pending.
    pub started_at: Option<f64>,
    /// Terminal time, epoch seconds; unset until completed or failed.
    pub completed_at: Option<f64>,
}

/// Snapshot of dispatcher counters and the per-job listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueStatus {
    /// Jobs currently executing.
    pub running: usize,
    /// Jobs waiting for admission.
    pub queued: usize,
    /// Jobs finished successfully since daemon start.
    pub completed: u64,
    /// Jobs finished with an error since daemon start.
    pub failed: u64,
    /// Per-job details.
    pub jobs: Vec<JobInfo>,
}

/// Every frame on the socket decodes to one of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Liveness probe.
    Ping,
    /// Liveness reply.
    Pong,
    /// Submit a job to the queue.
    SubmitJob(JobRequest),
    /// The job was registered and enqueued.
    JobAccepted {
        /// Id assigned to the job.
        job_id: String,
    },
    /// The job reached a successful terminal state.
    JobCompleted {
        /// Id of the finished job.
        job_id: String,
        /// Always `true`; kept on the wire for symmetry with failures.
        success: bool,
        /// Result payload (remote id, URLs, saved paths).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    /// The job reached a failed terminal state.
    JobFailed {
        /// Id of the failed job.
        job_id: String,
        /// Always `false`.
        success: bool,
        /// Human-readable failure reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Request a queue snapshot.
    Status,
    /// Queue snapshot reply.
    StatusResponse(QueueStatus),
    /// Ask the daemon to stop.
    Shutdown,
    /// Shutdown acknowledged; the daemon closes after sending this.
    ShutdownAck,
    /// Protocol-level error; the connection stays open.
    Error {
        /// What went wrong.
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_tags_match_the_wire_names() {
        let encoded = serde_json::to_value(&Message::Ping).unwrap();
        assert_eq!(encoded["type"], "ping");

        let encoded = serde_json::to_value(&Message::JobAccepted {
            job_id: "abc".into(),
        })
        .unwrap();
        assert_eq!(encoded["type"], "job_accepted");
        assert_eq!(encoded["job_id"], "abc");

        let encoded = serde_json::to_value(&Message::ShutdownAck).unwrap();
        assert_eq!(encoded["type"], "shutdown_ack");
    }

    #[test]
    fn submit_job_fills_defaults() {
        let raw = serde_json::json!({
            "type": "submit_job",
            "job_id": "j1",
            "endpoint": "https://api.example.com/mcp",
            "submit_tool": "submit",
            "submit_args": {"prompt": "hi"},
            "status_tool": "status",
            "result_tool": "result",
        });
        let msg: Message = serde_json::from_value(raw).unwrap();
        let Message::SubmitJob(req) = msg else {
            panic!("expected submit_job");
        };
        assert_eq!(req.id_param_name, "request_id");
        assert_eq!(req.poll_interval, 0.0);
        assert_eq!(req.max_polls, 0);
        assert!(req.headers.is_none());
        assert!(!req.auto_filename);
    }

    #[test]
    fn submit_job_missing_required_field_is_an_error() {
        let raw = serde_json::json!({
            "type": "submit_job",
            "job_id": "j1",
            "endpoint": "https://api.example.com/mcp",
        });
        assert!(serde_json::from_value::<Message>(raw).is_err());
    }

    #[test]
    fn completion_omits_absent_payloads() {
        let encoded = serde_json::to_value(&Message::JobFailed {
            job_id: "j".into(),
            success: false,
            error: Some("boom".into()),
        })
        .unwrap();
        assert_eq!(encoded["type"], "job_failed");
        assert!(encoded.get("result").is_none());

        let encoded = serde_json::to_value(&Message::JobCompleted {
            job_id: "j".into(),
            success: true,
            result: None,
        })
        .unwrap();
        assert!(encoded.get("result").is_none());
    }
}
