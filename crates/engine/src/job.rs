use mcp_queue_proto::{JobInfo, JobRequest, Message};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// Write side of a connected client, used only for the terminal
/// notification. The channel drains into the connection's writer task,
/// so a slow or vanished client can never block a worker.
pub type ClientNotifier = mpsc::UnboundedSender<Message>;

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Registered and waiting for admission.
    Pending,
    /// Admitted; the remote transaction is in flight.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    /// Wire/status-listing name of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// Current wall-clock time as fractional epoch seconds.
pub(crate) fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) request: JobRequest,
    pub(crate) status: JobStatus,
    pub(crate) created_at: f64,
    pub(crate) started_at: Option<f64>,
    pub(crate) completed_at: Option<f64>,
    pub(crate) result: Option<Value>,
    pub(crate) error: Option<String>,
    pub(crate) notifier: Option<ClientNotifier>,
}

/// Serializable view of a job for the WAL `submit` record. The client
/// back-reference never touches disk.
#[derive(Serialize)]
struct JobRecord<'a> {
    #[serde(flatten)]
    request: &'a JobRequest,
    status: &'static str,
    created_at: f64,
    started_at: Option<f64>,
    completed_at: Option<f64>,
    result: &'a Option<Value>,
    error: &'a Option<String>,
}

impl Job {
    pub(crate) fn new(request: JobRequest, notifier: Option<ClientNotifier>) -> Self {
        Self {
            request,
            status: JobStatus::Pending,
            created_at: unix_now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            notifier,
        }
    }

    pub(crate) fn to_record(&self) -> Value {
        serde_json::to_value(JobRecord {
            request: &self.request,
            status: self.status.as_str(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result: &self.result,
            error: &self.error,
        })
        .unwrap_or(Value::Null)
    }

    pub(crate) fn info(&self) -> JobInfo {
        JobInfo {
            job_id: self.request.job_id.clone(),
            status: self.status.as_str().to_string(),
            endpoint: self.request.endpoint.clone(),
            submit_tool: self.request.submit_tool.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}
