use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use mcp_queue_proto::JobRequest;

const CONFIG_FILE_NAME: &str = "queue_config.json";

fn default_completed_statuses() -> Vec<String> {
    ["completed", "done", "success", "finished", "ready"]
        .map(String::from)
        .to_vec()
}

fn default_failed_statuses() -> Vec<String> {
    ["failed", "error", "cancelled", "timeout"]
        .map(String::from)
        .to_vec()
}

/// Per-endpoint rate override; missing fields fall back to the global
/// rate and burst.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointRate {
    /// Tokens added per minute for this endpoint.
    #[serde(default)]
    pub rate_per_min: Option<f64>,
    /// Bucket capacity for this endpoint.
    #[serde(default)]
    pub burst: Option<u32>,
}

/// Daemon configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Concurrency pool size and worker count.
    pub max_concurrent: usize,
    /// Minimum seconds between successive job starts.
    pub start_interval: f64,
    /// Default per-job status-poll period in seconds.
    pub poll_interval: f64,
    /// Global token-bucket refill per minute.
    pub global_rate_per_min: f64,
    /// Global token-bucket capacity.
    pub global_burst: u32,
    /// Per-endpoint rate gates.
    pub endpoint_rates: HashMap<String, EndpointRate>,
    /// Hard per-job deadline in seconds.
    pub job_timeout: f64,
    /// Per-connection read idle timeout in seconds; `0` disables.
    pub client_idle_timeout: f64,
    /// Remote status strings that mean "done", matched case-insensitively.
    pub completed_statuses: Vec<String>,
    /// Remote status strings that mean "failed", matched case-insensitively.
    pub failed_statuses: Vec<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            start_interval: 1.0,
            poll_interval: 30.0,
            global_rate_per_min: 10.0,
            global_burst: 5,
            endpoint_rates: HashMap::new(),
            job_timeout: 900.0,
            client_idle_timeout: 0.0,
            completed_statuses: default_completed_statuses(),
            failed_statuses: default_failed_statuses(),
        }
    }
}

impl QueueConfig {
    fn normalize(&mut self) {
        if self.max_concurrent == 0 {
            self.max_concurrent = 1;
        }
        if self.poll_interval <= 0.0 {
            self.poll_interval = 30.0;
        }
        if self.completed_statuses.is_empty() {
            self.completed_statuses = default_completed_statuses();
        }
        if self.failed_statuses.is_empty() {
            self.failed_statuses = default_failed_statuses();
        }
    }

    /// Fill the server-side defaults on a freshly received submission:
    /// a generated id when the client sent none, the configured poll
    /// interval when `<= 0`, and `max_polls` derived from the job
    /// timeout (floored at one poll) when unset.
    pub fn apply_submit_defaults(&self, request: &mut JobRequest) {
        if request.job_id.is_empty() {
            request.job_id = uuid::Uuid::new_v4().to_string();
        }
        if request.poll_interval <= 0.0 {
            request.poll_interval = self.poll_interval;
        }
        if request.max_polls == 0 {
            let derived = (self.job_timeout / request.poll_interval) as u32;
            request.max_polls = derived.max(1);
        }
    }

    /// Lowercased terminal-status sets for the runner.
    pub fn status_sets(&self) -> StatusSets {
        StatusSets {
            completed: self
                .completed_statuses
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
            failed: self
                .failed_statuses
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }
}

/// The configured completed/failed status sets, lowercased once so the
/// poll loop can match case-insensitively.
#[derive(Debug, Clone)]
pub struct StatusSets {
    completed: Vec<String>,
    failed: Vec<String>,
}

impl StatusSets {
    /// Does `status` (already lowercased) mean the remote job is done?
    pub fn is_completed(&self, status: &str) -> bool {
        self.completed.iter().any(|s| s == status)
    }

    /// Does `status` (already lowercased) mean the remote job failed?
    pub fn is_failed(&self, status: &str) -> bool {
        self.failed.iter().any(|s| s == status)
    }
}

fn read_config_file(path: &Path) -> Option<serde_json::Map<String, Value>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!("failed to read config {}: {err}", path.display());
            return None;
        }
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(mut map)) => {
            // Keys starting with "//" are comments.
            map.retain(|key, _| !key.starts_with("//"));
            Some(map)
        }
        Ok(_) => {
            warn!("config {} is not a JSON object", path.display());
            None
        }
        Err(err) => {
            warn!("failed to parse config {}: {err}", path.display());
            None
        }
    }
}

/// Load the daemon configuration.
///
/// Merge order: defaults, then the first `queue_config.json` found
/// (explicit path, runtime dir, executable dir, current dir), then the
/// numeric `MCP_QUEUE_*` environment overrides.
pub fn load_config(config_path: Option<&Path>, runtime_dir: Option<&Path>) -> QueueConfig {
    let mut file_config = config_path.and_then(read_config_file);

    if file_config.is_none() {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(dir) = runtime_dir {
            candidates.push(dir.join(CONFIG_FILE_NAME));
        }
        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
        {
            candidates.push(exe_dir.join(CONFIG_FILE_NAME));
        }
        candidates.push(PathBuf::from(CONFIG_FILE_NAME));

        for candidate in candidates {
            if let Some(map) = read_config_file(&candidate) {
                info!("loaded config from {}", candidate.display());
                file_config = Some(map);
                break;
            }
        }
    }

    let mut config = match file_config {
        Some(map) => match serde_json::from_value::<QueueConfig>(Value::Object(map)) {
            Ok(config) => config,
            Err(err) => {
                warn!("invalid config values, using defaults: {err}");
                QueueConfig::default()
            }
        },
        None => {
            info!("no config file found, using defaults");
            QueueConfig::default()
        }
    };

    apply_env_overrides(&mut config);
    config.normalize();
    config
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring non-numeric {name}={raw:?}");
            None
        }
    }
}

fn apply_env_overrides(config: &mut QueueConfig) {
    if let Some(value) = env_number("MCP_QUEUE_MAX_CONCURRENT") {
        config.max_concurrent = value;
    }
    if let Some(value) = env_number("MCP_QUEUE_RATE_PER_MIN") {
        config.global_rate_per_min = value;
    }
    if let Some(value) = env_number("MCP_QUEUE_BURST") {
        config.global_burst = value;
    }
    if let Some(value) = env_number("MCP_QUEUE_JOB_TIMEOUT") {
        config.job_timeout = value;
    }
    if let Some(value) = env_number("MCP_QUEUE_CLIENT_IDLE_TIMEOUT") {
        config.client_idle_timeout = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JobRequest {
        serde_json::from_value(serde_json::json!({
            "endpoint": "https://api.example.com/mcp",
            "submit_tool": "submit",
            "submit_args": {},
            "status_tool": "status",
            "result_tool": "result",
        }))
        .unwrap()
    }

    #[test]
    fn defaults_match_the_documented_table() {
        let config = QueueConfig::default();
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.start_interval, 1.0);
        assert_eq!(config.poll_interval, 30.0);
        assert_eq!(config.global_rate_per_min, 10.0);
        assert_eq!(config.global_burst, 5);
        assert_eq!(config.job_timeout, 900.0);
        assert_eq!(config.client_idle_timeout, 0.0);
        assert!(config.endpoint_rates.is_empty());
    }

    #[test]
    fn file_overrides_merge_over_defaults_and_skip_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue_config.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "// note": "tuned for slow endpoints",
                "max_concurrent": 4,
                "endpoint_rates": {
                    "https://api.example.com/mcp": {"rate_per_min": 3, "burst": 1}
                }
            })
            .to_string(),
        )
        .unwrap();

        let config = load_config(Some(path.as_path()), None);
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.poll_interval, 30.0);
        let rate = &config.endpoint_rates["https://api.example.com/mcp"];
        assert_eq!(rate.rate_per_min, Some(3.0));
        assert_eq!(rate.burst, Some(1));
    }

    #[test]
    fn submit_defaults_fill_id_interval_and_poll_budget() {
        let config = QueueConfig {
            poll_interval: 10.0,
            job_timeout: 95.0,
            ..Default::default()
        };

        let mut req = request();
        config.apply_submit_defaults(&mut req);
        assert!(!req.job_id.is_empty());
        assert_eq!(req.poll_interval, 10.0);
        assert_eq!(req.max_polls, 9);

        // Explicit values survive.
        let mut req = request();
        req.job_id = "mine".into();
        req.poll_interval = 2.0;
        req.max_polls = 7;
        config.apply_submit_defaults(&mut req);
        assert_eq!(req.job_id, "mine");
        assert_eq!(req.poll_interval, 2.0);
        assert_eq!(req.max_polls, 7);
    }

    #[test]
    fn derived_max_polls_is_floored_at_one() {
        let config = QueueConfig {
            job_timeout: 1.0,
            ..Default::default()
        };
        let mut req = request();
        req.poll_interval = 30.0;
        config.apply_submit_defaults(&mut req);
        assert_eq!(req.max_polls, 1);
    }

    #[test]
    fn status_sets_match_case_insensitively() {
        let sets = QueueConfig::default().status_sets();
        assert!(sets.is_completed("completed"));
        assert!(sets.is_completed("ready"));
        assert!(sets.is_failed("cancelled"));
        assert!(!sets.is_completed("in_progress"));

        let custom = QueueConfig {
            completed_statuses: vec!["OK".into()],
            ..Default::default()
        }
        .status_sets();
        assert!(custom.is_completed("ok"));
    }
}
