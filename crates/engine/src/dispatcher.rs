use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use mcp_queue_proto::{JobRequest, Message, QueueStatus};

use crate::config::{QueueConfig, StatusSets};
use crate::job::{unix_now, ClientNotifier, Job, JobStatus};
use crate::rate::TokenBucket;
use crate::runner::{run_mock_job, run_remote_job};
use crate::wal::{Wal, WalRecord};

/// Queue, worker pool, and admission gates. Owns every [`Job`] from
/// submission to its terminal state.
///
/// Admission order per worker: global token bucket, endpoint bucket,
/// start-spacing lock, then a concurrency-pool slot. The spacing lock is
/// the only one held across a sleep, which strictly serialises starts.
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
    workers: Mutex<JoinSet<()>>,
}

struct DispatcherInner {
    max_concurrent: usize,
    start_interval: f64,
    job_timeout: f64,
    statuses: StatusSets,
    http: reqwest::Client,
    wal: Wal,
    global_bucket: TokenBucket,
    endpoint_buckets: HashMap<String, TokenBucket>,
    jobs: Mutex<HashMap<String, Job>>,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    slots: Semaphore,
    completed: AtomicU64,
    failed: AtomicU64,
    running: AtomicBool,
    last_start: Mutex<Option<Instant>>,
}

impl Dispatcher {
    /// Build a dispatcher from the daemon configuration. Workers are not
    /// started yet; call [`Dispatcher::start`].
    pub fn new(config: &QueueConfig, wal: Wal) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("build http client")?;
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let endpoint_buckets = config
            .endpoint_rates
            .iter()
            .map(|(endpoint, rate)| {
                (
                    endpoint.clone(),
                    TokenBucket::new(
                        rate.rate_per_min.unwrap_or(config.global_rate_per_min),
                        rate.burst.unwrap_or(config.global_burst),
                    ),
                )
            })
            .collect();
        let max_concurrent = config.max_concurrent.max(1);

        Ok(Self {
            inner: Arc::new(DispatcherInner {
                max_concurrent,
                start_interval: config.start_interval,
                job_timeout: config.job_timeout,
                statuses: config.status_sets(),
                http,
                wal,
                global_bucket: TokenBucket::new(config.global_rate_per_min, config.global_burst),
                endpoint_buckets,
                jobs: Mutex::new(HashMap::new()),
                queue_tx,
                queue_rx: Mutex::new(queue_rx),
                slots: Semaphore::new(max_concurrent),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                running: AtomicBool::new(true),
                last_start: Mutex::new(None),
            }),
            workers: Mutex::new(JoinSet::new()),
        })
    }

    /// Spawn the worker tasks, one per concurrency slot.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        for worker_id in 0..self.inner.max_concurrent {
            let inner = self.inner.clone();
            workers.spawn(worker(inner, worker_id));
        }
        info!("started {} worker(s)", self.inner.max_concurrent);
    }

    /// Stop accepting work, cancel the workers, and await them. Jobs in
    /// flight are abandoned mid-transaction; their WAL trail ends at
    /// `start` and is reported at the next daemon startup.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let mut workers = self.workers.lock().await;
        workers.abort_all();
        while workers.join_next().await.is_some() {}
        info!("all workers stopped");
    }

    /// Register a job and enqueue it. The job is in the table and the
    /// WAL before the queue ever sees its id.
    pub async fn submit(
        &self,
        request: JobRequest,
        notifier: Option<ClientNotifier>,
    ) -> anyhow::Result<String> {
        let job_id = request.job_id.clone();
        let job = Job::new(request, notifier);
        let record = WalRecord::submit(job.to_record());
        let queued = {
            let mut jobs = self.inner.jobs.lock().await;
            jobs.insert(job_id.clone(), job);
            jobs.values()
                .filter(|j| j.status == JobStatus::Pending)
                .count()
        };
        self.inner.wal.append(&record).await?;
        self.inner
            .queue_tx
            .send(job_id.clone())
            .map_err(|_| anyhow::anyhow!("job queue closed"))?;
        info!("job {job_id} submitted (queued: {queued})");
        Ok(job_id)
    }

    /// Snapshot the counters and the per-job listing, oldest first.
    pub async fn status(&self) -> QueueStatus {
        let jobs = self.inner.jobs.lock().await;
        let running = jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .count();
        let queued = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .count();
        let mut infos: Vec<_> = jobs.values().map(Job::info).collect();
        infos.sort_by(|a, b| {
            a.created_at
                .partial_cmp(&b.created_at)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        QueueStatus {
            running,
            queued,
            completed: self.inner.completed.load(Ordering::SeqCst),
            failed: self.inner.failed.load(Ordering::SeqCst),
            jobs: infos,
        }
    }
}

async fn worker(inner: Arc<DispatcherInner>, worker_id: usize) {
    debug!("worker {worker_id} started");
    while inner.running.load(Ordering::SeqCst) {
        // 1-second poll so a stop request is noticed promptly.
        let job_id = {
            let mut queue = inner.queue_rx.lock().await;
            match tokio::time::timeout(Duration::from_secs(1), queue.recv()).await {
                Ok(Some(job_id)) => job_id,
                Ok(None) => break,
                Err(_) => continue,
            }
        };

        let endpoint = {
            let jobs = inner.jobs.lock().await;
            match jobs.get(&job_id) {
                Some(job) => job.request.endpoint.clone(),
                None => {
                    warn!("job {job_id} not found, skipping");
                    continue;
                }
            }
        };

        let waited = inner.global_bucket.acquire().await;
        if waited > Duration::ZERO {
            info!("rate limit: waited {:.1}s", waited.as_secs_f64());
        }
        if let Some(bucket) = inner.endpoint_buckets.get(&endpoint) {
            let waited = bucket.acquire().await;
            if waited > Duration::ZERO {
                info!(
                    "endpoint rate limit ({endpoint}): waited {:.1}s",
                    waited.as_secs_f64()
                );
            }
        }

        {
            // Held through the spacing sleep: starts are strictly
            // serialised, spacing included.
            let mut last_start = inner.last_start.lock().await;
            if let Some(prev) = *last_start {
                let spacing = Duration::from_secs_f64(inner.start_interval.max(0.0));
                let elapsed = prev.elapsed();
                if elapsed < spacing {
                    let wait = spacing - elapsed;
                    debug!("start interval: waiting {:.2}s", wait.as_secs_f64());
                    tokio::time::sleep(wait).await;
                }
            }
            *last_start = Some(Instant::now());
        }

        let Ok(permit) = inner.slots.acquire().await else {
            break;
        };
        inner.execute(&job_id).await;
        drop(permit);
    }
    debug!("worker {worker_id} stopped");
}

impl DispatcherInner {
    async fn execute(&self, job_id: &str) {
        // WAL first, state second.
        if let Err(err) = self.wal.append(&WalRecord::start(job_id)).await {
            warn!("WAL start append failed for {job_id}: {err:#}");
        }
        let request = {
            let mut jobs = self.jobs.lock().await;
            let Some(job) = jobs.get_mut(job_id) else {
                warn!("job {job_id} vanished before execution");
                return;
            };
            job.status = JobStatus::Running;
            job.started_at = Some(unix_now());
            job.request.clone()
        };
        info!("executing job {job_id}");

        let deadline = Duration::from_secs_f64(self.job_timeout.max(0.0));
        let transaction = async {
            if request.endpoint.starts_with("mock://") {
                Ok(run_mock_job(&request).await)
            } else {
                run_remote_job(&self.http, &request, &self.statuses).await
            }
        };

        match tokio::time::timeout(deadline, transaction).await {
            Ok(Ok(result)) => self.finish(job_id, Ok(result)).await,
            Ok(Err(err)) => self.finish(job_id, Err(err.to_string())).await,
            Err(_) => {
                self.finish(
                    job_id,
                    Err(format!("Job timed out after {}s", self.job_timeout)),
                )
                .await
            }
        }
    }

    async fn finish(&self, job_id: &str, outcome: Result<Value, String>) {
        let record = match &outcome {
            Ok(result) => WalRecord::complete(job_id, result.clone()),
            Err(error) => WalRecord::fail(job_id, error.clone()),
        };
        if let Err(err) = self.wal.append(&record).await {
            warn!("WAL terminal append failed for {job_id}: {err:#}");
        }

        let (notifier, message) = {
            let mut jobs = self.jobs.lock().await;
            let Some(job) = jobs.get_mut(job_id) else {
                warn!("job {job_id} vanished before completion");
                return;
            };
            job.completed_at = Some(unix_now());
            match outcome {
                Ok(result) => {
                    job.status = JobStatus::Completed;
                    job.result = Some(result.clone());
                    self.completed.fetch_add(1, Ordering::SeqCst);
                    info!("job {job_id} completed");
                    (
                        job.notifier.clone(),
                        Message::JobCompleted {
                            job_id: job_id.to_string(),
                            success: true,
                            result: Some(result),
                        },
                    )
                }
                Err(error) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(error.clone());
                    self.failed.fetch_add(1, Ordering::SeqCst);
                    error!("job {job_id} failed: {error}");
                    (
                        job.notifier.clone(),
                        Message::JobFailed {
                            job_id: job_id.to_string(),
                            success: false,
                            error: Some(error),
                        },
                    )
                }
            }
        };

        // Best effort only; a vanished client never stalls a worker.
        if let Some(notifier) = notifier {
            if notifier.send(message).is_err() {
                warn!("failed to notify client for job {job_id}");
            }
        }
    }
}
