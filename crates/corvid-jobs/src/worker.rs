//! Job worker: claim, admission control, dispatch, and failure resolution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use corvid_core::{
    defaults, Error, Job, JobRepository, JobRunStatus, JobType, Result, ThrottleRepository,
};

use crate::handler::{JobContext, JobHandler};

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity recorded on claimed jobs, for stale-lock diagnosis.
    pub worker_id: String,
    /// Polling interval when the queue is empty.
    pub poll_interval_ms: u64,
    /// Running jobs locked longer than this are forced back to pending.
    pub lock_timeout_secs: u64,
    /// Base delay of the exponential retry backoff.
    pub backoff_base_ms: u64,
    /// Upper bound on any retry delay.
    pub backoff_cap_ms: u64,
    /// Concurrency slots per (connector, account).
    pub slot_max_per_account: i32,
    /// Rate-limit token bucket capacity per (connector, account).
    pub rate_bucket_capacity: f64,
    /// Rate-limit bucket refill rate, tokens per second.
    pub rate_refill_per_sec: f64,
    /// Whether to process jobs at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            poll_interval_ms: defaults::WORKER_POLL_INTERVAL_MS,
            lock_timeout_secs: defaults::JOB_LOCK_TIMEOUT_SECS,
            backoff_base_ms: defaults::BACKOFF_BASE_MS,
            backoff_cap_ms: defaults::BACKOFF_CAP_MS,
            slot_max_per_account: defaults::SLOT_MAX_PER_ACCOUNT,
            rate_bucket_capacity: defaults::RATE_BUCKET_CAPACITY,
            rate_refill_per_sec: defaults::RATE_REFILL_PER_SEC,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_POLL_INTERVAL_MS` | `5000` | Polling interval when queue is empty |
    /// | `JOB_LOCK_TIMEOUT_SECS` | `300` | Stale-lock recovery threshold |
    /// | `JOB_BACKOFF_BASE_MS` | `1000` | Base retry backoff delay |
    /// | `SYNC_SLOT_MAX_PER_ACCOUNT` | `1` | Concurrency slots per account |
    /// | `SYNC_RATE_BUCKET_CAPACITY` | `5.0` | Rate-limit bucket capacity |
    /// | `SYNC_RATE_REFILL_PER_SEC` | `0.5` | Rate-limit refill per second |
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            enabled: std::env::var("JOB_WORKER_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            poll_interval_ms: env_parse("JOB_POLL_INTERVAL_MS", base.poll_interval_ms),
            lock_timeout_secs: env_parse("JOB_LOCK_TIMEOUT_SECS", base.lock_timeout_secs),
            backoff_base_ms: env_parse("JOB_BACKOFF_BASE_MS", base.backoff_base_ms),
            slot_max_per_account: env_parse(
                "SYNC_SLOT_MAX_PER_ACCOUNT",
                base.slot_max_per_account,
            )
            .max(1),
            rate_bucket_capacity: env_parse("SYNC_RATE_BUCKET_CAPACITY", base.rate_bucket_capacity),
            rate_refill_per_sec: env_parse("SYNC_RATE_REFILL_PER_SEC", base.rate_refill_per_sec),
            ..base
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_backoff(mut self, base_ms: u64, cap_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_cap_ms = cap_ms;
        self
    }

    pub fn with_slot_max(mut self, max: i32) -> Self {
        self.slot_max_per_account = max;
        self
    }

    pub fn with_rate_limit(mut self, capacity: f64, refill_per_sec: f64) -> Self {
        self.rate_bucket_capacity = capacity;
        self.rate_refill_per_sec = refill_per_sec;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Retry delay for a failed attempt (1-based): exponential in the attempt
/// number, jittered up to 25%, capped.
pub fn backoff_delay_ms(base_ms: u64, cap_ms: u64, attempt: i32) -> u64 {
    let exp = (attempt - 1).clamp(0, 20) as u32;
    let raw = base_ms.saturating_mul(1u64 << exp).min(cap_ms);
    if raw == 0 {
        return 0;
    }
    let jitter = rand::thread_rng().gen_range(0..=raw / 4);
    raw.saturating_add(jitter).min(cap_ms)
}

/// Event emitted by the job worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    WorkerStarted,
    WorkerStopped,
    JobStarted {
        job_id: Uuid,
        job_type: JobType,
        attempt: i32,
    },
    JobProgress {
        job_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    JobCompleted {
        job_id: Uuid,
        job_type: JobType,
    },
    /// Admission control pushed the job's eligibility into the future; no
    /// attempt was charged.
    JobThrottled {
        job_id: Uuid,
        reason: &'static str,
    },
    JobRetried {
        job_id: Uuid,
        attempt: i32,
        error: String,
    },
    JobDeadLettered {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("failed to send shutdown signal".into()))
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Job worker that processes jobs from the durable queue.
pub struct JobWorker {
    jobs: Arc<dyn JobRepository>,
    throttle: Arc<dyn ThrottleRepository>,
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        throttle: Arc<dyn ThrottleRepository>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            jobs,
            throttle,
            handlers: HashMap::new(),
            config,
            event_tx,
        }
    }

    /// Register a handler. Jobs of an unregistered type are dead-lettered.
    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        let job_type = handler.job_type();
        debug!(
            subsystem = "jobs",
            component = "worker",
            job_type = %job_type,
            "registered job handler"
        );
        self.handlers.insert(job_type, handler);
        self
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub async fn pending_count(&self) -> Result<i64> {
        self.jobs.pending_count().await
    }

    /// Start the worker loop and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!(
                subsystem = "jobs",
                component = "worker",
                "job worker is disabled, not starting"
            );
            return;
        }

        info!(
            subsystem = "jobs",
            component = "worker",
            worker_id = %self.config.worker_id,
            poll_interval_ms = self.config.poll_interval_ms,
            "job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            match self
                .jobs
                .release_stale(Duration::from_secs(self.config.lock_timeout_secs))
                .await
            {
                Ok(0) => {}
                Ok(recovered) => warn!(
                    subsystem = "jobs",
                    component = "worker",
                    recovered,
                    "recovered stale job locks"
                ),
                Err(e) => error!(
                    subsystem = "jobs",
                    component = "worker",
                    error = %e,
                    "stale lock recovery failed"
                ),
            }

            // Drain the queue, then sleep once it is empty.
            let mut processed_any = false;
            loop {
                match self.process_one().await {
                    Ok(Some(_)) => processed_any = true,
                    Ok(None) => break,
                    Err(e) => {
                        error!(
                            subsystem = "jobs",
                            component = "worker",
                            error = %e,
                            "job processing cycle failed"
                        );
                        break;
                    }
                }
            }

            if !processed_any {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = sleep(poll_interval) => {}
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!(
            subsystem = "jobs",
            component = "worker",
            worker_id = %self.config.worker_id,
            "job worker stopped"
        );
    }

    /// Claim and process at most one job. Returns the claimed job's id, or
    /// `None` when nothing was eligible. Exposed for deterministic tests.
    pub async fn process_one(&self) -> Result<Option<Uuid>> {
        let Some(job) = self.jobs.claim_next(&self.config.worker_id).await? else {
            return Ok(None);
        };
        let job_id = job.id;

        // Admission control for throttled work. A rejected job is released
        // back to pending with a future eligibility time; no attempt charged.
        let throttle_key = job.throttle_key().map(|(c, a)| (c, a.to_string()));
        if let Some((connector, account_id)) = &throttle_key {
            if !self
                .throttle
                .acquire_slot(*connector, account_id, self.config.slot_max_per_account)
                .await?
            {
                self.defer(job_id, defaults::SLOT_RETRY_DELAY_SECS, "slot_busy")
                    .await?;
                return Ok(Some(job_id));
            }
            if !self
                .throttle
                .consume_token(
                    *connector,
                    account_id,
                    self.config.rate_bucket_capacity,
                    self.config.rate_refill_per_sec,
                )
                .await?
            {
                self.throttle.release_slot(*connector, account_id).await?;
                self.defer(job_id, defaults::RATE_RETRY_DELAY_SECS, "rate_limited")
                    .await?;
                return Ok(Some(job_id));
            }
        }

        let outcome = self.execute(job).await;

        // The slot is released no matter how the attempt ended.
        if let Some((connector, account_id)) = &throttle_key {
            if let Err(e) = self.throttle.release_slot(*connector, account_id).await {
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job_id,
                    error = %e,
                    "failed to release concurrency slot"
                );
            }
        }

        outcome?;
        Ok(Some(job_id))
    }

    async fn defer(&self, job_id: Uuid, delay_secs: u64, reason: &'static str) -> Result<()> {
        let next = Utc::now() + chrono::Duration::seconds(delay_secs as i64);
        self.jobs.reschedule(job_id, next).await?;
        debug!(
            subsystem = "jobs",
            component = "worker",
            job_id = %job_id,
            reason,
            delay_secs,
            "job deferred by admission control"
        );
        let _ = self.event_tx.send(WorkerEvent::JobThrottled { job_id, reason });
        Ok(())
    }

    /// Run one attempt of a claimed job and resolve its outcome.
    async fn execute(&self, job: Job) -> Result<()> {
        let started = Instant::now();
        let job_id = job.id;
        let job_type = job.job_type;
        let attempt = job.attempts + 1;
        let max_attempts = job.max_attempts;

        let run = self.jobs.start_run(job_id, attempt).await?;
        info!(
            subsystem = "jobs",
            component = "worker",
            job_id = %job_id,
            job_type = %job_type,
            attempt,
            "job attempt started"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            job_type,
            attempt,
        });

        let result = match self.handlers.get(&job_type).cloned() {
            Some(handler) => {
                let event_tx = self.event_tx.clone();
                let ctx = JobContext::new(job).with_progress_callback(move |percent, message| {
                    let _ = event_tx.send(WorkerEvent::JobProgress {
                        job_id,
                        percent,
                        message: message.map(String::from),
                    });
                });
                // Spawned so a panicking handler surfaces as a JoinError
                // instead of taking down the worker loop.
                match tokio::spawn(async move { handler.run(ctx).await }).await {
                    Ok(result) => result,
                    Err(join_err) => Err(Error::Internal(format!("handler panicked: {join_err}"))),
                }
            }
            None => Err(Error::UnknownHandler(job_type.as_str().to_string())),
        };

        match result {
            Ok(stats) => {
                self.jobs
                    .finish_run(run.id, JobRunStatus::Completed, Some(&stats), None)
                    .await?;
                self.jobs.complete(job_id).await?;
                info!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job_id,
                    job_type = %job_type,
                    attempt,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "job completed"
                );
                let _ = self
                    .event_tx
                    .send(WorkerEvent::JobCompleted { job_id, job_type });
            }
            Err(e) => {
                let message = e.to_string();
                let code = e.code();
                self.jobs
                    .finish_run(run.id, JobRunStatus::Failed, None, Some((&message, code)))
                    .await?;

                if e.is_retryable() && attempt < max_attempts {
                    let mut delay_ms =
                        backoff_delay_ms(self.config.backoff_base_ms, self.config.backoff_cap_ms, attempt);
                    if let Error::RateLimited {
                        retry_after_secs: Some(secs),
                    } = &e
                    {
                        delay_ms = delay_ms.max(secs.saturating_mul(1000));
                    }
                    let next = Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);
                    self.jobs.retry_later(job_id, next, &message, code).await?;
                    warn!(
                        subsystem = "jobs",
                        component = "worker",
                        job_id = %job_id,
                        job_type = %job_type,
                        attempt,
                        delay_ms,
                        error = %message,
                        "job attempt failed, retrying"
                    );
                    let _ = self.event_tx.send(WorkerEvent::JobRetried {
                        job_id,
                        attempt,
                        error: message,
                    });
                } else {
                    self.jobs.dead_letter(job_id, &message, code).await?;
                    error!(
                        subsystem = "jobs",
                        component = "worker",
                        job_id = %job_id,
                        job_type = %job_type,
                        attempt,
                        error_code = code,
                        error = %message,
                        "job dead-lettered"
                    );
                    let _ = self.event_tx.send(WorkerEvent::JobDeadLettered {
                        job_id,
                        job_type,
                        error: message,
                    });
                }
            }
        }

        Ok(())
    }
}
