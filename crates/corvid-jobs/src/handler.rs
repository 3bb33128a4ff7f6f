//! Job handler contract.

use async_trait::async_trait;

use corvid_core::{Job, JobPayload, JobType, Result, RunStats};

/// Progress callback type for job handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to a handler for one job attempt.
pub struct JobContext {
    /// The job being processed.
    pub job: Job,
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            progress_callback: None,
        }
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report coarse progress (0..=100) to the worker's event bus.
    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    pub fn payload(&self) -> &JobPayload {
        &self.job.payload
    }
}

/// One implementation per [`JobType`].
///
/// A handler returns the attempt's [`RunStats`] on success. On failure the
/// worker inspects [`corvid_core::Error::is_retryable`] to decide between a
/// delayed retry and the dead-letter queue; handlers never schedule their own
/// retries.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute one attempt.
    async fn run(&self, ctx: JobContext) -> Result<RunStats>;
}
