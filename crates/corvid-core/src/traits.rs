//! Repository trait definitions.
//!
//! Storage is consumed through these interfaces only; `corvid-db` provides
//! the SQLite implementation. Correctness of the worker runner depends on
//! [`JobRepository::claim_next`] being atomic with respect to concurrent
//! claimers (a conditional update; relational stores provide this via
//! `UPDATE ... RETURNING` on a subselect or `SELECT ... FOR UPDATE SKIP
//! LOCKED`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ActiveChunk, Chunk, ConnectorType, Job, JobRun, JobRunStatus, NewChunk, NewJob, NewSource,
    NewSyncAudit, QueueStats, RunStats, Source, SourceVersion, SyncAudit, SyncScope,
};

/// Durable job queue operations.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Enqueue a job. When the idempotency key matches an existing job, the
    /// existing job is returned unchanged: no new row, no re-execution.
    async fn enqueue(&self, new: NewJob) -> Result<Job>;

    async fn get(&self, job_id: Uuid) -> Result<Job>;

    /// Atomically claim the next eligible pending job (priority desc, then
    /// age) and lock it for `worker_id`. At most one worker can win a job.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>>;

    /// Force-unlock running jobs whose lock age exceeds `lock_timeout` back
    /// to pending. Returns the number of jobs recovered.
    async fn release_stale(&self, lock_timeout: Duration) -> Result<u64>;

    /// Release a claim and push the job's eligibility into the future
    /// without charging an attempt (admission-control reschedule).
    async fn reschedule(&self, job_id: Uuid, next_run_at: DateTime<Utc>) -> Result<()>;

    /// Record the start of an attempt (1-based) for a claimed job.
    async fn start_run(&self, job_id: Uuid, attempt: i32) -> Result<JobRun>;

    /// Record the final state of an attempt.
    async fn finish_run(
        &self,
        run_id: Uuid,
        status: JobRunStatus,
        stats: Option<&RunStats>,
        error: Option<(&str, &str)>,
    ) -> Result<()>;

    /// Mark a job completed and clear its lock.
    async fn complete(&self, job_id: Uuid) -> Result<()>;

    /// Record a retryable failure: increment attempts, clear the lock, and
    /// return the job to pending with the given eligibility time.
    async fn retry_later(
        &self,
        job_id: Uuid,
        next_run_at: DateTime<Utc>,
        error: &str,
        error_code: &str,
    ) -> Result<()>;

    /// Terminal failure requiring operator intervention.
    async fn dead_letter(&self, job_id: Uuid, error: &str, error_code: &str) -> Result<()>;

    async fn list_dead_letters(&self) -> Result<Vec<Job>>;

    /// The only supported manual recovery path: reset attempts to zero,
    /// clear lock and eligibility time, return the job to pending.
    async fn retry_dead_letter(&self, job_id: Uuid) -> Result<Job>;

    async fn runs_for_job(&self, job_id: Uuid) -> Result<Vec<JobRun>>;

    async fn pending_count(&self) -> Result<i64>;

    async fn queue_stats(&self) -> Result<QueueStats>;
}

/// Sources, versions, chunks, and sync scopes.
#[async_trait]
pub trait CorpusRepository: Send + Sync {
    /// Insert or update a source by its natural key
    /// (workspace, external id, connector).
    async fn upsert_source(&self, new: NewSource) -> Result<Source>;

    async fn get_source(&self, source_id: Uuid) -> Result<Option<Source>>;

    async fn find_source(
        &self,
        workspace_id: Uuid,
        external_id: &str,
        connector: ConnectorType,
    ) -> Result<Option<Source>>;

    /// Sources a sync pass owns: created by this user for this connector.
    async fn list_sources_for_user(
        &self,
        user_id: Uuid,
        connector: ConnectorType,
    ) -> Result<Vec<Source>>;

    /// Delete a source and cascade its versions and chunks.
    async fn delete_source(&self, source_id: Uuid) -> Result<()>;

    /// Insert the next version of a source in the inactive state. A version
    /// becomes visible to retrieval only through [`Self::activate_version`],
    /// called after all of its chunks are persisted, so readers keep serving
    /// the prior version until the new one is complete.
    async fn create_version(
        &self,
        source_id: Uuid,
        content: &str,
        content_hash: &str,
    ) -> Result<SourceVersion>;

    /// Atomically deactivate all other versions of the owning source and
    /// activate this one; readers never observe two active versions.
    async fn activate_version(&self, version_id: Uuid) -> Result<()>;

    async fn active_version(&self, source_id: Uuid) -> Result<Option<SourceVersion>>;

    async fn versions_for_source(&self, source_id: Uuid) -> Result<Vec<SourceVersion>>;

    async fn insert_chunks(&self, chunks: &[NewChunk]) -> Result<Vec<Chunk>>;

    async fn chunks_for_version(&self, version_id: Uuid) -> Result<Vec<Chunk>>;

    /// All chunks belonging to active versions in a workspace, joined with
    /// source metadata. Chunks of deactivated versions are never returned.
    async fn active_chunks(&self, workspace_id: Uuid) -> Result<Vec<ActiveChunk>>;

    async fn get_scope(&self, user_id: Uuid, connector: ConnectorType)
        -> Result<Option<SyncScope>>;

    async fn save_scope(&self, scope: &SyncScope) -> Result<()>;
}

/// Concurrency slots and rate-limit buckets, keyed by (connector, account).
#[async_trait]
pub trait ThrottleRepository: Send + Sync {
    /// Try to take one concurrency slot; false when the key is at `max`.
    async fn acquire_slot(
        &self,
        connector: ConnectorType,
        account_id: &str,
        max: i32,
    ) -> Result<bool>;

    /// Release a slot unconditionally (floors at zero).
    async fn release_slot(&self, connector: ConnectorType, account_id: &str) -> Result<()>;

    /// Current held-slot count for a key.
    async fn slot_count(&self, connector: ConnectorType, account_id: &str) -> Result<i32>;

    /// Try to consume one rate-limit token. The bucket refills lazily at
    /// `refill_per_sec` up to `capacity`.
    async fn consume_token(
        &self,
        connector: ConnectorType,
        account_id: &str,
        capacity: f64,
        refill_per_sec: f64,
    ) -> Result<bool>;
}

/// Sync pass audit trail.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn record_sync(&self, audit: NewSyncAudit) -> Result<SyncAudit>;

    async fn recent(&self, limit: i64) -> Result<Vec<SyncAudit>>;
}
