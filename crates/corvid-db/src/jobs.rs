//! SQLite job queue repository.
//!
//! Claiming relies on SQLite serializing writes: the claim statement updates
//! the single row selected by an embedded subquery and returns it, so two
//! workers can never lock the same job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use uuid::Uuid;

use corvid_core::{
    new_v7, ConnectorType, Error, Job, JobPayload, JobRepository, JobRun, JobRunStatus, JobStatus,
    JobType, NewJob, QueueStats, Result, RunStats,
};

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str = "id, job_type, owner_user_id, connector, scope_id, payload, \
     idempotency_key, priority, status, attempts, max_attempts, locked_by, locked_at, \
     next_run_at, error_message, error_code, created_at, completed_at";

fn parse_job(row: &SqliteRow) -> Result<Job> {
    let job_type_raw: String = row.try_get("job_type")?;
    let job_type = JobType::from_str_loose(&job_type_raw)
        .ok_or_else(|| Error::Internal(format!("unknown job type in storage: {job_type_raw}")))?;

    let status_raw: String = row.try_get("status")?;
    let status = JobStatus::from_str_loose(&status_raw)
        .ok_or_else(|| Error::Internal(format!("unknown job status in storage: {status_raw}")))?;

    let connector = row
        .try_get::<Option<String>, _>("connector")?
        .map(|s| {
            ConnectorType::from_str_loose(&s)
                .ok_or_else(|| Error::Internal(format!("unknown connector in storage: {s}")))
        })
        .transpose()?;

    let payload_raw: String = row.try_get("payload")?;
    let payload: JobPayload = serde_json::from_str(&payload_raw)?;

    Ok(Job {
        id: row.try_get("id")?,
        job_type,
        owner_user_id: row.try_get("owner_user_id")?,
        connector,
        scope_id: row.try_get("scope_id")?,
        payload,
        idempotency_key: row.try_get("idempotency_key")?,
        priority: row.try_get("priority")?,
        status,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        locked_by: row.try_get("locked_by")?,
        locked_at: row.try_get("locked_at")?,
        next_run_at: row.try_get("next_run_at")?,
        error_message: row.try_get("error_message")?,
        error_code: row.try_get("error_code")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn parse_run(row: &SqliteRow) -> Result<JobRun> {
    let status_raw: String = row.try_get("status")?;
    let status = JobRunStatus::from_str_loose(&status_raw)
        .ok_or_else(|| Error::Internal(format!("unknown run status in storage: {status_raw}")))?;

    let stats = row
        .try_get::<Option<String>, _>("stats")?
        .map(|s| serde_json::from_str::<RunStats>(&s))
        .transpose()
        .map_err(Error::from)?;

    Ok(JobRun {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        attempt: row.try_get("attempt")?,
        status,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        stats,
        error_message: row.try_get("error_message")?,
        error_code: row.try_get("error_code")?,
    })
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn enqueue(&self, new: NewJob) -> Result<Job> {
        let id = new_v7();
        let job_type = new.payload.job_type();
        let connector = new.payload.connector();
        let scope_id = match &new.payload {
            JobPayload::Sync { scope_id, .. } => *scope_id,
            _ => None,
        };
        let payload_json = serde_json::to_string(&new.payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, owner_user_id, connector, scope_id, payload,
                              idempotency_key, priority, status, attempts, max_attempts,
                              next_run_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', 0, ?9, ?10, ?11)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(job_type.as_str())
        .bind(new.owner_user_id)
        .bind(connector.map(|c| c.as_str()))
        .bind(scope_id)
        .bind(&payload_json)
        .bind(&new.idempotency_key)
        .bind(new.priority)
        .bind(new.max_attempts)
        .bind(new.not_before)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return self.get(id).await;
        }

        // Key collision: return the existing job untouched.
        let key = new
            .idempotency_key
            .as_deref()
            .ok_or_else(|| Error::Internal("job insert lost without idempotency key".into()))?;
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE idempotency_key = ?1"
        ))
        .bind(key)
        .fetch_one(&self.pool)
        .await?;
        parse_job(&row)
    }

    async fn get(&self, job_id: Uuid) -> Result<Job> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        parse_job(&row)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'running', locked_by = ?1, locked_at = ?2
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending'
                  AND (next_run_at IS NULL OR next_run_at <= ?2)
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(parse_job).transpose()
    }

    async fn release_stale(&self, lock_timeout: Duration) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::seconds(lock_timeout.as_secs() as i64);
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', locked_by = NULL, locked_at = NULL
            WHERE status = 'running' AND locked_at IS NOT NULL AND locked_at <= ?1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reschedule(&self, job_id: Uuid, next_run_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', locked_by = NULL, locked_at = NULL, next_run_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(job_id)
        .bind(next_run_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn start_run(&self, job_id: Uuid, attempt: i32) -> Result<JobRun> {
        let id = new_v7();
        let row = sqlx::query(
            r#"
            INSERT INTO job_runs (id, job_id, attempt, status, started_at)
            VALUES (?1, ?2, ?3, 'running', ?4)
            RETURNING id, job_id, attempt, status, started_at, finished_at, stats,
                      error_message, error_code
            "#,
        )
        .bind(id)
        .bind(job_id)
        .bind(attempt)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        parse_run(&row)
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: JobRunStatus,
        stats: Option<&RunStats>,
        error: Option<(&str, &str)>,
    ) -> Result<()> {
        let stats_json = stats.map(serde_json::to_string).transpose()?;
        let (error_message, error_code) = match error {
            Some((msg, code)) => (Some(msg), Some(code)),
            None => (None, None),
        };
        sqlx::query(
            r#"
            UPDATE job_runs
            SET status = ?2, finished_at = ?3, stats = ?4, error_message = ?5, error_code = ?6
            WHERE id = ?1
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(stats_json)
        .bind(error_message)
        .bind(error_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', locked_by = NULL, locked_at = NULL,
                attempts = attempts + 1, error_message = NULL, error_code = NULL,
                completed_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(job_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retry_later(
        &self,
        job_id: Uuid,
        next_run_at: DateTime<Utc>,
        error: &str,
        error_code: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', locked_by = NULL, locked_at = NULL,
                attempts = attempts + 1, next_run_at = ?2,
                error_message = ?3, error_code = ?4
            WHERE id = ?1
            "#,
        )
        .bind(job_id)
        .bind(next_run_at)
        .bind(error)
        .bind(error_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dead_letter(&self, job_id: Uuid, error: &str, error_code: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'dead_letter', locked_by = NULL, locked_at = NULL,
                attempts = attempts + 1, error_message = ?2, error_code = ?3
            WHERE id = ?1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(error_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_dead_letters(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'dead_letter' ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_job).collect()
    }

    async fn retry_dead_letter(&self, job_id: Uuid) -> Result<Job> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'pending', attempts = 0, locked_by = NULL, locked_at = NULL,
                next_run_at = NULL, error_message = NULL, error_code = NULL
            WHERE id = ?1 AND status = 'dead_letter'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => parse_job(&row),
            None => {
                // Distinguish a missing job from one in the wrong state.
                let job = self.get(job_id).await?;
                Err(Error::InvalidInput(format!(
                    "job {job_id} is {}, not dead_letter",
                    job.status.as_str()
                )))
            }
        }
    }

    async fn runs_for_job(&self, job_id: Uuid) -> Result<Vec<JobRun>> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, attempt, status, started_at, finished_at, stats,
                   error_message, error_code
            FROM job_runs WHERE job_id = ?1
            ORDER BY started_at ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_run).collect()
    }

    async fn pending_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in &rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            match status.as_str() {
                "pending" => stats.pending = n,
                "running" => stats.running = n,
                "completed" => stats.completed = n,
                "failed" => stats.failed = n,
                "dead_letter" => stats.dead_letter = n,
                _ => {}
            }
        }
        Ok(stats)
    }
}
