//! Repository integration tests against an in-memory database.

use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use uuid::Uuid;

use corvid_core::{
    AuditRepository, ConnectorType, CorpusRepository, Error, JobPayload, JobRepository,
    JobRunStatus, JobStatus, JobType, NewChunk, NewJob, NewSource, NewSyncAudit, RunStats,
    SyncMode, SyncScope, ThrottleRepository, Visibility,
};
use corvid_db::Database;

async fn db() -> Database {
    Database::connect_in_memory()
        .await
        .expect("in-memory database")
}

fn sync_payload(account_id: &str) -> JobPayload {
    JobPayload::Sync {
        workspace_id: Uuid::new_v4(),
        connector: ConnectorType::Wiki,
        account_id: account_id.to_string(),
        scope_id: None,
    }
}

fn new_source(workspace_id: Uuid, external_id: &str, content: &str) -> NewSource {
    NewSource {
        workspace_id,
        external_id: external_id.to_string(),
        connector: ConnectorType::Wiki,
        title: format!("Page {external_id}"),
        content_hash: corvid_core::content_hash(content),
        content: content.to_string(),
        visibility: Visibility::Workspace,
        created_by: workspace_id,
    }
}

// ---------------------------------------------------------------------------
// Job queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueue_round_trips_all_fields() {
    let db = db().await;
    let owner = Uuid::new_v4();

    let job = db
        .jobs
        .enqueue(
            NewJob::new(owner, sync_payload("acct-1"))
                .with_priority(3)
                .with_idempotency_key("sync:wiki:acct-1"),
        )
        .await
        .unwrap();

    assert_eq!(job.job_type, JobType::Sync);
    assert_eq!(job.owner_user_id, owner);
    assert_eq!(job.connector, Some(ConnectorType::Wiki));
    assert_eq!(job.priority, 3);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.idempotency_key.as_deref(), Some("sync:wiki:acct-1"));

    let fetched = db.jobs.get(job.id).await.unwrap();
    assert_eq!(fetched.payload, job.payload);
}

#[tokio::test]
async fn enqueue_with_same_idempotency_key_returns_existing_job() {
    let db = db().await;
    let owner = Uuid::new_v4();

    let first = db
        .jobs
        .enqueue(NewJob::new(owner, sync_payload("acct-1")).with_idempotency_key("sync:wiki:a1"))
        .await
        .unwrap();
    let second = db
        .jobs
        .enqueue(NewJob::new(owner, sync_payload("acct-1")).with_idempotency_key("sync:wiki:a1"))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(db.jobs.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn jobs_without_keys_never_collide() {
    let db = db().await;
    let owner = Uuid::new_v4();

    let a = db.jobs.enqueue(NewJob::new(owner, sync_payload("x"))).await.unwrap();
    let b = db.jobs.enqueue(NewJob::new(owner, sync_payload("x"))).await.unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(db.jobs.pending_count().await.unwrap(), 2);
}

#[tokio::test]
async fn claim_prefers_higher_priority() {
    let db = db().await;
    let owner = Uuid::new_v4();

    let low = db
        .jobs
        .enqueue(NewJob::new(owner, sync_payload("low")).with_priority(0))
        .await
        .unwrap();
    let high = db
        .jobs
        .enqueue(NewJob::new(owner, sync_payload("high")).with_priority(5))
        .await
        .unwrap();

    let claimed = db.jobs.claim_next("w1").await.unwrap().unwrap();
    assert_eq!(claimed.id, high.id);
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.locked_by.as_deref(), Some("w1"));

    let next = db.jobs.claim_next("w2").await.unwrap().unwrap();
    assert_eq!(next.id, low.id);
}

#[tokio::test]
async fn claimed_job_is_invisible_to_other_workers() {
    let db = db().await;
    let owner = Uuid::new_v4();
    db.jobs.enqueue(NewJob::new(owner, sync_payload("a"))).await.unwrap();

    assert!(db.jobs.claim_next("w1").await.unwrap().is_some());
    assert!(db.jobs.claim_next("w2").await.unwrap().is_none());
}

#[tokio::test]
async fn future_jobs_are_not_claimable() {
    let db = db().await;
    let owner = Uuid::new_v4();
    db.jobs
        .enqueue(
            NewJob::new(owner, sync_payload("later"))
                .with_not_before(Utc::now() + ChronoDuration::hours(1)),
        )
        .await
        .unwrap();

    assert!(db.jobs.claim_next("w1").await.unwrap().is_none());
}

#[tokio::test]
async fn release_stale_recovers_abandoned_jobs() {
    let db = db().await;
    let owner = Uuid::new_v4();
    let job = db.jobs.enqueue(NewJob::new(owner, sync_payload("a"))).await.unwrap();
    db.jobs.claim_next("w1").await.unwrap().unwrap();

    // Lock is fresh, nothing to recover.
    assert_eq!(db.jobs.release_stale(Duration::from_secs(300)).await.unwrap(), 0);
    // Zero timeout makes every lock stale.
    assert_eq!(db.jobs.release_stale(Duration::from_secs(0)).await.unwrap(), 1);

    let recovered = db.jobs.get(job.id).await.unwrap();
    assert_eq!(recovered.status, JobStatus::Pending);
    assert!(recovered.locked_by.is_none());
}

#[tokio::test]
async fn reschedule_releases_without_charging_an_attempt() {
    let db = db().await;
    let owner = Uuid::new_v4();
    let job = db.jobs.enqueue(NewJob::new(owner, sync_payload("a"))).await.unwrap();
    db.jobs.claim_next("w1").await.unwrap().unwrap();

    db.jobs
        .reschedule(job.id, Utc::now() + ChronoDuration::seconds(30))
        .await
        .unwrap();

    let back = db.jobs.get(job.id).await.unwrap();
    assert_eq!(back.status, JobStatus::Pending);
    assert_eq!(back.attempts, 0);
    assert!(back.next_run_at.is_some());
    assert!(db.jobs.claim_next("w2").await.unwrap().is_none());
}

#[tokio::test]
async fn retry_later_increments_attempts_and_defers() {
    let db = db().await;
    let owner = Uuid::new_v4();
    let job = db.jobs.enqueue(NewJob::new(owner, sync_payload("a"))).await.unwrap();
    db.jobs.claim_next("w1").await.unwrap().unwrap();

    db.jobs
        .retry_later(
            job.id,
            Utc::now() + ChronoDuration::seconds(60),
            "upstream down",
            "connector",
        )
        .await
        .unwrap();

    let back = db.jobs.get(job.id).await.unwrap();
    assert_eq!(back.status, JobStatus::Pending);
    assert_eq!(back.attempts, 1);
    assert_eq!(back.error_code.as_deref(), Some("connector"));
    assert!(db.jobs.claim_next("w1").await.unwrap().is_none());

    // Once the delay passes the job becomes claimable again.
    db.jobs.retry_later(job.id, Utc::now() - ChronoDuration::seconds(1), "x", "y")
        .await
        .unwrap();
    assert!(db.jobs.claim_next("w1").await.unwrap().is_some());
}

#[tokio::test]
async fn dead_letter_and_manual_retry() {
    let db = db().await;
    let owner = Uuid::new_v4();
    let job = db.jobs.enqueue(NewJob::new(owner, sync_payload("a"))).await.unwrap();
    db.jobs.claim_next("w1").await.unwrap().unwrap();
    db.jobs.dead_letter(job.id, "bad payload", "invalid_input").await.unwrap();

    let dead = db.jobs.list_dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, job.id);
    assert_eq!(dead[0].error_code.as_deref(), Some("invalid_input"));
    assert!(db.jobs.claim_next("w1").await.unwrap().is_none());

    let revived = db.jobs.retry_dead_letter(job.id).await.unwrap();
    assert_eq!(revived.status, JobStatus::Pending);
    assert_eq!(revived.attempts, 0);
    assert!(revived.error_message.is_none());
    assert!(db.jobs.claim_next("w1").await.unwrap().is_some());
}

#[tokio::test]
async fn retry_dead_letter_rejects_non_dead_jobs() {
    let db = db().await;
    let owner = Uuid::new_v4();
    let job = db.jobs.enqueue(NewJob::new(owner, sync_payload("a"))).await.unwrap();

    let err = db.jobs.retry_dead_letter(job.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = db.jobs.retry_dead_letter(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn run_history_records_attempts() {
    let db = db().await;
    let owner = Uuid::new_v4();
    let job = db.jobs.enqueue(NewJob::new(owner, sync_payload("a"))).await.unwrap();

    let run = db.jobs.start_run(job.id, 1).await.unwrap();
    assert_eq!(run.attempt, 1);
    assert_eq!(run.status, JobRunStatus::Running);

    let stats = RunStats {
        discovered: 4,
        processed: 4,
        chunks_created: 9,
        ..Default::default()
    };
    db.jobs
        .finish_run(run.id, JobRunStatus::Completed, Some(&stats), None)
        .await
        .unwrap();

    let failed_run = db.jobs.start_run(job.id, 2).await.unwrap();
    db.jobs
        .finish_run(
            failed_run.id,
            JobRunStatus::Failed,
            None,
            Some(("timeout fetching", "timeout")),
        )
        .await
        .unwrap();

    let runs = db.jobs.runs_for_job(job.id).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].stats.as_ref().unwrap().chunks_created, 9);
    assert!(runs[0].finished_at.is_some());
    assert_eq!(runs[1].status, JobRunStatus::Failed);
    assert_eq!(runs[1].error_code.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn queue_stats_counts_by_status() {
    let db = db().await;
    let owner = Uuid::new_v4();

    let a = db.jobs.enqueue(NewJob::new(owner, sync_payload("a"))).await.unwrap();
    db.jobs.enqueue(NewJob::new(owner, sync_payload("b"))).await.unwrap();
    let c = db.jobs.enqueue(NewJob::new(owner, sync_payload("c"))).await.unwrap();

    db.jobs.claim_next("w1").await.unwrap().unwrap();
    db.jobs.complete(a.id).await.unwrap();
    db.jobs.claim_next("w1").await.unwrap().unwrap();
    db.jobs.dead_letter(c.id, "x", "internal").await.unwrap();

    let stats = db.jobs.queue_stats().await.unwrap();
    assert_eq!(
        stats.pending + stats.running + stats.completed + stats.dead_letter,
        3
    );
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.dead_letter, 1);
}

// ---------------------------------------------------------------------------
// Corpus
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upsert_source_updates_in_place_on_natural_key() {
    let db = db().await;
    let ws = Uuid::new_v4();

    let first = db.corpus.upsert_source(new_source(ws, "page-1", "v1 text")).await.unwrap();
    let second = db.corpus.upsert_source(new_source(ws, "page-1", "v2 text")).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.content, "v2 text");

    // Different external id is a different source.
    let other = db.corpus.upsert_source(new_source(ws, "page-2", "other")).await.unwrap();
    assert_ne!(other.id, first.id);
}

#[tokio::test]
async fn find_source_by_natural_key() {
    let db = db().await;
    let ws = Uuid::new_v4();
    let created = db.corpus.upsert_source(new_source(ws, "page-1", "text")).await.unwrap();

    let found = db
        .corpus
        .find_source(ws, "page-1", ConnectorType::Wiki)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, created.id);

    assert!(db
        .corpus
        .find_source(ws, "page-1", ConnectorType::Chat)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn exactly_one_version_is_active() {
    let db = db().await;
    let ws = Uuid::new_v4();
    let source = db.corpus.upsert_source(new_source(ws, "page-1", "v1")).await.unwrap();

    let v1 = db
        .corpus
        .create_version(source.id, "v1", &corvid_core::content_hash("v1"))
        .await
        .unwrap();
    assert_eq!(v1.version_number, 1);
    // New versions start inactive until their chunks are in place.
    assert!(!v1.is_active);
    db.corpus.activate_version(v1.id).await.unwrap();

    let v2 = db
        .corpus
        .create_version(source.id, "v2", &corvid_core::content_hash("v2"))
        .await
        .unwrap();
    assert_eq!(v2.version_number, 2);

    // Until activation, the old version keeps serving.
    let active = db.corpus.active_version(source.id).await.unwrap().unwrap();
    assert_eq!(active.id, v1.id);
    db.corpus.activate_version(v2.id).await.unwrap();

    let versions = db.corpus.versions_for_source(source.id).await.unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions.iter().filter(|v| v.is_active).count(), 1);

    let active = db.corpus.active_version(source.id).await.unwrap().unwrap();
    assert_eq!(active.id, v2.id);
    assert_eq!(active.content, "v2");
}

#[tokio::test]
async fn chunks_are_stored_in_order_and_scoped_to_versions() {
    let db = db().await;
    let ws = Uuid::new_v4();
    let source = db.corpus.upsert_source(new_source(ws, "doc", "text")).await.unwrap();
    let version = db
        .corpus
        .create_version(source.id, "text", &corvid_core::content_hash("text"))
        .await
        .unwrap();
    db.corpus.activate_version(version.id).await.unwrap();

    let chunks: Vec<NewChunk> = (0..3)
        .map(|i| NewChunk {
            source_id: source.id,
            source_version_id: version.id,
            chunk_index: i,
            char_start: (i as i64) * 100,
            char_end: (i as i64) * 100 + 100,
            text: format!("chunk {i}"),
            token_estimate: 25,
        })
        .collect();
    let inserted = db.corpus.insert_chunks(&chunks).await.unwrap();
    assert_eq!(inserted.len(), 3);

    let stored = db.corpus.chunks_for_version(version.id).await.unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[0].chunk_index, 0);
    assert_eq!(stored[2].text, "chunk 2");
}

#[tokio::test]
async fn active_chunks_exclude_superseded_versions_and_other_workspaces() {
    let db = db().await;
    let ws = Uuid::new_v4();
    let other_ws = Uuid::new_v4();

    let source = db.corpus.upsert_source(new_source(ws, "doc", "old")).await.unwrap();
    let v1 = db
        .corpus
        .create_version(source.id, "old", &corvid_core::content_hash("old"))
        .await
        .unwrap();
    db.corpus
        .insert_chunks(&[NewChunk {
            source_id: source.id,
            source_version_id: v1.id,
            chunk_index: 0,
            char_start: 0,
            char_end: 3,
            text: "old".into(),
            token_estimate: 1,
        }])
        .await
        .unwrap();
    db.corpus.activate_version(v1.id).await.unwrap();

    let v2 = db
        .corpus
        .create_version(source.id, "new", &corvid_core::content_hash("new"))
        .await
        .unwrap();
    db.corpus
        .insert_chunks(&[NewChunk {
            source_id: source.id,
            source_version_id: v2.id,
            chunk_index: 0,
            char_start: 0,
            char_end: 3,
            text: "new".into(),
            token_estimate: 1,
        }])
        .await
        .unwrap();
    db.corpus.activate_version(v2.id).await.unwrap();

    let active = db.corpus.active_chunks(ws).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].chunk.text, "new");
    assert_eq!(active[0].source.external_id, "doc");

    assert!(db.corpus.active_chunks(other_ws).await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_source_cascades() {
    let db = db().await;
    let ws = Uuid::new_v4();
    let source = db.corpus.upsert_source(new_source(ws, "doc", "text")).await.unwrap();
    let version = db
        .corpus
        .create_version(source.id, "text", &corvid_core::content_hash("text"))
        .await
        .unwrap();
    db.corpus
        .insert_chunks(&[NewChunk {
            source_id: source.id,
            source_version_id: version.id,
            chunk_index: 0,
            char_start: 0,
            char_end: 4,
            text: "text".into(),
            token_estimate: 1,
        }])
        .await
        .unwrap();
    db.corpus.activate_version(version.id).await.unwrap();
    assert_eq!(db.corpus.active_chunks(ws).await.unwrap().len(), 1);

    db.corpus.delete_source(source.id).await.unwrap();

    assert!(db.corpus.get_source(source.id).await.unwrap().is_none());
    assert!(db.corpus.versions_for_source(source.id).await.unwrap().is_empty());
    assert!(db.corpus.active_chunks(ws).await.unwrap().is_empty());
}

#[tokio::test]
async fn sync_scope_round_trip() {
    let db = db().await;
    let user = Uuid::new_v4();

    assert!(db.corpus.get_scope(user, ConnectorType::Wiki).await.unwrap().is_none());

    let mut scope = SyncScope::default_for(user, ConnectorType::Wiki);
    scope.mode = SyncMode::MetadataFirst;
    scope.excluded_ids.push("page-9".into());
    db.corpus.save_scope(&scope).await.unwrap();

    let loaded = db.corpus.get_scope(user, ConnectorType::Wiki).await.unwrap().unwrap();
    assert_eq!(loaded.mode, SyncMode::MetadataFirst);
    assert!(loaded.is_excluded("page-9"));

    // Saving again updates in place.
    scope.mode = SyncMode::Full;
    db.corpus.save_scope(&scope).await.unwrap();
    let loaded = db.corpus.get_scope(user, ConnectorType::Wiki).await.unwrap().unwrap();
    assert_eq!(loaded.mode, SyncMode::Full);
}

// ---------------------------------------------------------------------------
// Throttling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn slots_enforce_per_account_maximum() {
    let db = db().await;
    let conn = ConnectorType::IssueTracker;

    assert!(db.throttle.acquire_slot(conn, "acct", 1).await.unwrap());
    assert!(!db.throttle.acquire_slot(conn, "acct", 1).await.unwrap());
    assert_eq!(db.throttle.slot_count(conn, "acct").await.unwrap(), 1);

    // Other accounts are unaffected.
    assert!(db.throttle.acquire_slot(conn, "other", 1).await.unwrap());

    db.throttle.release_slot(conn, "acct").await.unwrap();
    assert!(db.throttle.acquire_slot(conn, "acct", 1).await.unwrap());
}

#[tokio::test]
async fn release_slot_floors_at_zero() {
    let db = db().await;
    let conn = ConnectorType::Chat;

    assert!(db.throttle.acquire_slot(conn, "acct", 2).await.unwrap());
    db.throttle.release_slot(conn, "acct").await.unwrap();
    db.throttle.release_slot(conn, "acct").await.unwrap();
    assert_eq!(db.throttle.slot_count(conn, "acct").await.unwrap(), 0);
}

#[tokio::test]
async fn rate_bucket_starts_full_and_exhausts() {
    let db = db().await;
    let conn = ConnectorType::DocumentStore;

    // Capacity 2 with no refill: exactly two tokens then denial.
    assert!(db.throttle.consume_token(conn, "acct", 2.0, 0.0).await.unwrap());
    assert!(db.throttle.consume_token(conn, "acct", 2.0, 0.0).await.unwrap());
    assert!(!db.throttle.consume_token(conn, "acct", 2.0, 0.0).await.unwrap());

    // Separate accounts get separate buckets.
    assert!(db.throttle.consume_token(conn, "acct2", 2.0, 0.0).await.unwrap());
}

#[tokio::test]
async fn rate_bucket_refills_over_time() {
    let db = db().await;
    let conn = ConnectorType::DocumentStore;

    // Drain a 1-token bucket, then refill at 1000 tokens/sec so even a few
    // milliseconds of wall clock restores it.
    assert!(db.throttle.consume_token(conn, "acct", 1.0, 1000.0).await.unwrap());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(db.throttle.consume_token(conn, "acct", 1.0, 1000.0).await.unwrap());
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sync_audits_record_and_list_most_recent_first() {
    let db = db().await;
    let user = Uuid::new_v4();

    for i in 0..3 {
        db.audits
            .record_sync(NewSyncAudit {
                user_id: user,
                connector: ConnectorType::Wiki,
                account_id: "acct".into(),
                discovered: 10 + i,
                processed: 10 + i,
                deleted: 0,
                chunks_created: 20,
                success: true,
                errors: vec![],
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let recent = db.audits.recent(2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].discovered, 12);
    assert!(recent[0].success);

    let failed = db
        .audits
        .record_sync(NewSyncAudit {
            user_id: user,
            connector: ConnectorType::Wiki,
            account_id: "acct".into(),
            discovered: 5,
            processed: 0,
            deleted: 0,
            chunks_created: 0,
            success: false,
            errors: vec!["fetch failed: page-1".into()],
        })
        .await
        .unwrap();
    assert!(!failed.success);
    assert_eq!(failed.errors.len(), 1);
}
