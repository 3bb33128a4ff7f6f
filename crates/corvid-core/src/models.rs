//! Core data model: jobs, job runs, sources, versions, chunks, sync scopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;

/// Generate a time-ordered UUIDv7 for new rows.
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

// =============================================================================
// CONNECTORS & VISIBILITY
// =============================================================================

/// External system a source originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    /// Cloud document storage (drive-style).
    DocumentStore,
    /// Issue tracker projects and tickets.
    IssueTracker,
    /// Wiki / knowledge-base pages.
    Wiki,
    /// Team chat channels.
    Chat,
    /// Direct upload (no upstream connector).
    Upload,
}

impl ConnectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentStore => "document_store",
            Self::IssueTracker => "issue_tracker",
            Self::Wiki => "wiki",
            Self::Chat => "chat",
            Self::Upload => "upload",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "document_store" => Some(Self::DocumentStore),
            "issue_tracker" => Some(Self::IssueTracker),
            "wiki" => Some(Self::Wiki),
            "chat" => Some(Self::Chat),
            "upload" => Some(Self::Upload),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may retrieve against a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Only the creating user.
    Private,
    /// Everyone in the workspace.
    #[default]
    Workspace,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Workspace => "workspace",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Self::Private),
            "workspace" => Some(Self::Workspace),
            _ => None,
        }
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// Kind of asynchronous work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Sync,
    Ingest,
    IngestCallTranscript,
    Eval,
    Playbook,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Ingest => "ingest",
            Self::IngestCallTranscript => "ingest_call_transcript",
            Self::Eval => "eval",
            Self::Playbook => "playbook",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "sync" => Some(Self::Sync),
            "ingest" => Some(Self::Ingest),
            "ingest_call_transcript" => Some(Self::IngestCallTranscript),
            "eval" => Some(Self::Eval),
            "playbook" => Some(Self::Playbook),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    DeadLetter,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "dead_letter" => Some(Self::DeadLetter),
            _ => None,
        }
    }
}

/// Strongly-typed job payload, tagged by job type.
///
/// Each job type carries its own payload shape; handlers match on the variant
/// instead of probing loose JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    Sync {
        workspace_id: Uuid,
        connector: ConnectorType,
        account_id: String,
        scope_id: Option<Uuid>,
    },
    Ingest {
        workspace_id: Uuid,
        title: String,
        text: String,
        #[serde(default)]
        visibility: Visibility,
    },
    IngestCallTranscript {
        workspace_id: Uuid,
        call_id: String,
        transcript: String,
    },
    Eval {
        suite: String,
    },
    Playbook {
        playbook_id: Uuid,
    },
}

impl JobPayload {
    /// The job type this payload belongs to.
    pub fn job_type(&self) -> JobType {
        match self {
            Self::Sync { .. } => JobType::Sync,
            Self::Ingest { .. } => JobType::Ingest,
            Self::IngestCallTranscript { .. } => JobType::IngestCallTranscript,
            Self::Eval { .. } => JobType::Eval,
            Self::Playbook { .. } => JobType::Playbook,
        }
    }

    /// Connector this payload targets, if any.
    pub fn connector(&self) -> Option<ConnectorType> {
        match self {
            Self::Sync { connector, .. } => Some(*connector),
            _ => None,
        }
    }

    /// Admission-control key: (connector, account id) for work that calls an
    /// external API. Payloads without an upstream account are not throttled.
    pub fn throttle_key(&self) -> Option<(ConnectorType, &str)> {
        match self {
            Self::Sync {
                connector,
                account_id,
                ..
            } => Some((*connector, account_id.as_str())),
            _ => None,
        }
    }
}

/// A unit of asynchronous work in the durable queue.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub owner_user_id: Uuid,
    pub connector: Option<ConnectorType>,
    pub scope_id: Option<Uuid>,
    pub payload: JobPayload,
    /// Unique key deduplicating re-enqueues of the same logical operation.
    pub idempotency_key: Option<String>,
    /// Higher runs first; ties break by age.
    pub priority: i32,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    /// Earliest eligible run time; `None` means immediately eligible.
    pub next_run_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Admission-control key for this job, if it performs throttled work.
    pub fn throttle_key(&self) -> Option<(ConnectorType, &str)> {
        self.payload.throttle_key()
    }
}

/// Request to enqueue a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner_user_id: Uuid,
    pub payload: JobPayload,
    pub idempotency_key: Option<String>,
    pub priority: i32,
    pub max_attempts: i32,
    pub not_before: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(owner_user_id: Uuid, payload: JobPayload) -> Self {
        Self {
            owner_user_id,
            payload,
            idempotency_key: None,
            priority: defaults::JOB_DEFAULT_PRIORITY,
            max_attempts: defaults::JOB_MAX_ATTEMPTS,
            not_before: None,
        }
    }

    /// Dedup key; re-enqueues with the same key resolve to the existing job.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }
}

/// State of a single job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One execution attempt of a job. Immutable once finished except for the
/// final status write.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub id: Uuid,
    pub job_id: Uuid,
    /// 1-based attempt number.
    pub attempt: i32,
    pub status: JobRunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: Option<RunStats>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
}

/// Free-form execution statistics recorded on a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub discovered: u64,
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub chunks_created: u64,
    pub duration_ms: u64,
}

impl RunStats {
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Aggregate queue counts for operator dashboards.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead_letter: i64,
}

// =============================================================================
// CORPUS
// =============================================================================

/// A logical external document within a workspace.
///
/// Identified by (workspace, external id, connector); uploads use their
/// content hash as the external id.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub external_id: String,
    pub connector: ConnectorType,
    pub title: String,
    /// Hash of the current full-text mirror.
    pub content_hash: String,
    /// Current full-text mirror.
    pub content: String,
    pub visibility: Visibility,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert request for a source.
#[derive(Debug, Clone)]
pub struct NewSource {
    pub workspace_id: Uuid,
    pub external_id: String,
    pub connector: ConnectorType,
    pub title: String,
    pub content_hash: String,
    pub content: String,
    pub visibility: Visibility,
    pub created_by: Uuid,
}

/// An immutable snapshot of a source's text. Exactly one version per source
/// is active at any time.
#[derive(Debug, Clone)]
pub struct SourceVersion {
    pub id: Uuid,
    pub source_id: Uuid,
    /// Monotonic per source, starting at 1.
    pub version_number: i32,
    pub content_hash: String,
    pub content: String,
    pub char_count: i64,
    pub token_estimate: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A bounded slice of one source version's text; the unit of embedding and
/// retrieval. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: Uuid,
    pub source_id: Uuid,
    pub source_version_id: Uuid,
    pub chunk_index: i32,
    /// Half-open offset range into the version's text.
    pub char_start: i64,
    pub char_end: i64,
    pub text: String,
    pub token_estimate: i64,
    pub created_at: DateTime<Utc>,
}

/// Insert request for one chunk of a new version.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub source_id: Uuid,
    pub source_version_id: Uuid,
    pub chunk_index: i32,
    pub char_start: i64,
    pub char_end: i64,
    pub text: String,
    pub token_estimate: i64,
}

/// Source metadata attached to retrieval results for citation construction.
#[derive(Debug, Clone)]
pub struct SourceMeta {
    pub id: Uuid,
    pub external_id: String,
    pub title: String,
    pub connector: ConnectorType,
    pub visibility: Visibility,
    pub created_by: Uuid,
}

/// A chunk of an active version joined with its owning source's metadata.
#[derive(Debug, Clone)]
pub struct ActiveChunk {
    pub chunk: Chunk,
    pub source: SourceMeta,
}

// =============================================================================
// SYNC CONFIGURATION & AUDIT
// =============================================================================

/// How a sync pass decides which discovered items to fetch in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Fetch full content only for first-seen items; known items are skipped
    /// until explicitly refreshed.
    MetadataFirst,
    /// Always fetch full content.
    Full,
    /// Fetch when new or when the reported content hash differs.
    #[default]
    Smart,
    /// Never fetch automatically; items are pulled via on-demand sync.
    OnDemand,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MetadataFirst => "metadata_first",
            Self::Full => "full",
            Self::Smart => "smart",
            Self::OnDemand => "on_demand",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "metadata_first" => Some(Self::MetadataFirst),
            "full" => Some(Self::Full),
            "smart" => Some(Self::Smart),
            "on_demand" => Some(Self::OnDemand),
            _ => None,
        }
    }
}

/// Per-user, per-connector sync configuration. Read-only input to the
/// orchestrator; mutated only by the owning user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncScope {
    pub id: Uuid,
    pub user_id: Uuid,
    pub connector: ConnectorType,
    pub mode: SyncMode,
    pub content_strategy: Option<String>,
    #[serde(default)]
    pub excluded_ids: Vec<String>,
}

impl SyncScope {
    /// Default scope when a user has not configured one.
    pub fn default_for(user_id: Uuid, connector: ConnectorType) -> Self {
        Self {
            id: new_v7(),
            user_id,
            connector,
            mode: SyncMode::default(),
            content_strategy: None,
            excluded_ids: Vec::new(),
        }
    }

    pub fn is_excluded(&self, external_id: &str) -> bool {
        self.excluded_ids.iter().any(|e| e == external_id)
    }
}

/// Per-pass summary audit record, emitted regardless of outcome so failures
/// are auditable without log access.
#[derive(Debug, Clone)]
pub struct SyncAudit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub connector: ConnectorType,
    pub account_id: String,
    pub discovered: i64,
    pub processed: i64,
    pub deleted: i64,
    pub chunks_created: i64,
    pub success: bool,
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert request for a sync audit record.
#[derive(Debug, Clone)]
pub struct NewSyncAudit {
    pub user_id: Uuid,
    pub connector: ConnectorType,
    pub account_id: String,
    pub discovered: i64,
    pub processed: i64,
    pub deleted: i64,
    pub chunks_created: i64,
    pub success: bool,
    pub errors: Vec<String>,
}
