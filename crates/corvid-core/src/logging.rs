//! Structured logging field name constants for corvid.
//!
//! All crates use these constants for consistent structured logging fields so
//! log aggregation tools can query by standardized names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, pass/job completions |
//! | DEBUG | Decision points, admission control, config choices |
//! | TRACE | Per-item iteration (chunks, search hits) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "jobs", "sync", "search", "db"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "worker", "orchestrator", "retrieval", "embedding_index"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim_next", "run_sync", "retrieve", "hydrate"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job type enum variant.
pub const JOB_TYPE: &str = "job_type";

/// Source UUID being synced.
pub const SOURCE_ID: &str = "source_id";

/// Connector type for the operation.
pub const CONNECTOR: &str = "connector";

/// External account id throttling is keyed by.
pub const ACCOUNT_ID: &str = "account_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of items discovered by a sync pass.
pub const DISCOVERED: &str = "discovered";

/// Number of items processed by a sync pass.
pub const PROCESSED: &str = "processed";

/// Number of chunks created or scored.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of results returned by retrieval.
pub const RESULT_COUNT: &str = "result_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Whether the lexical fallback path ran.
pub const USED_FALLBACK: &str = "used_fallback";
