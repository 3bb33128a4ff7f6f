//! Centralized default constants for the corvid workspace.
//!
//! **This module is the single source of truth** for shared default values.
//! All crates reference these constants instead of defining their own magic
//! numbers. When adding new constants, place them in the appropriate section.

// =============================================================================
// CHUNKING
// =============================================================================

/// Maximum characters per chunk.
pub const CHUNK_MAX_CHARS: usize = 1200;

/// Overlap characters between adjacent chunks for context preservation.
pub const CHUNK_OVERLAP: usize = 150;

/// Boundary snapping floor: a natural break is only accepted if the chunk
/// keeps at least this many characters, so snapping never produces slivers.
pub const CHUNK_BOUNDARY_FLOOR: usize = 600;

/// Rough token estimate divisor (characters per token).
pub const CHARS_PER_TOKEN: usize = 4;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding vector dimension (mock provider and tests).
pub const EMBED_DIMENSION: usize = 384;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default maximum attempts before a job is dead-lettered.
pub const JOB_MAX_ATTEMPTS: i32 = 3;

/// Default job priority (higher runs first).
pub const JOB_DEFAULT_PRIORITY: i32 = 0;

/// Default worker poll interval in milliseconds.
pub const WORKER_POLL_INTERVAL_MS: u64 = 5_000;

/// Lock age after which a running job is considered abandoned and is
/// force-unlocked back to pending (crashed-worker recovery).
pub const JOB_LOCK_TIMEOUT_SECS: u64 = 300;

/// Retry backoff base in milliseconds (doubles per attempt).
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Retry backoff cap in milliseconds (30 minutes).
pub const BACKOFF_CAP_MS: u64 = 1_800_000;

/// Reschedule delay when the concurrency slot for a job's account is full.
/// Not counted as a failed attempt.
pub const SLOT_RETRY_DELAY_SECS: u64 = 5;

/// Reschedule delay when no rate-limit token is available.
pub const RATE_RETRY_DELAY_SECS: u64 = 30;

/// Default maximum simultaneous syncs per (connector, account).
pub const SLOT_MAX_PER_ACCOUNT: i32 = 1;

/// Default rate-limit bucket capacity (tokens).
pub const RATE_BUCKET_CAPACITY: f64 = 5.0;

/// Default rate-limit bucket refill rate (tokens per second).
pub const RATE_REFILL_PER_SEC: f64 = 0.5;

/// Default worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// RETRIEVAL
// =============================================================================

/// Minimum top-score for primary (vector) retrieval to be trusted without
/// triggering the lexical fallback.
pub const CONFIDENCE_THRESHOLD: f32 = 0.65;

/// Blend weight for primary scores in the hybrid merge; lexical-only hits
/// receive `1 - alpha` of their lexical score.
pub const HYBRID_ALPHA: f32 = 0.7;

/// Fallback retrieval widens to this multiple of the requested top-k.
pub const FALLBACK_K_MULTIPLIER: usize = 2;

/// Minimum results to return when the corpus is non-empty; padded with
/// unselected chunks at [`PAD_SCORE`].
pub const RETRIEVAL_MIN_RESULTS: usize = 5;

/// Nominal score assigned to padding results.
pub const PAD_SCORE: f32 = 0.05;

/// Default top-k for retrieval.
pub const RETRIEVAL_TOP_K: usize = 10;
