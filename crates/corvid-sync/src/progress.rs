//! Sync progress reporting.

use serde::Serialize;
use std::sync::Mutex;

/// Stage of a sync pass, for operational dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Fetching,
    Persisting,
    Chunking,
    Embedding,
    Done,
    Error,
}

/// A progress snapshot emitted during a pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncProgress {
    pub stage: SyncStage,
    pub discovered: u64,
    pub fetched: u64,
    pub persisted: u64,
    pub chunks_created: u64,
    /// Remaining-time estimate from throughput so far, when computable.
    pub eta_ms: Option<u64>,
    pub message: Option<String>,
}

impl SyncProgress {
    pub fn stage(stage: SyncStage) -> Self {
        Self {
            stage,
            discovered: 0,
            fetched: 0,
            persisted: 0,
            chunks_created: 0,
            eta_ms: None,
            message: None,
        }
    }
}

/// Consumer of progress snapshots. Implementations must be cheap; the
/// orchestrator calls this inline from the item loop.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: SyncProgress);
}

/// Discards all progress.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn report(&self, _progress: SyncProgress) {}
}

/// Buffers every snapshot; used in tests to assert stage ordering.
#[derive(Default)]
pub struct CollectingProgressSink {
    snapshots: Mutex<Vec<SyncProgress>>,
}

impl CollectingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<SyncProgress> {
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn stages(&self) -> Vec<SyncStage> {
        self.snapshots().iter().map(|p| p.stage).collect()
    }
}

impl ProgressSink for CollectingProgressSink {
    fn report(&self, progress: SyncProgress) {
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(progress);
    }
}

/// Remaining-time estimate from elapsed time and completion counts.
pub fn estimate_eta_ms(elapsed_ms: u64, completed: u64, total: u64) -> Option<u64> {
    if completed == 0 || total <= completed {
        return None;
    }
    let per_item = elapsed_ms as f64 / completed as f64;
    Some((per_item * (total - completed) as f64) as u64)
}
