//! # corvid-sync
//!
//! Connector sync: the engine contract, per-pass context and progress
//! reporting, and the orchestrator that turns connector output into
//! versioned, chunked, embedded corpus entries.

pub mod engine;
pub mod orchestrator;
pub mod progress;

pub use engine::{RemoteContent, RemoteItem, SyncContext, SyncEngine};
pub use orchestrator::{IngestOutcome, IngestRequest, SyncOrchestrator, SyncResult};
pub use progress::{
    CollectingProgressSink, NullProgressSink, ProgressSink, SyncProgress, SyncStage,
};
