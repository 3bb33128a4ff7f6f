//! # corvid-jobs
//!
//! Durable background job processing: the worker loop (claim, admission
//! control, dispatch, retry/dead-letter resolution) and the built-in
//! handlers for sync passes, uploads, and call transcripts.

pub mod handler;
pub mod handlers;
pub mod worker;

pub use handler::{JobContext, JobHandler, ProgressCallback};
pub use handlers::{
    CredentialSource, IngestHandler, NoCredentials, SyncHandler, TranscriptHandler,
};
pub use worker::{backoff_delay_ms, JobWorker, WorkerConfig, WorkerEvent, WorkerHandle};
