//! Handler for `ingest_call_transcript` jobs.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use corvid_core::{ConnectorType, Error, JobPayload, JobType, Result, RunStats, Visibility};
use corvid_sync::{IngestRequest, SyncOrchestrator};

use crate::handler::{JobContext, JobHandler};

/// Ingests call transcripts as private chat-connector sources, keyed by call
/// id so re-delivery of the same call replaces rather than duplicates.
pub struct TranscriptHandler {
    orchestrator: Arc<SyncOrchestrator>,
}

impl TranscriptHandler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobHandler for TranscriptHandler {
    fn job_type(&self) -> JobType {
        JobType::IngestCallTranscript
    }

    async fn run(&self, ctx: JobContext) -> Result<RunStats> {
        let JobPayload::IngestCallTranscript {
            workspace_id,
            call_id,
            transcript,
        } = ctx.payload()
        else {
            return Err(Error::InvalidInput(format!(
                "transcript job {} carries a {} payload",
                ctx.job.id,
                ctx.payload().job_type()
            )));
        };

        if transcript.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "transcript for call {call_id} is empty"
            )));
        }

        let started = Instant::now();
        let external_id = format!("call:{call_id}");
        let outcome = self
            .orchestrator
            .ingest_document(IngestRequest {
                workspace_id: *workspace_id,
                user_id: ctx.job.owner_user_id,
                external_id: &external_id,
                connector: ConnectorType::Chat,
                title: &format!("Call {call_id} transcript"),
                text: transcript,
                visibility: Visibility::Private,
            })
            .await?;

        Ok(RunStats {
            discovered: 1,
            processed: u64::from(!outcome.unchanged),
            skipped: u64::from(outcome.unchanged),
            failed: 0,
            chunks_created: outcome.chunks_created,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
