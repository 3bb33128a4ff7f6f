//! Handler for `ingest` jobs: direct document uploads.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use corvid_core::{content_hash, ConnectorType, Error, JobPayload, JobType, Result, RunStats};
use corvid_sync::{IngestRequest, SyncOrchestrator};

use crate::handler::{JobContext, JobHandler};

/// Ingests uploaded documents through the shared chunk-embed-activate
/// pipeline. The content hash doubles as the external id, so re-uploading
/// identical text lands on the same source and short-circuits.
pub struct IngestHandler {
    orchestrator: Arc<SyncOrchestrator>,
}

impl IngestHandler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobHandler for IngestHandler {
    fn job_type(&self) -> JobType {
        JobType::Ingest
    }

    async fn run(&self, ctx: JobContext) -> Result<RunStats> {
        let JobPayload::Ingest {
            workspace_id,
            title,
            text,
            visibility,
        } = ctx.payload()
        else {
            return Err(Error::InvalidInput(format!(
                "ingest job {} carries a {} payload",
                ctx.job.id,
                ctx.payload().job_type()
            )));
        };

        if text.trim().is_empty() {
            return Err(Error::InvalidInput("document text is empty".into()));
        }

        let started = Instant::now();
        let external_id = content_hash(text);
        let outcome = self
            .orchestrator
            .ingest_document(IngestRequest {
                workspace_id: *workspace_id,
                user_id: ctx.job.owner_user_id,
                external_id: &external_id,
                connector: ConnectorType::Upload,
                title,
                text,
                visibility: *visibility,
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
