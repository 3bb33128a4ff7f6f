//! Handler for `sync` jobs: one full pass of one connector account.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use corvid_core::{
    ConnectorType, CorpusRepository, Error, JobPayload, JobType, Result, RunStats, SyncScope,
};
use corvid_sync::{SyncContext, SyncEngine, SyncOrchestrator};

use crate::handler::{JobContext, JobHandler};
use crate::handlers::{CredentialSource, NoCredentials};

/// Runs sync passes by dispatching to the registered engine for the
/// payload's connector. Item-level errors are collected and audited by the
/// orchestrator and do not fail the job; a pass-level failure (metadata
/// listing, pipeline invariant) does.
pub struct SyncHandler {
    orchestrator: Arc<SyncOrchestrator>,
    corpus: Arc<dyn CorpusRepository>,
    engines: HashMap<ConnectorType, Arc<dyn SyncEngine>>,
    credentials: Arc<dyn CredentialSource>,
}

impl SyncHandler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, corpus: Arc<dyn CorpusRepository>) -> Self {
        Self {
            orchestrator,
            corpus,
            engines: HashMap::new(),
            credentials: Arc::new(NoCredentials),
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn SyncEngine>) -> Self {
        self.engines.insert(engine.connector(), engine);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = credentials;
        self
    }
}

#[async_trait]
impl JobHandler for SyncHandler {
    fn job_type(&self) -> JobType {
        JobType::Sync
    }

    async fn run(&self, ctx: JobContext) -> Result<RunStats> {
        let JobPayload::Sync {
            workspace_id,
            connector,
            account_id,
            ..
        } = ctx.payload().clone()
        else {
            return Err(Error::InvalidInput(format!(
                "sync job {} carries a {} payload",
                ctx.job.id,
                ctx.payload().job_type()
            )));
        };

        let engine = self
            .engines
            .get(&connector)
            .ok_or_else(|| Error::UnknownHandler(format!("sync engine for {connector}")))?
            .clone();

        let user_id = ctx.job.owner_user_id;
        let scope = match self.corpus.get_scope(user_id, connector).await? {
            Some(scope) => scope,
            None => {
                debug!(
                    subsystem = "jobs",
                    component = "sync_handler",
                    user_id = %user_id,
                    connector = %connector,
                    "no configured scope, using defaults"
                );
                SyncScope::default_for(user_id, connector)
            }
        };

        let mut sync_ctx = SyncContext::new(user_id, workspace_id, account_id.clone(), scope);
        if let Some(credential) = self
            .credentials
            .credential_for(user_id, connector, &account_id)
            .await?
        {
            sync_ctx = sync_ctx.with_credential(credential);
        }

        ctx.report_progress(0, Some("sync pass starting"));
        let result = self.orchestrator.run_sync(engine.as_ref(), &sync_ctx).await?;
        ctx.report_progress(100, None);

        Ok(result.run_stats())
    }
}
