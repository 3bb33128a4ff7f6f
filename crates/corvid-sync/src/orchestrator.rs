//! The sync orchestrator: drives a sync engine through a full pass.
//!
//! A pass never lets one bad item abort the rest, and never deletes existing
//! corpus data unless the pass ingested cleanly. Content flows through the
//! chunker and the embedding index before a new version is activated, so
//! retrieval keeps serving the prior version until the new one is complete.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use corvid_core::{
    chunk_text, content_hash, AuditRepository, ChunkerConfig, ConnectorType, CorpusRepository,
    Error, NewChunk, NewSource, NewSyncAudit, Result, RunStats, Source, SourceVersion, SyncMode,
    Visibility,
};
use corvid_search::EmbeddingIndex;

use crate::engine::{RemoteItem, SyncContext, SyncEngine};
use crate::progress::{estimate_eta_ms, SyncProgress, SyncStage};

/// Counters for one sync pass.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub discovered: u64,
    pub sources_created: u64,
    pub sources_updated: u64,
    pub sources_deleted: u64,
    /// Items skipped by mode, exclusion rules, or missing content.
    pub skipped: u64,
    /// Items whose content hash matched the active version (no new version).
    pub unchanged: u64,
    pub chunks_created: u64,
    pub errors: Vec<String>,
    pub elapsed_ms: u64,
}

impl SyncResult {
    pub fn processed(&self) -> u64 {
        self.sources_created + self.sources_updated
    }

    /// Whether the pass earned the right to run the deletion sweep.
    pub fn ingest_success(&self) -> bool {
        self.processed() > 0 && self.chunks_created > 0 && self.errors.is_empty()
    }

    pub fn chunks_per_sec(&self) -> f64 {
        if self.elapsed_ms == 0 {
            return 0.0;
        }
        self.chunks_created as f64 * 1000.0 / self.elapsed_ms as f64
    }

    pub fn run_stats(&self) -> RunStats {
        RunStats {
            discovered: self.discovered,
            processed: self.processed(),
            skipped: self.skipped + self.unchanged,
            failed: self.errors.len() as u64,
            chunks_created: self.chunks_created,
            duration_ms: self.elapsed_ms,
        }
    }
}

/// Ingest request for one document, shared by sync passes and direct uploads.
#[derive(Debug, Clone)]
pub struct IngestRequest<'a> {
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub external_id: &'a str,
    pub connector: ConnectorType,
    pub title: &'a str,
    pub text: &'a str,
    pub visibility: Visibility,
}

/// What one document ingestion did.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub source: Source,
    /// `None` when the content hash matched and ingestion short-circuited.
    pub version: Option<SourceVersion>,
    pub chunks_created: u64,
    pub created: bool,
    pub unchanged: bool,
}

pub struct SyncOrchestrator {
    corpus: Arc<dyn CorpusRepository>,
    audits: Arc<dyn AuditRepository>,
    index: Arc<EmbeddingIndex>,
    chunker: ChunkerConfig,
}

impl SyncOrchestrator {
    pub fn new(
        corpus: Arc<dyn CorpusRepository>,
        audits: Arc<dyn AuditRepository>,
        index: Arc<EmbeddingIndex>,
    ) -> Self {
        Self {
            corpus,
            audits,
            index,
            chunker: ChunkerConfig::default(),
        }
    }

    pub fn with_chunker(mut self, chunker: ChunkerConfig) -> Self {
        self.chunker = chunker;
        self
    }

    /// Run a full sync pass for one (user, connector, account).
    pub async fn run_sync(&self, engine: &dyn SyncEngine, ctx: &SyncContext) -> Result<SyncResult> {
        let started = Instant::now();
        let connector = ctx.connector();
        let mut result = SyncResult::default();

        ctx.progress.report(SyncProgress::stage(SyncStage::Fetching));

        let items = match engine.fetch_metadata(ctx).await {
            Ok(items) => items,
            Err(e) => {
                let msg = format!("fetch_metadata: {e}");
                ctx.progress.report(SyncProgress {
                    message: Some(msg.clone()),
                    ..SyncProgress::stage(SyncStage::Error)
                });
                self.emit_audit(ctx, &result, false, vec![msg]).await;
                return Err(e);
            }
        };
        result.discovered = items.len() as u64;
        debug!(
            subsystem = "sync",
            component = "orchestrator",
            connector = %connector,
            account_id = %ctx.account_id,
            discovered = result.discovered,
            "sync pass discovered items"
        );

        let known: HashMap<String, Source> = self
            .corpus
            .list_sources_for_user(ctx.user_id, connector)
            .await?
            .into_iter()
            .map(|s| (s.external_id.clone(), s))
            .collect();

        let mut seen: HashSet<String> = HashSet::new();
        let mut fetch_attempted = false;
        let mut fetched = 0u64;

        for (position, item) in items.iter().enumerate() {
            if ctx.scope.is_excluded(&item.external_id) {
                result.skipped += 1;
                continue;
            }
            seen.insert(item.external_id.clone());

            if !self
                .should_fetch(ctx.scope.mode, known.get(&item.external_id), item)
                .await?
            {
                result.skipped += 1;
                continue;
            }

            fetch_attempted = true;
            match engine.fetch_content(ctx, item).await {
                Ok(Some(content)) => {
                    fetched += 1;
                    if let Err(e) = self.sync_content(ctx, &content.item, &content.text, &mut result).await
                    {
                        warn!(
                            subsystem = "sync",
                            component = "orchestrator",
                            external_id = %item.external_id,
                            error = %e,
                            "item ingestion failed"
                        );
                        result.errors.push(format!("{}: {e}", item.external_id));
                    }
                }
                Ok(None) => result.skipped += 1,
                Err(e) => {
                    warn!(
                        subsystem = "sync",
                        component = "orchestrator",
                        external_id = %item.external_id,
                        error = %e,
                        "item fetch failed"
                    );
                    result.errors.push(format!("{}: {e}", item.external_id));
                }
            }

            let elapsed = started.elapsed().as_millis() as u64;
            ctx.progress.report(SyncProgress {
                stage: SyncStage::Persisting,
                discovered: result.discovered,
                fetched,
                persisted: result.processed(),
                chunks_created: result.chunks_created,
                eta_ms: estimate_eta_ms(elapsed, (position + 1) as u64, items.len() as u64),
                message: None,
            });
        }

        // Deletion sweep, gated behind a fully clean ingest. A transient API
        // failure must never erase previously good knowledge.
        if result.ingest_success() {
            for (external_id, source) in &known {
                if seen.contains(external_id) || ctx.scope.is_excluded(external_id) {
                    continue;
                }
                match self.corpus.delete_source(source.id).await {
                    Ok(()) => result.sources_deleted += 1,
                    Err(e) => result.errors.push(format!("delete {external_id}: {e}")),
                }
            }
        } else if !known.is_empty() {
            info!(
                subsystem = "sync",
                component = "orchestrator",
                connector = %connector,
                "skipping deletion sweep, pass did not ingest cleanly"
            );
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;

        // Canary for a pipeline failing open: content went through ingestion
        // with no errors, yet nothing was chunked.
        if result.discovered > 0
            && fetch_attempted
            && result.processed() > 0
            && result.chunks_created == 0
            && result.unchanged == 0
            && result.errors.is_empty()
        {
            let err = Error::PipelineInvariant(format!(
                "{} items discovered, {} ingested, zero chunks produced",
                result.discovered,
                result.processed()
            ));
            ctx.progress.report(SyncProgress {
                message: Some(err.to_string()),
                ..SyncProgress::stage(SyncStage::Error)
            });
            self.emit_audit(ctx, &result, false, vec![err.to_string()]).await;
            return Err(err);
        }

        let success = result.errors.is_empty();
        self.emit_audit(ctx, &result, success, result.errors.clone()).await;

        ctx.progress.report(SyncProgress {
            stage: SyncStage::Done,
            discovered: result.discovered,
            fetched,
            persisted: result.processed(),
            chunks_created: result.chunks_created,
            eta_ms: None,
            message: None,
        });
        info!(
            subsystem = "sync",
            component = "orchestrator",
            op = "run_sync",
            connector = %connector,
            account_id = %ctx.account_id,
            discovered = result.discovered,
            processed = result.processed(),
            chunk_count = result.chunks_created,
            duration_ms = result.elapsed_ms,
            success,
            "sync pass finished"
        );
        Ok(result)
    }

    /// Fetch and ingest a single item, for user-triggered lazy loads of
    /// items skipped under `on_demand` or `metadata_first`.
    pub async fn sync_on_demand(
        &self,
        engine: &dyn SyncEngine,
        ctx: &SyncContext,
        external_id: &str,
    ) -> Result<SyncResult> {
        let started = Instant::now();
        let items = engine.fetch_metadata(ctx).await?;
        let item = items
            .into_iter()
            .find(|i| i.external_id == external_id)
            .ok_or_else(|| Error::NotFound(format!("remote item {external_id}")))?;

        let content = engine
            .fetch_content(ctx, &item)
            .await?
            .ok_or_else(|| Error::Sync(format!("item {external_id} has no fetchable content")))?;

        let mut result = SyncResult {
            discovered: 1,
            ..Default::default()
        };
        self.sync_content(ctx, &content.item, &content.text, &mut result).await?;
        result.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Ingest one document: hash short-circuit, source upsert, new inactive
    /// version, chunks, embeddings, then activation. Exposed for the direct
    /// upload and transcript paths, which bypass sync engines.
    pub async fn ingest_document(&self, req: IngestRequest<'_>) -> Result<IngestOutcome> {
        let hash = content_hash(req.text);

        let existing = self
            .corpus
            .find_source(req.workspace_id, req.external_id, req.connector)
            .await?;

        // The source row's hash mirror is written before chunking and
        // embedding succeed, so it can run ahead of what retrieval serves.
        // Only the active version's hash proves the content is fully
        // ingested; comparing against it lets a pass that failed mid-ingest
        // be retried instead of reported as unchanged.
        if let Some(source) = &existing {
            let active = self.corpus.active_version(source.id).await?;
            if active.is_some_and(|v| v.content_hash == hash) {
                debug!(
                    subsystem = "sync",
                    component = "orchestrator",
                    source_id = %source.id,
                    "content hash unchanged, skipping re-ingestion"
                );
                return Ok(IngestOutcome {
                    source: source.clone(),
                    version: None,
                    chunks_created: 0,
                    created: false,
                    unchanged: true,
                });
            }
        }
        let created = existing.is_none();

        let source = self
            .corpus
            .upsert_source(NewSource {
                workspace_id: req.workspace_id,
                external_id: req.external_id.to_string(),
                connector: req.connector,
                title: req.title.to_string(),
                content_hash: hash.clone(),
                content: req.text.to_string(),
                visibility: req.visibility,
                created_by: req.user_id,
            })
            .await?;

        let version = self.corpus.create_version(source.id, req.text, &hash).await?;

        let slices = chunk_text(req.text, &self.chunker);
        let new_chunks: Vec<NewChunk> = slices
            .iter()
            .map(|slice| NewChunk {
                source_id: source.id,
                source_version_id: version.id,
                chunk_index: slice.index as i32,
                char_start: slice.start as i64,
                char_end: slice.end as i64,
                text: slice.text.clone(),
                token_estimate: slice.token_estimate as i64,
            })
            .collect();
        let chunks = self.corpus.insert_chunks(&new_chunks).await?;

        // Embedding precedes activation: if it fails, the prior version keeps
        // serving and the item is retried on a later pass.
        self.index.index_chunks(&chunks).await?;
        self.corpus.activate_version(version.id).await?;

        debug!(
            subsystem = "sync",
            component = "orchestrator",
            source_id = %source.id,
            chunk_count = chunks.len(),
            "document ingested"
        );
        Ok(IngestOutcome {
            source,
            version: Some(version),
            chunks_created: chunks.len() as u64,
            created,
            unchanged: false,
        })
    }

    /// Mode-based fetch decision for one discovered item. A known source
    /// counts as ingested only if it has an active version; one whose last
    /// ingestion failed before activation is refetched in every polling mode.
    async fn should_fetch(
        &self,
        mode: SyncMode,
        known: Option<&Source>,
        item: &RemoteItem,
    ) -> Result<bool> {
        if matches!(mode, SyncMode::OnDemand) {
            return Ok(false);
        }
        let Some(source) = known else {
            return Ok(true);
        };
        let Some(active) = self.corpus.active_version(source.id).await? else {
            return Ok(true);
        };
        Ok(match mode {
            SyncMode::Full => true,
            SyncMode::OnDemand => false,
            SyncMode::MetadataFirst => false,
            SyncMode::Smart => match &item.content_hash {
                Some(hash) => active.content_hash != *hash,
                // No upstream hash: fetch and let the stored-hash check decide.
                None => true,
            },
        })
    }

    async fn sync_content(
        &self,
        ctx: &SyncContext,
        item: &RemoteItem,
        text: &str,
        result: &mut SyncResult,
    ) -> Result<()> {
        ctx.progress.report(SyncProgress::stage(SyncStage::Chunking));
        let outcome = self
            .ingest_document(IngestRequest {
                workspace_id: ctx.workspace_id,
                user_id: ctx.user_id,
                external_id: &item.external_id,
                connector: ctx.connector(),
                title: &item.title,
                text,
                visibility: Visibility::Workspace,
            })
            .await?;

        if outcome.unchanged {
            result.unchanged += 1;
        } else {
            if outcome.created {
                result.sources_created += 1;
            } else {
                result.sources_updated += 1;
            }
            result.chunks_created += outcome.chunks_created;
        }
        Ok(())
    }

    async fn emit_audit(
        &self,
        ctx: &SyncContext,
        result: &SyncResult,
        success: bool,
        errors: Vec<String>,
    ) {
        let audit = NewSyncAudit {
            user_id: ctx.user_id,
            connector: ctx.connector(),
            account_id: ctx.account_id.clone(),
            discovered: result.discovered as i64,
            processed: result.processed() as i64,
            deleted: result.sources_deleted as i64,
            chunks_created: result.chunks_created as i64,
            success,
            errors,
        };
        // A pass outcome must not be masked by a failed audit write.
        if let Err(e) = self.audits.record_sync(audit).await {
            warn!(
                subsystem = "sync",
                component = "orchestrator",
                error = %e,
                "failed to record sync audit"
            );
        }
    }
}
