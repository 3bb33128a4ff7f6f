//! In-memory embedding index with a hydrate-once lifecycle.
//!
//! Process-wide map from chunk id to embedding vector. On a fresh process the
//! map is empty; the first retrieval against a workspace triggers hydration
//! from that workspace's persisted active chunks, and concurrent callers wait
//! on the same in-flight hydration instead of duplicating the work. Batch
//! indexing serializes writers; readers are never blocked by each other.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use corvid_core::{cosine_similarity, Chunk, CorpusRepository, EmbeddingProvider, Result};

pub struct EmbeddingIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: RwLock<HashMap<Uuid, Vec<f32>>>,
    // One hydration guard per workspace; the cell's single init is the shared
    // in-flight hydration.
    hydrations: std::sync::Mutex<HashMap<Uuid, Arc<OnceCell<()>>>>,
    write_guard: Mutex<()>,
}

impl EmbeddingIndex {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            vectors: RwLock::new(HashMap::new()),
            hydrations: std::sync::Mutex::new(HashMap::new()),
            write_guard: Mutex::new(()),
        }
    }

    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        self.embedder.clone()
    }

    /// Embed and store a batch of freshly persisted chunks. Writers are
    /// serialized per batch.
    pub async fn index_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let _writer = self.write_guard.lock().await;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let mut vectors = self.vectors.write().await;
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            vectors.insert(chunk.id, embedding);
        }
        debug!(
            subsystem = "search",
            component = "embedding_index",
            chunk_count = chunks.len(),
            "indexed chunk batch"
        );
        Ok(chunks.len())
    }

    /// Ensure this workspace's active chunks are present in the index,
    /// hydrating from storage on first use after a restart.
    pub async fn ensure_hydrated(
        &self,
        corpus: &dyn CorpusRepository,
        workspace_id: Uuid,
    ) -> Result<()> {
        let cell = {
            let mut map = self
                .hydrations
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            map.entry(workspace_id).or_default().clone()
        };

        cell.get_or_try_init(|| async {
            let active = corpus.active_chunks(workspace_id).await?;
            let missing: Vec<Chunk> = {
                let vectors = self.vectors.read().await;
                active
                    .into_iter()
                    .map(|ac| ac.chunk)
                    .filter(|c| !vectors.contains_key(&c.id))
                    .collect()
            };
            let hydrated = self.index_chunks(&missing).await?;
            info!(
                subsystem = "search",
                component = "embedding_index",
                op = "hydrate",
                chunk_count = hydrated,
                "hydrated embedding index"
            );
            Ok::<(), corvid_core::Error>(())
        })
        .await?;
        Ok(())
    }

    /// Cosine similarity of the query vector against each candidate chunk.
    /// Chunks without a cached embedding are skipped.
    pub async fn similarities(&self, query: &[f32], candidates: &[Uuid]) -> Vec<(Uuid, f32)> {
        let vectors = self.vectors.read().await;
        candidates
            .iter()
            .filter_map(|id| {
                vectors
                    .get(id)
                    .map(|vec| (*id, cosine_similarity(query, vec)))
            })
            .collect()
    }

    pub async fn contains(&self, chunk_id: Uuid) -> bool {
        self.vectors.read().await.contains_key(&chunk_id)
    }

    pub async fn len(&self) -> usize {
        self.vectors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.vectors.read().await.is_empty()
    }
}
