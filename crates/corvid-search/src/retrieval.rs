//! Vector-first retrieval with confidence-gated lexical fallback.
//!
//! Pipeline: resolve the visible corpus, score it against the query
//! embedding, and when the top similarity is below the confidence threshold
//! (or there are no vector hits at all) widen through the synonym-expanded
//! lexical scorer and blend both result sets. Results are padded to a
//! minimum count whenever the corpus is non-empty, so answer generation
//! always has some grounding context.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use corvid_core::defaults;
use corvid_core::{ActiveChunk, Chunk, ConnectorType, CorpusRepository, Result, SourceMeta, Visibility};

use crate::index::EmbeddingIndex;
use crate::lexical;

/// Retrieval tuning. The threshold and blend weight are deliberate
/// configuration, not semantics: defaults match production behavior.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub confidence_threshold: f32,
    pub hybrid_alpha: f32,
    pub fallback_multiplier: usize,
    pub min_results: usize,
    pub pad_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: defaults::RETRIEVAL_TOP_K,
            confidence_threshold: defaults::CONFIDENCE_THRESHOLD,
            hybrid_alpha: defaults::HYBRID_ALPHA,
            fallback_multiplier: defaults::FALLBACK_K_MULTIPLIER,
            min_results: defaults::RETRIEVAL_MIN_RESULTS,
            pad_score: defaults::PAD_SCORE,
        }
    }
}

impl RetrievalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("RETRIEVAL_TOP_K") {
            if let Ok(n) = v.parse() {
                config.top_k = n;
            }
        }
        if let Ok(v) = std::env::var("RETRIEVAL_CONFIDENCE_THRESHOLD") {
            if let Ok(t) = v.parse() {
                config.confidence_threshold = t;
            }
        }
        if let Ok(v) = std::env::var("RETRIEVAL_HYBRID_ALPHA") {
            if let Ok(a) = v.parse() {
                config.hybrid_alpha = a;
            }
        }
        config
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_hybrid_alpha(mut self, alpha: f32) -> Self {
        self.hybrid_alpha = alpha;
        self
    }

    pub fn with_min_results(mut self, min_results: usize) -> Self {
        self.min_results = min_results;
        self
    }
}

/// Who is asking and what slice of the workspace they may see.
#[derive(Debug, Clone)]
pub struct RetrievalFilters {
    pub workspace_id: Uuid,
    pub requester: Uuid,
    pub connectors: Option<Vec<ConnectorType>>,
}

impl RetrievalFilters {
    pub fn new(workspace_id: Uuid, requester: Uuid) -> Self {
        Self {
            workspace_id,
            requester,
            connectors: None,
        }
    }

    pub fn with_connectors(mut self, connectors: Vec<ConnectorType>) -> Self {
        self.connectors = Some(connectors);
        self
    }
}

/// Which stage of the pipeline produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOrigin {
    /// Vector similarity only.
    Vector,
    /// Lexical fallback only.
    Lexical,
    /// Present in both sets, score blended.
    Hybrid,
    /// Minimum-result padding.
    Padding,
}

/// One ranked result with its citation metadata.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub source: SourceMeta,
    pub score: f32,
    pub origin: MatchOrigin,
}

/// Pipeline decision trail, returned with every response for observability
/// and test assertions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalDiagnostics {
    pub corpus_size: usize,
    pub primary_count: usize,
    pub primary_top_score: Option<f32>,
    pub used_fallback: bool,
    pub fallback_count: usize,
    pub merged_count: usize,
    pub padded: usize,
    pub reason: String,
}

#[derive(Debug)]
pub struct RetrievalResponse {
    pub results: Vec<RetrievedChunk>,
    pub diagnostics: RetrievalDiagnostics,
}

pub struct Retriever {
    corpus: Arc<dyn CorpusRepository>,
    index: Arc<EmbeddingIndex>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(corpus: Arc<dyn CorpusRepository>, index: Arc<EmbeddingIndex>) -> Self {
        Self {
            corpus,
            index,
            config: RetrievalConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// Answer a query against the workspace corpus.
    pub async fn retrieve(
        &self,
        query: &str,
        filters: &RetrievalFilters,
    ) -> Result<RetrievalResponse> {
        let active = self.corpus.active_chunks(filters.workspace_id).await?;
        let total_active = active.len();

        let allowed: Vec<ActiveChunk> = active
            .into_iter()
            .filter(|ac| self.is_visible(ac, filters))
            .collect();

        if allowed.is_empty() {
            let reason = if total_active == 0 {
                "corpus_empty"
            } else {
                "all_chunks_filtered"
            };
            debug!(
                subsystem = "search",
                component = "retrieval",
                reason,
                "retrieval short-circuit"
            );
            return Ok(RetrievalResponse {
                results: Vec::new(),
                diagnostics: RetrievalDiagnostics {
                    reason: reason.to_string(),
                    ..Default::default()
                },
            });
        }

        self.index
            .ensure_hydrated(self.corpus.as_ref(), filters.workspace_id)
            .await?;

        let by_id: HashMap<Uuid, &ActiveChunk> =
            allowed.iter().map(|ac| (ac.chunk.id, ac)).collect();
        let candidate_ids: Vec<Uuid> = allowed.iter().map(|ac| ac.chunk.id).collect();

        // Primary: vector similarity over every allowed chunk.
        let query_vec = self.index.embedder().embed(query).await?;
        let mut primary = self.index.similarities(&query_vec, &candidate_ids).await;
        sort_scores(&mut primary);
        primary.truncate(self.config.top_k);

        let primary_top_score = primary.first().map(|(_, s)| *s);
        let used_fallback = match primary_top_score {
            None => true,
            Some(top) => top < self.config.confidence_threshold,
        };

        // Fallback: synonym-expanded lexical scoring, widened beyond top-k.
        let mut fallback: Vec<(Uuid, f32)> = Vec::new();
        if used_fallback {
            let phrases = lexical::expand_query(query);
            let terms = lexical::query_terms(query);
            fallback = allowed
                .iter()
                .filter_map(|ac| {
                    let score = lexical::lexical_score(&ac.chunk.text, &phrases, &terms);
                    (score > 0.0).then_some((ac.chunk.id, score))
                })
                .collect();
            sort_scores(&mut fallback);
            fallback.truncate(self.config.top_k * self.config.fallback_multiplier);
        }

        let diagnostics_primary_count = primary.len();
        let diagnostics_fallback_count = fallback.len();

        // Hybrid merge by chunk identity.
        let alpha = self.config.hybrid_alpha;
        let lexical_by_id: HashMap<Uuid, f32> = fallback.iter().copied().collect();
        let mut merged: Vec<(Uuid, f32, MatchOrigin)> = Vec::new();
        for (id, vector_score) in &primary {
            match lexical_by_id.get(id) {
                Some(lex) => merged.push((
                    *id,
                    alpha * vector_score + (1.0 - alpha) * lex,
                    MatchOrigin::Hybrid,
                )),
                None => merged.push((*id, *vector_score, MatchOrigin::Vector)),
            }
        }
        for (id, lex) in &fallback {
            if !primary.iter().any(|(pid, _)| pid == id) {
                merged.push((*id, (1.0 - alpha) * lex, MatchOrigin::Lexical));
            }
        }
        merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        merged.truncate(self.config.top_k);
        let merged_count = merged.len();

        // Minimum-result padding from the unselected remainder.
        let mut padded = 0usize;
        if merged.len() < self.config.min_results {
            for ac in &allowed {
                if merged.len() >= self.config.min_results {
                    break;
                }
                if merged.iter().any(|(id, _, _)| *id == ac.chunk.id) {
                    continue;
                }
                merged.push((ac.chunk.id, self.config.pad_score, MatchOrigin::Padding));
                padded += 1;
            }
        }

        let results: Vec<RetrievedChunk> = merged
            .into_iter()
            .filter_map(|(id, score, origin)| {
                by_id.get(&id).map(|ac| RetrievedChunk {
                    chunk: ac.chunk.clone(),
                    source: ac.source.clone(),
                    score,
                    origin,
                })
            })
            .collect();

        let reason = if used_fallback {
            if primary_top_score.is_none() {
                "no_vector_hits"
            } else {
                "below_confidence_threshold"
            }
        } else {
            "vector_confident"
        };

        info!(
            subsystem = "search",
            component = "retrieval",
            op = "retrieve",
            corpus_size = allowed.len(),
            result_count = results.len(),
            used_fallback,
            reason,
            "retrieval completed"
        );

        Ok(RetrievalResponse {
            results,
            diagnostics: RetrievalDiagnostics {
                corpus_size: allowed.len(),
                primary_count: diagnostics_primary_count,
                primary_top_score,
                used_fallback,
                fallback_count: diagnostics_fallback_count,
                merged_count,
                padded,
                reason: reason.to_string(),
            },
        })
    }

    fn is_visible(&self, ac: &ActiveChunk, filters: &RetrievalFilters) -> bool {
        if ac.source.visibility == Visibility::Private && ac.source.created_by != filters.requester
        {
            return false;
        }
        if let Some(connectors) = &filters.connectors {
            if !connectors.contains(&ac.source.connector) {
                return false;
            }
        }
        true
    }
}

fn sort_scores(scores: &mut [(Uuid, f32)]) {
    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
}
