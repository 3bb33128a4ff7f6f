//! # corvid-search
//!
//! In-memory embedding index and the retrieval pipeline: vector-first search
//! over active chunks, a confidence-gated lexical fallback, hybrid score
//! blending, and minimum-result padding.

pub mod index;
pub mod lexical;
pub mod retrieval;

pub use index::EmbeddingIndex;
pub use retrieval::{
    MatchOrigin, RetrievalConfig, RetrievalDiagnostics, RetrievalFilters, RetrievalResponse,
    Retriever, RetrievedChunk,
};
