//! # corvid-core
//!
//! Core types, traits, and abstractions for the corvid corpus engine.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the other corvid crates depend on: the job/corpus data model, the
//! repository interfaces, the chunker, and the embedding-provider interface.

pub mod chunker;
pub mod defaults;
pub mod embedding;
pub mod error;
pub mod hash;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use chunker::{chunk_text, ChunkerConfig, TextSlice};
pub use embedding::{cosine_similarity, EmbeddingProvider, MockEmbedder};
pub use error::{Error, Result};
pub use hash::content_hash;
pub use models::*;
pub use traits::*;
