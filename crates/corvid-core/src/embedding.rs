//! Embedding provider interface and deterministic mock.
//!
//! Real providers live outside this workspace; the pipeline consumes them as
//! opaque functions behind [`EmbeddingProvider`]. [`MockEmbedder`] generates
//! deterministic unit vectors for tests and local development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::defaults;
use crate::error::{Error, Result};

/// Opaque embedding backend: fixed-length float vectors, compared by cosine
/// similarity.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Vector length this provider produces.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Deterministic mock embedding provider.
///
/// The same text always produces the same unit vector (character-based
/// hashing). Specific texts can be pinned to explicit vectors to construct
/// controlled-similarity scenarios, and all calls are logged for assertions.
#[derive(Clone)]
pub struct MockEmbedder {
    dimension: usize,
    pinned: Arc<Mutex<HashMap<String, Vec<f32>>>>,
    fail: Arc<Mutex<bool>>,
    call_log: Arc<Mutex<Vec<String>>>,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(defaults::EMBED_DIMENSION)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            pinned: Arc::new(Mutex::new(HashMap::new())),
            fail: Arc::new(Mutex::new(false)),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Pin an exact (normalized) vector for a specific input text.
    pub fn pin(&self, text: impl Into<String>, mut vector: Vec<f32>) {
        normalize(&mut vector);
        self.pinned.lock().unwrap().insert(text.into(), vector);
    }

    /// Make all subsequent calls fail (for error-path tests).
    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock().unwrap() = failing;
    }

    /// Texts embedded so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.call_log.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    /// Generate the deterministic unit vector for a text.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0f32; dimension];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % dimension;
            vec[idx] += 0.1;
        }
        normalize(&mut vec);
        vec
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.call_log.lock().unwrap().push(text.to_string());
        if *self.fail.lock().unwrap() {
            return Err(Error::Embedding("mock embedder set to fail".into()));
        }
        if let Some(pinned) = self.pinned.lock().unwrap().get(text) {
            return Ok(pinned.clone());
        }
        Ok(Self::generate(text, self.dimension))
    }
}

fn normalize(vec: &mut [f32]) {
    let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        vec.iter_mut().for_each(|x| *x /= magnitude);
    }
}

/// Cosine similarity between two equal-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have the same dimension");
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a > 0.0 && mag_b > 0.0 {
        dot / (mag_a * mag_b)
    } else {
        0.0
    }
}
