//! Offline embedding engine

use super::{EmbeddingEngine, ProviderError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Embedding engine that returns zero vectors without calling out
#[derive(Debug)]
pub struct MockEmbeddingEngine {
    dimensions: usize,
    batch_size: usize,
    calls: AtomicUsize,
}

impl MockEmbeddingEngine {
    pub fn new(dimensions: usize, batch_size: usize) -> Self {
        Self {
            dimensions,
            batch_size,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `embed_text` calls served so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockEmbeddingEngine {
    fn default() -> Self {
        Self::new(1024, 100)
    }
}

#[async_trait]
impl EmbeddingEngine for MockEmbeddingEngine {
    fn provider(&self) -> &str {
        "mock"
    }

    async fn embed_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|_| vec![0.0; self.dimensions]).collect())
    }

    fn get_vector_size(&self) -> usize {
        self.dimensions
    }

    fn get_batch_size(&self) -> usize {
        self.batch_size
    }
}
