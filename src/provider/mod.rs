//! Embedding provider integration

pub mod error;
pub mod mock;

pub use error::ProviderError;
pub use mock::MockEmbeddingEngine;

use async_trait::async_trait;

/// Text embedding provider
#[async_trait]
pub trait EmbeddingEngine: Send + Sync {
    /// Provider name, used as the rate limiter key
    fn provider(&self) -> &str;

    /// Embed a batch of texts, one vector per text, in order
    async fn embed_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Dimension of the returned vectors
    fn get_vector_size(&self) -> usize;

    /// Maximum number of texts per call
    fn get_batch_size(&self) -> usize;
}
