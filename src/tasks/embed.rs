//! Embedding task

use crate::core::{DataItem, ItemResult, ItemStream, Task, TaskContext, TaskDefinition, TaskError};
use crate::execution::limiter::RateLimiter;
use crate::execution::retry::{RetryPolicy, Retryable};
use crate::provider::{EmbeddingEngine, ProviderError};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::debug;

/// Attaches an embedding vector to every item
pub struct EmbedTask {
    engine: Arc<dyn EmbeddingEngine>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    batch_size: usize,
}

impl EmbedTask {
    pub fn new(engine: Arc<dyn EmbeddingEngine>, limiter: RateLimiter, retry: RetryPolicy) -> Self {
        let batch_size = engine.get_batch_size().max(1);
        Self {
            engine,
            limiter,
            retry,
            batch_size,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Build from a definition; `batch_size` overrides the engine's batch size
    pub fn from_definition(
        definition: &TaskDefinition,
        engine: Arc<dyn EmbeddingEngine>,
        limiter: RateLimiter,
        retry: RetryPolicy,
    ) -> Result<Self, TaskError> {
        let batch_size = definition.param_usize("batch_size")?;
        let task = Self::new(engine, limiter, retry);
        Ok(match batch_size {
            Some(size) => task.with_batch_size(size),
            None => task,
        })
    }
}

impl Task for EmbedTask {
    fn run(&self, input: ItemStream, ctx: TaskContext) -> ItemStream {
        let engine = self.engine.clone();
        let limiter = self.limiter.clone();
        let retry = self.retry;

        input
            .chunks(self.batch_size)
            .then(move |batch| {
                let engine = engine.clone();
                let limiter = limiter.clone();
                let ctx = ctx.clone();
                async move { embed_batch(batch, engine.as_ref(), &limiter, &retry, &ctx).await }
            })
            .flat_map(stream::iter)
            .boxed()
    }
}

fn provider_failure(err: &ProviderError) -> TaskError {
    if err.is_retryable() {
        TaskError::transient(format!("embedding provider kept failing: {}", err))
    } else {
        TaskError::permanent(format!("embedding provider rejected the request: {}", err))
    }
}

async fn embed_batch(
    batch: Vec<ItemResult>,
    engine: &dyn EmbeddingEngine,
    limiter: &RateLimiter,
    retry: &RetryPolicy,
    ctx: &TaskContext,
) -> Vec<ItemResult> {
    let mut items: Vec<DataItem> = Vec::with_capacity(batch.len());
    for result in batch {
        match result {
            Ok(item) => items.push(item),
            // The run is failing; the rest of the batch is moot
            Err(err) => return vec![Err(err)],
        }
    }
    if items.is_empty() {
        return Vec::new();
    }

    let texts: Vec<String> = items.iter().map(|item| item.content.clone()).collect();
    let provider = engine.provider();
    debug!(task = %ctx.task_name, provider, batch = texts.len(), "Embedding batch");

    let texts = &texts;
    let outcome = retry
        .retry(
            "embed_text",
            |_| ctx.record_retry(),
            move || async move {
                let _permit = limiter.acquire(provider).await?;
                let vectors = engine.embed_text(texts).await?;
                Ok::<_, ProviderError>(vectors)
            },
        )
        .await;

    let vectors = match outcome {
        Ok(vectors) => vectors,
        Err(err) => return vec![Err(provider_failure(&err))],
    };

    if vectors.len() != items.len() {
        return vec![Err(TaskError::permanent(format!(
            "provider returned {} vectors for {} texts",
            vectors.len(),
            items.len()
        )))];
    }

    let expected = engine.get_vector_size();
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        return vec![Err(TaskError::validation(format!(
            "embedding has {} dimensions, expected {}",
            bad.len(),
            expected
        )))];
    }

    items
        .into_iter()
        .zip(vectors)
        .map(|(mut item, vector)| {
            item.embedding = Some(vector);
            Ok(item)
        })
        .collect()
}
