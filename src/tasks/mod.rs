//! Built-in tasks

pub mod chunk;
pub mod embed;

pub use chunk::{split_into_chunks, ChunkTask};
pub use embed::EmbedTask;

use crate::core::{Task, TaskKind};
use crate::execution::limiter::RateLimiter;
use crate::execution::registry::TaskRegistry;
use crate::execution::retry::RetryPolicy;
use crate::provider::EmbeddingEngine;
use std::sync::Arc;

/// Register the `chunk` and `embed` kinds
pub fn register_builtins(
    registry: &mut TaskRegistry,
    engine: Arc<dyn EmbeddingEngine>,
    limiter: RateLimiter,
    retry: RetryPolicy,
) {
    registry.register(TaskKind::Chunk, |definition| {
        Ok(Arc::new(ChunkTask::from_definition(definition)?) as Arc<dyn Task>)
    });
    registry.register(TaskKind::Embed, move |definition| {
        let task = EmbedTask::from_definition(definition, engine.clone(), limiter.clone(), retry)?;
        Ok(Arc::new(task) as Arc<dyn Task>)
    });
}
