//! Per-provider concurrency limiter

use crate::provider::ProviderError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Bounds simultaneous external calls per provider
///
/// Callers beyond the limit suspend until a permit is released. Permits are
/// released when dropped.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    default_limit: usize,
    limits: HashMap<String, usize>,
    semaphores: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl RateLimiter {
    pub fn new(default_limit: usize) -> Self {
        Self {
            default_limit: default_limit.max(1),
            limits: HashMap::new(),
            semaphores: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Override the limit of one provider
    pub fn with_limit(mut self, provider: impl Into<String>, limit: usize) -> Self {
        self.limits.insert(provider.into(), limit.max(1));
        self
    }

    async fn semaphore(&self, provider: &str) -> Arc<Semaphore> {
        let mut semaphores = self.semaphores.lock().await;
        semaphores
            .entry(provider.to_string())
            .or_insert_with(|| {
                let limit = self.limits.get(provider).copied().unwrap_or(self.default_limit);
                Arc::new(Semaphore::new(limit))
            })
            .clone()
    }

    /// Wait for a call slot
    pub async fn acquire(&self, provider: &str) -> Result<OwnedSemaphorePermit, ProviderError> {
        let semaphore = self.semaphore(provider).await;
        debug!(provider, available = semaphore.available_permits(), "Acquiring provider permit");
        semaphore
            .acquire_owned()
            .await
            .map_err(|_| ProviderError::Unavailable(provider.to_string()))
    }

    /// Free slots for a provider
    pub async fn available(&self, provider: &str) -> usize {
        self.semaphore(provider).await.available_permits()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_permits_are_released_on_drop() {
        let limiter = RateLimiter::new(2);

        let first = limiter.acquire("mock").await.unwrap();
        let _second = limiter.acquire("mock").await.unwrap();
        assert_eq!(limiter.available("mock").await, 0);

        drop(first);
        assert_eq!(limiter.available("mock").await, 1);
    }

    #[tokio::test]
    async fn test_waiters_suspend_until_a_slot_frees() {
        let limiter = RateLimiter::new(1);
        let held = limiter.acquire("mock").await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire("mock").await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_providers_are_independent() {
        let limiter = RateLimiter::new(1).with_limit("ollama", 3);

        let _held = limiter.acquire("mock").await.unwrap();
        assert_eq!(limiter.available("mock").await, 0);
        assert_eq!(limiter.available("ollama").await, 3);
    }
}
