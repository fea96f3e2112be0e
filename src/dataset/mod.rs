//! Dataset sources - where a run's input items come from

pub mod directory;

pub use directory::DirectoryDatasets;

use crate::core::{DataItem, ItemStream, TaskError};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Supplies the items of a dataset as a lazy stream
pub trait DatasetSource: Send + Sync {
    fn items(&self, dataset_id: &str) -> ItemStream;
}

/// Datasets held in memory
#[derive(Clone, Default)]
pub struct InMemoryDatasets {
    datasets: Arc<RwLock<HashMap<String, Vec<DataItem>>>>,
}

impl InMemoryDatasets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a dataset
    pub async fn insert(&self, dataset_id: impl Into<String>, items: Vec<DataItem>) {
        self.datasets.write().await.insert(dataset_id.into(), items);
    }

    /// Create or replace a dataset from plain texts
    pub async fn insert_texts<S: AsRef<str>>(&self, dataset_id: impl Into<String>, texts: &[S]) {
        let items = texts.iter().map(|t| DataItem::new(t.as_ref())).collect();
        self.insert(dataset_id, items).await;
    }
}

impl DatasetSource for InMemoryDatasets {
    fn items(&self, dataset_id: &str) -> ItemStream {
        let datasets = self.datasets.clone();
        let dataset_id = dataset_id.to_string();

        stream::once(async move {
            let items = datasets.read().await.get(&dataset_id).cloned();
            items.ok_or_else(|| TaskError::validation(format!("dataset '{}' not found", dataset_id)))
        })
        .flat_map(|found| match found {
            Ok(items) => stream::iter(items.into_iter().map(Ok)).boxed(),
            Err(err) => stream::iter(vec![Err(err)]).boxed(),
        })
        .boxed()
    }
}
