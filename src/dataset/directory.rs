//! Datasets stored as directories of text files

use super::DatasetSource;
use crate::core::{DataItem, ItemResult, ItemStream, TaskError};
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads `<root>/<dataset_id>/*`; every regular file is one item
#[derive(Debug, Clone)]
pub struct DirectoryDatasets {
    root: PathBuf,
}

impl DirectoryDatasets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn valid_dataset_id(dataset_id: &str) -> bool {
    !dataset_id.is_empty()
        && !dataset_id.contains('/')
        && !dataset_id.contains('\\')
        && !dataset_id.contains("..")
}

async fn list_files(dir: &Path) -> Result<Vec<PathBuf>, TaskError> {
    let read_error =
        |e: std::io::Error| TaskError::validation(format!("cannot read dataset directory {}: {}", dir.display(), e));

    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_error)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.file_type().await.map_err(read_error)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

async fn read_item(path: PathBuf) -> ItemResult {
    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| TaskError::validation(format!("cannot read {}: {}", path.display(), e)))?;
    debug!(path = %path.display(), bytes = content.len(), "Read dataset file");
    Ok(DataItem::new(content).with_metadata("source_path", json!(path.display().to_string())))
}

impl DatasetSource for DirectoryDatasets {
    fn items(&self, dataset_id: &str) -> ItemStream {
        if !valid_dataset_id(dataset_id) {
            let err = TaskError::validation(format!("invalid dataset id '{}'", dataset_id));
            return stream::iter(vec![Err(err)]).boxed();
        }

        let dir = self.root.join(dataset_id);
        stream::once(async move { list_files(&dir).await })
            .flat_map(|listing| match listing {
                Ok(files) => stream::iter(files).then(read_item).boxed(),
                Err(err) => stream::iter(vec![Err(err)]).boxed(),
            })
            .boxed()
    }
}
