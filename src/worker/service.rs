use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use super::index::LocalIndex;
use crate::error::{Error, Result};
use crate::scoring::engine::local_relevance;
use crate::scoring::tokenizer::tokenize_query;
use crate::scoring::types::{DocumentScore, DocumentTerms};

/// A document fetched from this node's local copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// The shard this node serves: its documents and their index.
pub struct WorkerService {
    index: LocalIndex,
}

impl WorkerService {
    pub async fn open(documents_root: impl Into<PathBuf>, index_dir: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let index = LocalIndex::open(documents_root, index_dir).await?;
        Ok(Arc::new(Self { index }))
    }

    pub fn documents_root(&self) -> &Path {
        self.index.documents_root()
    }

    pub fn document_count(&self) -> usize {
        self.index.len()
    }

    /// Raw term counts of the query terms over every local document.
    pub fn process(&self, query: &str) -> Vec<DocumentTerms> {
        let terms = tokenize_query(query);
        let reports = self.index.term_counts(&terms);
        tracing::debug!("Processed '{}' over {} local documents", query, reports.len());
        reports
    }

    /// Relevance of matching local documents, scored against this shard only.
    pub fn score(&self, query: &str) -> Vec<DocumentScore> {
        let terms = tokenize_query(query);
        local_relevance(&terms, &self.index.term_counts(&terms))
    }

    /// Stores an uploaded file directly under the document root, replacing
    /// any previous file of that name, and indexes it. Returns the document id.
    pub async fn upload(&self, file_name: &str, bytes: &[u8]) -> Result<String> {
        if bytes.is_empty() {
            return Err(Error::InvalidRequest("uploaded file is empty".to_string()));
        }

        let name = Path::new(file_name)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| Error::InvalidRequest(format!("invalid file name '{}'", file_name)))?
            .to_string();

        let target = self.documents_root().join(&name);
        if target.starts_with(self.index.index_dir()) {
            return Err(Error::InvalidRequest(format!("invalid file name '{}'", file_name)));
        }

        tokio::fs::write(&target, bytes).await?;
        self.index.index_document(&name).await?;

        info!("Stored and indexed {} ({} bytes)", name, bytes.len());
        Ok(name)
    }

    /// Reads a document by its root-relative path. Anything resolving outside
    /// the document root, or into the index, is reported as not found.
    pub async fn download(&self, relative: &str) -> Result<LocalFile> {
        let not_found = || Error::NotFound(relative.to_string());

        let relative_path = Path::new(relative);
        if relative.is_empty()
            || relative_path
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(not_found());
        }

        let resolved = tokio::fs::canonicalize(self.documents_root().join(relative_path))
            .await
            .map_err(|_| not_found())?;
        if !resolved.starts_with(self.documents_root()) || resolved.starts_with(self.index.index_dir()) {
            tracing::warn!("Rejected download outside the document root: {}", relative);
            return Err(not_found());
        }

        let metadata = tokio::fs::metadata(&resolved).await.map_err(|_| not_found())?;
        if !metadata.is_file() {
            return Err(not_found());
        }

        let bytes = tokio::fs::read(&resolved).await?;
        let file_name = resolved
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| relative.to_string());

        Ok(LocalFile { file_name, bytes })
    }

    pub async fn index_size(&self) -> Result<u64> {
        self.index.size_on_disk().await
    }

    pub async fn reindex(&self) -> Result<usize> {
        self.index.rebuild().await
    }
}
