//! Shard-local term index.
//!
//! Every document under the document root is reduced to lowercase word
//! counts and kept in memory for queries. The whole index is persisted as a
//! bincode snapshot so that a restart only re-reads documents whose size or
//! modification time changed.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::scoring::tokenizer::{filename_terms, term_counts};
use crate::scoring::types::DocumentTerms;

pub const SNAPSHOT_FILE: &str = "segments.bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexedDocument {
    size: u64,
    modified_ms: u64,
    terms: HashMap<String, u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexSnapshot {
    documents: BTreeMap<String, IndexedDocument>,
}

pub struct LocalIndex {
    documents_root: PathBuf,
    index_dir: PathBuf,
    documents: DashMap<String, IndexedDocument>,
    /// Held by every mutation, including the snapshot write.
    writer: Mutex<()>,
}

impl LocalIndex {
    /// Opens the index, reusing the persisted snapshot for unchanged
    /// documents and indexing the rest.
    pub async fn open(documents_root: impl Into<PathBuf>, index_dir: impl Into<PathBuf>) -> Result<Self> {
        let documents_root = documents_root.into();
        let index_dir = index_dir.into();
        tokio::fs::create_dir_all(&documents_root).await?;
        tokio::fs::create_dir_all(&index_dir).await?;

        let index = Self {
            documents_root: tokio::fs::canonicalize(&documents_root).await?,
            index_dir: tokio::fs::canonicalize(&index_dir).await?,
            documents: DashMap::new(),
            writer: Mutex::new(()),
        };
        index.rebuild().await?;
        Ok(index)
    }

    pub fn documents_root(&self) -> &Path {
        &self.documents_root
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    /// Re-synchronises the index with the document root and persists it.
    /// Returns the number of documents that had to be read.
    pub async fn rebuild(&self) -> Result<usize> {
        let _writer = self.writer.lock().await;
        let previous = self.load_snapshot().await;

        let files = self.walk_documents().await?;
        let mut refreshed = 0;
        let mut fresh = Vec::with_capacity(files.len());

        for (relative, path) in files {
            match load_document(&path, previous.documents.get(&relative)).await {
                Ok((document, reread)) => {
                    if reread {
                        refreshed += 1;
                    }
                    fresh.push((relative, document));
                }
                Err(e) => warn!("Skipping unreadable document {}: {}", path.display(), e),
            }
        }

        // Swap in place so readers never see an emptied index.
        let live: HashSet<&str> = fresh.iter().map(|(relative, _)| relative.as_str()).collect();
        self.documents.retain(|relative, _| live.contains(relative.as_str()));
        for (relative, document) in fresh {
            self.documents.insert(relative, document);
        }

        self.persist().await?;
        info!(
            "Indexed {} documents under {} ({} re-read)",
            self.documents.len(),
            self.documents_root.display(),
            refreshed
        );
        Ok(refreshed)
    }

    /// Indexes (or re-indexes) one document given by its root-relative id.
    pub async fn index_document(&self, relative: &str) -> Result<()> {
        let path = self.documents_root.join(relative);
        let _writer = self.writer.lock().await;

        let metadata = tokio::fs::metadata(&path).await?;
        let document = IndexedDocument {
            size: metadata.len(),
            modified_ms: modified_millis(&metadata),
            terms: extract_terms(&path).await?,
        };
        self.documents.insert(relative.to_string(), document);
        self.persist().await?;

        tracing::debug!("Indexed document {}", relative);
        Ok(())
    }

    /// Raw counts of each term for every held document. Terms a document does
    /// not contain are reported with a zero count.
    pub fn term_counts(&self, terms: &[String]) -> Vec<DocumentTerms> {
        let mut reports: Vec<DocumentTerms> = self
            .documents
            .iter()
            .map(|entry| DocumentTerms {
                document: entry.key().clone(),
                term_frequency: terms
                    .iter()
                    .map(|term| (term.clone(), entry.value().terms.get(term).copied().unwrap_or(0)))
                    .collect(),
            })
            .collect();
        reports.sort_by(|a, b| a.document.cmp(&b.document));
        reports
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn contains(&self, relative: &str) -> bool {
        self.documents.contains_key(relative)
    }

    /// Bytes currently occupied by the index directory.
    pub async fn size_on_disk(&self) -> Result<u64> {
        let mut total = 0;
        let mut pending = vec![self.index_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    total += entry.metadata().await?.len();
                }
            }
        }

        Ok(total)
    }

    async fn load_snapshot(&self) -> IndexSnapshot {
        let path = self.index_dir.join(SNAPSHOT_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => return IndexSnapshot::default(),
        };

        match bincode::deserialize::<IndexSnapshot>(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Discarding unreadable index snapshot {}: {}", path.display(), e);
                IndexSnapshot::default()
            }
        }
    }

    async fn persist(&self) -> Result<()> {
        let snapshot = IndexSnapshot {
            documents: self
                .documents
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        };
        let bytes = bincode::serialize(&snapshot)?;

        let target = self.index_dir.join(SNAPSHOT_FILE);
        let staging = self.index_dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &target).await?;
        Ok(())
    }

    /// Every regular file (or symlink not pointing at a directory) under the
    /// document root, keyed by its slash-separated relative path. The index
    /// directory is skipped, as are subdirectories that cannot be listed.
    async fn walk_documents(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        let mut pending = vec![self.documents_root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir != self.documents_root => {
                    warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;

                let is_document = if file_type.is_dir() {
                    if path != self.index_dir {
                        pending.push(path.clone());
                    }
                    false
                } else if file_type.is_symlink() {
                    // Dangling links are kept so the rebuild reports them.
                    !tokio::fs::metadata(&path).await.is_ok_and(|target| target.is_dir())
                } else {
                    file_type.is_file()
                };

                if is_document && let Some(relative) = relative_id(&self.documents_root, &path) {
                    files.push((relative, path));
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

/// Slash-separated path of `path` relative to `root`.
pub fn relative_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Returns the document's index entry and whether it had to be re-read,
/// reusing `cached` when size and modification time still match.
async fn load_document(path: &Path, cached: Option<&IndexedDocument>) -> Result<(IndexedDocument, bool)> {
    let metadata = tokio::fs::metadata(path).await?;
    let size = metadata.len();
    let modified_ms = modified_millis(&metadata);

    if let Some(doc) = cached.filter(|doc| doc.size == size && doc.modified_ms == modified_ms) {
        return Ok((doc.clone(), false));
    }

    let document = IndexedDocument {
        size,
        modified_ms,
        terms: extract_terms(path).await?,
    };
    Ok((document, true))
}

/// Word counts of a document body, falling back to the file name's words
/// when the body is not text.
async fn extract_terms(path: &Path) -> Result<HashMap<String, u64>> {
    let bytes = tokio::fs::read(path).await?;

    match String::from_utf8(bytes) {
        Ok(text) => Ok(term_counts(&text)),
        Err(_) => {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| Error::InvalidRequest(format!("{} has no file name", path.display())))?;
            tracing::debug!("{} is not text; indexing its file name only", path.display());
            Ok(filename_terms(&name))
        }
    }
}

fn modified_millis(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
