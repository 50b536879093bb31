//! Worker Network Protocol
//!
//! Endpoints served by every node for the shard it holds. Queries travel as
//! plain-text bodies; the index size is answered as a plain integer.

use serde::{Deserialize, Serialize};

use crate::scoring::types::{DocumentScore, DocumentTerms};

// --- API Endpoints ---

pub const ENDPOINT_PROCESS: &str = "/worker/process";
pub const ENDPOINT_SCORE: &str = "/worker/score";
pub const ENDPOINT_UPLOAD: &str = "/worker/upload";
pub const ENDPOINT_DOWNLOAD: &str = "/worker/download";
pub const ENDPOINT_INDEX_SIZE: &str = "/worker/index-size";

/// Multipart field carrying an uploaded file.
pub const UPLOAD_FIELD: &str = "file";
/// Upper bound on a single uploaded document.
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

// --- Data Transfer Objects ---

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub documents: Vec<DocumentTerms>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub scores: Vec<DocumentScore>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub document: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub path: String,
}
