//! Coordinator Network Protocol
//!
//! Client-facing endpoints answered only by the elected leader. `start`
//! takes the raw query text as its body and returns a JSON object of
//! document -> score with keys in ascending order.

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

pub const ENDPOINT_START: &str = "/leader/start";
pub const ENDPOINT_UPLOAD: &str = "/leader/upload";
pub const ENDPOINT_DOWNLOAD: &str = "/leader/download";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResult {
    pub status: String,
    pub worker: String,
    pub document: String,
}
