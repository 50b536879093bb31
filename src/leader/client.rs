use async_trait::async_trait;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::scoring::types::{DocumentScore, DocumentTerms};
use crate::worker::protocol::*;

/// Calls the leader makes against one worker.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn process(&self, address: &str, query: &str) -> Result<Vec<DocumentTerms>>;

    async fn score(&self, address: &str, query: &str) -> Result<Vec<DocumentScore>>;

    async fn index_size(&self, address: &str) -> Result<u64>;

    /// Returns the document id the worker stored the file under.
    async fn upload(&self, address: &str, file_name: &str, bytes: Vec<u8>) -> Result<String>;

    /// `Ok(None)` when the worker does not hold the file.
    async fn download(&self, address: &str, path: &str) -> Result<Option<Vec<u8>>>;
}

pub struct HttpWorkerClient {
    client: reqwest::Client,
    upload_timeout: Duration,
}

impl HttpWorkerClient {
    /// `request_timeout` bounds every call except uploads, which get
    /// `upload_timeout`.
    pub fn new(request_timeout: Duration, upload_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, upload_timeout })
    }

    fn url(address: &str, endpoint: &str) -> String {
        format!("{}{}", address.trim_end_matches('/'), endpoint)
    }
}

fn check_status(address: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(Error::Worker {
            address: address.to_string(),
            message: format!("status {}", response.status()),
        })
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn process(&self, address: &str, query: &str) -> Result<Vec<DocumentTerms>> {
        let response = self
            .client
            .post(Self::url(address, ENDPOINT_PROCESS))
            .body(query.to_string())
            .send()
            .await?;
        let body: ProcessResponse = check_status(address, response)?.json().await?;
        Ok(body.documents)
    }

    async fn score(&self, address: &str, query: &str) -> Result<Vec<DocumentScore>> {
        let response = self
            .client
            .post(Self::url(address, ENDPOINT_SCORE))
            .body(query.to_string())
            .send()
            .await?;
        let body: ScoreResponse = check_status(address, response)?.json().await?;
        Ok(body.scores)
    }

    async fn index_size(&self, address: &str) -> Result<u64> {
        let response = self
            .client
            .get(Self::url(address, ENDPOINT_INDEX_SIZE))
            .send()
            .await?;
        let text = check_status(address, response)?.text().await?;
        text.trim().parse().map_err(|_| Error::Worker {
            address: address.to_string(),
            message: format!("invalid index size '{}'", text.trim()),
        })
    }

    async fn upload(&self, address: &str, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part(UPLOAD_FIELD, part);

        let response = self
            .client
            .post(Self::url(address, ENDPOINT_UPLOAD))
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .await?;
        let body: UploadResponse = check_status(address, response)?.json().await?;
        Ok(body.document)
    }

    async fn download(&self, address: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .get(Self::url(address, ENDPOINT_DOWNLOAD))
            .query(&[("path", path)])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = check_status(address, response)?.bytes().await?;
        Ok(Some(bytes.to_vec()))
    }
}
