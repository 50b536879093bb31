//! Error classification shared by every subsystem.
//!
//! Failures reach the immediate caller as one of these variants; HTTP
//! handlers turn them into status codes without leaking filesystem detail.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::coordination::types::CoordinationError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("no workers available")]
    NoWorkers,

    #[error("no healthy workers responded with index size")]
    NoHealthyWorkers,

    #[error("not found: {0}")]
    NotFound(String),

    /// This node is not the coordinator; carries the leader's address if known.
    #[error("not the leader (leader: {})", .0.as_deref().unwrap_or("unknown"))]
    NotLeader(Option<String>),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("worker {address} failed: {message}")]
    Worker { address: String, message: String },

    #[error("call to {0} timed out")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NoWorkers | Error::NoHealthyWorkers | Error::NotLeader(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Worker { .. } | Error::Timeout(_) | Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::Coordination(CoordinationError::SessionExpired)
            | Error::Coordination(CoordinationError::ConnectionLoss(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::Coordination(_) | Error::Io(_) | Error::Encoding(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            // Never echo paths or OS errors back to clients.
            Error::NotFound(_) => "Not found".to_string(),
            Error::Io(_) | Error::Encoding(_) => "Internal error".to_string(),
            other => other.to_string(),
        };
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self);
        }
        (status, body).into_response()
    }
}
