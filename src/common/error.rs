//! Error types for clusterize

use thiserror::Error;

use crate::coordinator::assembly::AssemblyStep;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Join State Errors ===
    #[error("Join state not found for cluster {0}")]
    StateNotFound(String),

    #[error("State store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Conditional append gave up after {attempts} conflicting attempts")]
    ConflictRetriesExhausted { attempts: u32 },

    #[error("Cluster {cluster} expects {existing} nodes, refusing to re-initialize with {requested}")]
    ExpectedSizeMismatch {
        cluster: String,
        existing: usize,
        requested: usize,
    },

    #[error("Invalid registration: {0}")]
    InvalidRequest(String),

    // === Assembly Errors ===
    #[error("Cluster assembly failed at {step}: {message}")]
    Assembly { step: AssemblyStep, message: String },

    // === Collaborator Errors ===
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Secret {name} unavailable: {reason}")]
    Secret { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a transient error the node should retry by re-registering?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_)
                | Error::ConflictRetriesExhausted { .. }
                | Error::Provider(_)
                | Error::Secret { .. }
                | Error::Http(_)
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::StateNotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidRequest(_) | Error::InvalidConfig(_) | Error::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::ExpectedSizeMismatch { .. } => StatusCode::CONFLICT,
            Error::StoreUnavailable(_) | Error::ConflictRetriesExhausted { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::StoreUnavailable("down".into()).is_retryable());
        assert!(Error::ConflictRetriesExhausted { attempts: 8 }.is_retryable());
        assert!(!Error::InvalidRequest("empty".into()).is_retryable());
        assert!(!Error::StateNotFound("c".into()).is_retryable());
    }

    #[test]
    fn test_http_status() {
        assert_eq!(
            Error::InvalidRequest("x".into()).to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::StateNotFound("x".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::StoreUnavailable("x".into()).to_http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
