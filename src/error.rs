use std::time::Duration;

use thiserror::Error;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, AppError>;

/// Classified outcome of an upstream fetch. `Clone` so it can travel through
/// shared (coalesced) futures to every waiting caller.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("all upstream requests blocked by rate limit, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected upstream payload: {0}")]
    Malformed(String),
    #[error("no data available for {0}")]
    NotFound(String),
    #[error("upstream unavailable: {0}")]
    Upstream(String),
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }

    /// Retry hint for callers that surface the error to users.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Stable machine-readable tag used in structured error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::Timeout(_) => "timeout",
            FetchError::Malformed(_) => "malformed",
            FetchError::NotFound(_) => "not_found",
            FetchError::Upstream(_) => "service_unavailable",
        }
    }
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        AppError::Message(msg.into())
    }
}
