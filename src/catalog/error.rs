use std::time::Duration;

use thiserror::Error;

use crate::limiter::RateLimitError;

/// Errors returned by a remote catalog call.
///
/// The classification methods drive both the rate limiter (which only
/// reacts to [`CatalogError::Throttled`]) and the worker pool (which
/// requeues transient failures and gives up on permanent ones).
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Network error during {context}: {source}")]
    Network {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{context} throttled by the server")]
    Throttled {
        context: String,
        retry_after: Option<Duration>,
    },

    #[error("Server error {status} during {context}")]
    Server { context: String, status: u16 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("API error {code} during {context}: {message}")]
    Api {
        context: String,
        code: i64,
        message: String,
    },

    #[error("Malformed response during {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{context}: {source}")]
    RateLimited {
        context: String,
        #[source]
        source: RateLimitError,
    },
}

impl CatalogError {
    pub fn network(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Network {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Raw throttling signal from the server (HTTP 429/503 or equivalent).
    pub fn is_throttle(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether a later attempt of the same call may succeed.
    ///
    /// Throttling that escalated past the limiter's cap is still transient
    /// from the caller's point of view: the task goes back on the queue.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Throttled { .. }
            | Self::Server { .. }
            | Self::RateLimited { .. } => true,
            Self::NotFound(_) | Self::Forbidden(_) | Self::Api { .. } | Self::Decode { .. } => {
                false
            }
        }
    }
}
