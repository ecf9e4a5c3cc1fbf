//! Error taxonomy for the search core.
//!
//! Only `InvalidQuery`, `RetrievalUnavailable` and `NotFound` ever reach a
//! caller of the engine. Provider failures are absorbed by the component that
//! made the call and show up as a degraded response instead.

use std::time::Duration;
use tokio::time::Instant;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Error)]
pub enum SearchError {
    /// Malformed or contradictory explicit filters. Raised before any
    /// provider is contacted.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("{provider} timed out after {}ms", .after.as_millis())]
    ProviderTimeout {
        provider: &'static str,
        after: Duration,
    },

    #[error("{provider} failed: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// Every active retrieval strategy failed for this request.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("listing not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SearchError {
    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// True for per-call failures that callers should degrade around.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ProviderTimeout { .. } | Self::Provider { .. })
    }
}

/// The smaller of `cap` and the time remaining until `deadline`.
pub fn time_left(cap: Duration, deadline: Instant) -> Duration {
    cap.min(deadline.saturating_duration_since(Instant::now()))
}

/// Run `fut` with a timeout, mapping elapsed time to `ProviderTimeout`.
pub async fn with_timeout<T, F>(provider: &'static str, after: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(SearchError::ProviderTimeout { provider, after }),
    }
}
