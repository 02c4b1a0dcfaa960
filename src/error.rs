// Error taxonomy for a single unit of work (one repository's metrics fetch,
// one analysis call).
//
// The orchestrator catches these at its per-item boundary and logs `kind()`
// alongside the repository id. Everything above that boundary uses anyhow.

use thiserror::Error;

use crate::rate_limit::ApiName;

#[derive(Error, Debug)]
pub enum ScanError {
    /// Local budget denied, or the upstream answered 429. Non-fatal: the item is skipped.
    #[error("rate limit exceeded for {api} (retry after {retry_after_ms}ms)")]
    RateLimitExceeded { api: ApiName, retry_after_ms: u64 },

    /// Non-2xx response from an external API.
    #[error("{service} returned HTTP {status}: {body}")]
    Upstream {
        service: String,
        status: u16,
        body: String,
    },

    /// The model answered, but not with the JSON we asked for.
    #[error("malformed model response: {reason}")]
    ModelResponse { reason: String, raw: String },

    #[error("persistence error: {0:#}")]
    Persistence(anyhow::Error),

    /// Transport failure or timeout before a status code was available.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ScanError {
    /// Stable short name used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            ScanError::Upstream { .. } => "upstream",
            ScanError::ModelResponse { .. } => "model_response",
            ScanError::Persistence(_) => "persistence",
            ScanError::Network(_) => "network",
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ScanError::RateLimitExceeded { .. })
    }

    pub fn model_response(reason: impl Into<String>, raw: &str) -> Self {
        ScanError::ModelResponse {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }
}

impl From<anyhow::Error> for ScanError {
    fn from(err: anyhow::Error) -> Self {
        ScanError::Persistence(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_stable() {
        let err = ScanError::Upstream {
            service: "github".to_string(),
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.kind(), "upstream");
        assert!(!err.is_rate_limited());

        let err = ScanError::RateLimitExceeded {
            api: ApiName::Claude,
            retry_after_ms: 1200,
        };
        assert_eq!(err.kind(), "rate_limit_exceeded");
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_persistence_display_includes_context_chain() {
        let inner = anyhow::anyhow!("disk full").context("Failed to insert snapshot");
        let err = ScanError::from(inner);
        let msg = err.to_string();
        assert!(msg.contains("Failed to insert snapshot"), "{msg}");
        assert!(msg.contains("disk full"), "{msg}");
    }
}
