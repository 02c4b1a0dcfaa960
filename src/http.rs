// Shared HTTP plumbing for the GitHub and Claude clients.
//
// Both clients send through `send_with_retry`, which owns the status-code
// policy: server errors get exactly one retry, rate-limit responses become
// `ScanError::RateLimitExceeded`, and any other non-2xx becomes
// `ScanError::Upstream`. Transport errors are never retried.

use std::time::Duration;

use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::warn;

use crate::error::ScanError;
use crate::output::truncate_chars;
use crate::rate_limit::ApiName;

/// Retries allowed for a 5xx response.
const SERVER_ERROR_RETRIES: u32 = 1;

/// Pause before retrying a 5xx.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Used when a rate-limit response carries no usable reset hint.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Upstream error bodies are kept for logs, but not in full.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Build an HTTP client with the given request timeout.
pub fn build_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    use anyhow::Context;

    reqwest::Client::builder()
        .user_agent(concat!("repo-scout/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Send a request, retrying once on a 5xx.
///
/// `build` is called once per attempt because a `RequestBuilder` is consumed
/// by `send`. Successful responses (any 2xx, including 202) are returned
/// as-is; callers decide what an empty 202 means.
pub async fn send_with_retry<F>(service: &str, api: ApiName, build: F) -> Result<Response, ScanError>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0u32;

    loop {
        let response = build().send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        if status.is_server_error() && attempt < SERVER_ERROR_RETRIES {
            attempt += 1;
            warn!(
                service = service,
                status = status.as_u16(),
                attempt = attempt,
                "Server error, retrying once"
            );
            tokio::time::sleep(RETRY_DELAY).await;
            continue;
        }

        return Err(error_for_response(service, api, response).await);
    }
}

/// Turn a non-2xx response into the matching `ScanError`.
pub async fn error_for_response(service: &str, api: ApiName, response: Response) -> ScanError {
    let status = response.status();
    let headers = response.headers().clone();

    if is_rate_limited(status, &headers) {
        return ScanError::RateLimitExceeded {
            api,
            retry_after_ms: retry_after(&headers).as_millis() as u64,
        };
    }

    let body = response.text().await.unwrap_or_default();
    ScanError::Upstream {
        service: service.to_string(),
        status: status.as_u16(),
        body: truncate_chars(&body, MAX_ERROR_BODY_CHARS),
    }
}

/// 429 always counts. GitHub also answers 403 once the quota is spent, which
/// is only distinguishable from a permissions error by the remaining header.
fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    status == StatusCode::FORBIDDEN && header_u64(headers, "x-ratelimit-remaining") == Some(0)
}

/// How long to back off: `retry-after` seconds if present, else time until
/// `x-ratelimit-reset` (epoch seconds), else a minute.
fn retry_after(headers: &HeaderMap) -> Duration {
    if let Some(secs) = header_u64(headers, "retry-after") {
        return Duration::from_secs(secs.max(1));
    }
    if let Some(reset) = header_u64(headers, "x-ratelimit-reset") {
        let now = Utc::now().timestamp().max(0) as u64;
        return Duration::from_secs(reset.saturating_sub(now).max(1));
    }
    DEFAULT_RETRY_AFTER
}

/// Parse a numeric header, ignoring anything malformed.
pub fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn test_403_only_rate_limited_when_quota_spent() {
        let spent = headers(&[("x-ratelimit-remaining", "0")]);
        let left = headers(&[("x-ratelimit-remaining", "12")]);
        assert!(is_rate_limited(StatusCode::FORBIDDEN, &spent));
        assert!(!is_rate_limited(StatusCode::FORBIDDEN, &left));
        assert!(!is_rate_limited(StatusCode::FORBIDDEN, &HeaderMap::new()));
        assert!(is_rate_limited(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new()));
    }

    #[test]
    fn test_retry_after_prefers_explicit_header() {
        let h = headers(&[("retry-after", "7"), ("x-ratelimit-reset", "1")]);
        assert_eq!(retry_after(&h), Duration::from_secs(7));
    }

    #[test]
    fn test_retry_after_from_reset_epoch() {
        let reset = (Utc::now().timestamp() + 30).to_string();
        let h = headers(&[("x-ratelimit-reset", reset.as_str())]);
        let wait = retry_after(&h);
        assert!(wait >= Duration::from_secs(28) && wait <= Duration::from_secs(30));
    }

    #[test]
    fn test_retry_after_default_and_past_reset() {
        assert_eq!(retry_after(&HeaderMap::new()), DEFAULT_RETRY_AFTER);
        let h = headers(&[("x-ratelimit-reset", "1000")]);
        assert_eq!(retry_after(&h), Duration::from_secs(1));
    }
}
