// Fixed-window call budgets for the external APIs.
//
// Each named API gets a token count that resets to its configured maximum at
// the start of every window. Unlike a blocking limiter, nothing here sleeps:
// `try_acquire` answers immediately and callers decide whether to skip or
// wait. The orchestrator always skips, since sleeping would eat into the
// invocation's wall-clock budget.
//
// Shared across callers via Arc<RateLimiter>. All bucket state sits behind a
// single mutex, so a check-and-decrement can never double-spend.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// The external APIs with separately-metered budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiName {
    GitHubRest,
    GitHubSearch,
    Claude,
}

impl ApiName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiName::GitHubRest => "github_rest",
            ApiName::GitHubSearch => "github_search",
            ApiName::Claude => "claude",
        }
    }
}

impl fmt::Display for ApiName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a `try_acquire` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Milliseconds until the window resets. Only set when denied.
    pub retry_after_ms: Option<u64>,
}

impl Decision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_ms: None,
        }
    }

    fn deny(retry_after: Duration) -> Self {
        // Round up so a denial never reports 0ms.
        let ms = retry_after.as_millis().max(1) as u64;
        Self {
            allowed: false,
            retry_after_ms: Some(ms),
        }
    }
}

/// Capacity and window length for one API.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    pub capacity: u32,
    pub window: Duration,
}

impl BucketConfig {
    pub fn per_minute(capacity: u32) -> Self {
        Self {
            capacity,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    config: BucketConfig,
    tokens: u32,
    window_started: Instant,
}

impl Bucket {
    fn new(config: BucketConfig, now: Instant) -> Self {
        Self {
            config,
            tokens: config.capacity,
            window_started: now,
        }
    }

    /// Start a fresh window if the current one has elapsed.
    ///
    /// Windows stay aligned to the first one, so a long idle period doesn't
    /// shift the reset boundary.
    fn roll(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_started);
        if elapsed >= self.config.window && !self.config.window.is_zero() {
            let windows = elapsed.as_nanos() / self.config.window.as_nanos();
            let advance = self.config.window.as_nanos() * windows;
            self.window_started += Duration::from_nanos(advance as u64);
            self.tokens = self.config.capacity;
        }
    }

    fn until_reset(&self, now: Instant) -> Duration {
        (self.window_started + self.config.window).saturating_duration_since(now)
    }
}

/// Per-API fixed-window rate limiter.
pub struct RateLimiter {
    buckets: Mutex<HashMap<ApiName, Bucket>>,
}

impl RateLimiter {
    /// Build a limiter from per-API bucket settings. APIs without a bucket are
    /// never limited.
    pub fn new(configs: impl IntoIterator<Item = (ApiName, BucketConfig)>) -> Self {
        let now = Instant::now();
        let buckets = configs
            .into_iter()
            .map(|(api, config)| (api, Bucket::new(config, now)))
            .collect();
        Self {
            buckets: Mutex::new(buckets),
        }
    }

    /// Take one token for `api`.
    pub fn try_acquire(&self, api: ApiName) -> Decision {
        self.try_acquire_n_at(api, 1, Instant::now())
    }

    /// Take `n` tokens for `api` at once, or none of them.
    pub fn try_acquire_n(&self, api: ApiName, n: u32) -> Decision {
        self.try_acquire_n_at(api, n, Instant::now())
    }

    /// Clock-injected form of `try_acquire_n`.
    pub fn try_acquire_n_at(&self, api: ApiName, n: u32, now: Instant) -> Decision {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let Some(bucket) = buckets.get_mut(&api) else {
            return Decision::allow();
        };

        bucket.roll(now);

        if bucket.tokens >= n {
            bucket.tokens -= n;
            Decision::allow()
        } else {
            let wait = bucket.until_reset(now);
            debug!(
                api = %api,
                requested = n,
                remaining = bucket.tokens,
                retry_after_ms = wait.as_millis() as u64,
                "Rate limit budget exhausted"
            );
            Decision::deny(wait)
        }
    }

    /// Take tokens from several buckets at once. Either every request is
    /// granted or nothing is taken; a denial reports the longest wait among
    /// the buckets that came up short.
    pub fn try_acquire_all(&self, requests: &[(ApiName, u32)]) -> Decision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());

        let mut wait: Option<Duration> = None;
        for (api, n) in requests {
            if let Some(bucket) = buckets.get_mut(api) {
                bucket.roll(now);
                if bucket.tokens < *n {
                    let until = bucket.until_reset(now);
                    wait = Some(wait.map_or(until, |w| w.max(until)));
                }
            }
        }
        if let Some(wait) = wait {
            debug!(retry_after_ms = wait.as_millis() as u64, "Combined budget exhausted");
            return Decision::deny(wait);
        }

        for (api, n) in requests {
            if let Some(bucket) = buckets.get_mut(api) {
                bucket.tokens -= n;
            }
        }
        Decision::allow()
    }

    /// Tokens left in the current window (after rolling it forward).
    pub fn remaining(&self, api: ApiName) -> Option<u32> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets.get_mut(&api).map(|bucket| {
            bucket.roll(Instant::now());
            bucket.tokens
        })
    }

    /// Clamp the local budget to what the upstream reports as remaining.
    ///
    /// Only ever lowers the token count: the local window is the tighter
    /// constraint whenever the upstream still has headroom. `reset_in` is how
    /// long until the upstream quota resets; when it outlasts the local window
    /// the bucket stays drained until then.
    pub fn reconcile(&self, api: ApiName, upstream_remaining: u32, reset_in: Duration) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let Some(bucket) = buckets.get_mut(&api) else {
            return;
        };
        bucket.roll(now);

        if upstream_remaining < bucket.tokens {
            debug!(
                api = %api,
                local = bucket.tokens,
                upstream = upstream_remaining,
                "Lowering local budget to upstream quota"
            );
            bucket.tokens = upstream_remaining;
            if upstream_remaining == 0 && reset_in > bucket.until_reset(now) {
                // Push the window start forward so the next reset lines up
                // with the upstream reset.
                bucket.window_started = now + reset_in - bucket.config.window.min(reset_in);
            }
        }
    }
}
