// GitHub REST client — authenticated GETs with quota tracking.
//
// Every response's `x-ratelimit-*` headers are remembered so the scanner can
// pull its local budget down to what GitHub says is actually left. Status
// handling (retry once on 5xx, 429/403 to RateLimitExceeded) lives in
// crate::http and is shared with the Claude client.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::traits::{Quota, RepoSource};
use super::types::{CommitActivityWeek, GhIssue, GhPullRequest, GhRelease, GhRepository, SearchPage};
use crate::error::ScanError;
use crate::http::{build_client, header_u64, send_with_retry};
use crate::rate_limit::ApiName;

/// Default GitHub API endpoint. Override with GITHUB_API_URL for GHES or tests.
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

const SERVICE: &str = "github";
const JSON_ACCEPT: &str = "application/vnd.github+json";
const RAW_ACCEPT: &str = "application/vnd.github.raw+json";
const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: u32 = 100;

pub struct GitHubClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    last_quota: Mutex<Option<Quota>>,
}

impl GitHubClient {
    /// Create a client. An empty token sends unauthenticated requests, which
    /// GitHub limits to 60/hour.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: (!token.is_empty()).then(|| token.to_string()),
            last_quota: Mutex::new(None),
        })
    }

    fn request(&self, url: &str, query: &[(&str, String)], accept: &str) -> RequestBuilder {
        let request = self
            .client
            .get(url)
            .query(query)
            .header(ACCEPT, accept)
            .header("X-GitHub-Api-Version", API_VERSION);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get(
        &self,
        api: ApiName,
        path: &str,
        query: &[(&str, String)],
        accept: &str,
    ) -> Result<Response, ScanError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(path = path, "GitHub GET");

        let response = send_with_retry(SERVICE, api, || self.request(&url, query, accept)).await?;
        self.record_quota(api, response.headers());
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        api: ApiName,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ScanError> {
        let response = self.get(api, path, query, JSON_ACCEPT).await?;
        decode(response).await
    }

    fn record_quota(&self, requested: ApiName, headers: &HeaderMap) {
        if let Some(quota) = parse_quota(requested, headers) {
            let mut last = self.last_quota.lock().unwrap_or_else(|e| e.into_inner());
            *last = Some(quota);
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ScanError> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ScanError::Upstream {
        service: SERVICE.to_string(),
        status,
        body: format!("unexpected response body: {e}"),
    })
}

/// Read GitHub's quota headers. `x-ratelimit-resource` says which pool was
/// charged; when it's missing we assume the pool we asked for.
pub fn parse_quota(requested: ApiName, headers: &HeaderMap) -> Option<Quota> {
    let remaining = header_u64(headers, "x-ratelimit-remaining")?;
    let reset = header_u64(headers, "x-ratelimit-reset")?;
    let reset_at = Utc.timestamp_opt(reset as i64, 0).single()?;

    let api = match headers
        .get("x-ratelimit-resource")
        .and_then(|v| v.to_str().ok())
    {
        Some("search") => ApiName::GitHubSearch,
        Some(_) => ApiName::GitHubRest,
        None => requested,
    };

    Some(Quota {
        api,
        remaining: remaining.min(u32::MAX as u64) as u32,
        reset_at,
    })
}

#[async_trait]
impl RepoSource for GitHubClient {
    async fn search_repositories(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, ScanError> {
        let params = [
            ("q", query.to_string()),
            ("sort", "stars".to_string()),
            ("order", "desc".to_string()),
            ("per_page", per_page.min(PAGE_SIZE).to_string()),
            ("page", page.max(1).to_string()),
        ];
        self.get_json(ApiName::GitHubSearch, "/search/repositories", &params)
            .await
    }

    async fn get_repository(&self, id: i64) -> Result<GhRepository, ScanError> {
        self.get_json(ApiName::GitHubRest, &format!("/repositories/{id}"), &[])
            .await
    }

    async fn get_commit_activity(
        &self,
        full_name: &str,
    ) -> Result<Option<Vec<CommitActivityWeek>>, ScanError> {
        let path = format!("/repos/{full_name}/stats/commit_activity");
        let response = self.get(ApiName::GitHubRest, &path, &[], JSON_ACCEPT).await?;

        match response.status() {
            // Statistics are computed lazily; GitHub answers 202 until ready.
            StatusCode::ACCEPTED => Ok(None),
            StatusCode::NO_CONTENT => Ok(Some(Vec::new())),
            _ => decode(response).await.map(Some),
        }
    }

    async fn get_releases(&self, full_name: &str) -> Result<Vec<GhRelease>, ScanError> {
        let params = [("per_page", PAGE_SIZE.to_string())];
        self.get_json(ApiName::GitHubRest, &format!("/repos/{full_name}/releases"), &params)
            .await
    }

    async fn get_pull_requests(&self, full_name: &str) -> Result<Vec<GhPullRequest>, ScanError> {
        let params = [
            ("state", "all".to_string()),
            ("sort", "updated".to_string()),
            ("direction", "desc".to_string()),
            ("per_page", PAGE_SIZE.to_string()),
        ];
        self.get_json(ApiName::GitHubRest, &format!("/repos/{full_name}/pulls"), &params)
            .await
    }

    async fn get_closed_issues(&self, full_name: &str) -> Result<Vec<GhIssue>, ScanError> {
        let params = [
            ("state", "closed".to_string()),
            ("sort", "updated".to_string()),
            ("per_page", PAGE_SIZE.to_string()),
        ];
        self.get_json(ApiName::GitHubRest, &format!("/repos/{full_name}/issues"), &params)
            .await
    }

    async fn get_readme(&self, full_name: &str) -> Result<Option<String>, ScanError> {
        let path = format!("/repos/{full_name}/readme");
        match self.get(ApiName::GitHubRest, &path, &[], RAW_ACCEPT).await {
            Ok(response) => Ok(Some(response.text().await?)),
            Err(ScanError::Upstream { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn quota(&self) -> Option<Quota> {
        *self.last_quota.lock().unwrap_or_else(|e| e.into_inner())
    }
}
