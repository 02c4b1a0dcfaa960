// RepoSource trait — the GitHub operations the scanner depends on.
//
// GitHubClient implements this over reqwest. Tests swap in an in-memory fake
// so the orchestrator can be exercised without a network.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::{CommitActivityWeek, GhIssue, GhPullRequest, GhRelease, GhRepository, SearchPage};
use crate::error::ScanError;
use crate::rate_limit::ApiName;

/// Upstream quota as last reported by GitHub's `x-ratelimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Which local bucket this quota corresponds to.
    pub api: ApiName,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

#[async_trait]
pub trait RepoSource: Send + Sync {
    /// One page (1-based) of `/search/repositories`, sorted by stars.
    async fn search_repositories(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, ScanError>;

    /// Fetch a repository by its numeric id, which survives renames.
    async fn get_repository(&self, id: i64) -> Result<GhRepository, ScanError>;

    /// Weekly commit totals for the past year. None while GitHub is still
    /// computing the statistics (HTTP 202).
    async fn get_commit_activity(
        &self,
        full_name: &str,
    ) -> Result<Option<Vec<CommitActivityWeek>>, ScanError>;

    /// Up to 100 most recent releases.
    async fn get_releases(&self, full_name: &str) -> Result<Vec<GhRelease>, ScanError>;

    /// Up to 100 most recently updated pull requests in any state.
    async fn get_pull_requests(&self, full_name: &str) -> Result<Vec<GhPullRequest>, ScanError>;

    /// Up to 100 most recently updated closed issues (pull requests included;
    /// filter with `GhIssue::is_pull_request`).
    async fn get_closed_issues(&self, full_name: &str) -> Result<Vec<GhIssue>, ScanError>;

    /// Raw README text. None when the repository has no README.
    async fn get_readme(&self, full_name: &str) -> Result<Option<String>, ScanError>;

    /// The most recent upstream quota observed, if any.
    fn quota(&self) -> Option<Quota>;
}
