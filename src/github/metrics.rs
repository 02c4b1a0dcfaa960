// Metrics collector — fetches a repository's facts at a given scan depth.
//
// Depth decides which endpoints are hit, and therefore how many GitHub calls
// a scan costs (`ScanDepth::github_calls`). The caller reserves that many
// tokens up front; the collector itself never touches the rate limiter.
//
//   minimal: /repositories/{id}
//   basic:   + commit activity, releases
//   deep:    + pull requests, closed issues

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::traits::RepoSource;
use super::types::{CommitActivityWeek, GhIssue, GhPullRequest, GhRelease};
use crate::db::models::{RepoMetrics, Repository, ScanDepth};
use crate::error::ScanError;

/// Weeks of commit activity summed into `commits_recent`.
const RECENT_COMMIT_WEEKS: usize = 4;

pub struct MetricsCollector {
    source: Arc<dyn RepoSource>,
}

impl MetricsCollector {
    pub fn new(source: Arc<dyn RepoSource>) -> Self {
        Self { source }
    }

    /// Collect fresh metrics for a known repository.
    ///
    /// The repository is re-fetched by id, so renames and transfers are
    /// picked up; `discovered_at` is carried over from `known`.
    pub async fn collect(
        &self,
        known: &Repository,
        depth: ScanDepth,
    ) -> Result<RepoMetrics, ScanError> {
        let observed_at = Utc::now();
        let fresh = self.source.get_repository(known.id).await?;
        let repository = fresh.into_repository(known.discovered_at);
        let full_name = repository.full_name.clone();

        let mut metrics = RepoMetrics::minimal(repository, observed_at);
        metrics.depth = depth;

        if matches!(depth, ScanDepth::Basic | ScanDepth::Deep) {
            let activity = self.source.get_commit_activity(&full_name).await?;
            metrics.commits_recent = activity.as_deref().map(recent_commits);

            let releases = self.source.get_releases(&full_name).await?;
            let (count, latest) = release_stats(&releases);
            metrics.releases_count = Some(count);
            metrics.latest_release_at = latest;
        }

        if depth == ScanDepth::Deep {
            let pulls = self.source.get_pull_requests(&full_name).await?;
            let (open, merged) = pull_request_stats(&pulls);
            metrics.open_prs = Some(open);
            metrics.merged_prs = Some(merged);

            let issues = self.source.get_closed_issues(&full_name).await?;
            metrics.closed_issues = Some(closed_issue_count(&issues));
        }

        debug!(
            repo_id = metrics.repository.id,
            depth = %depth,
            stars = metrics.repository.stars,
            "Collected metrics"
        );

        Ok(metrics)
    }
}

/// Commits over the trailing weeks. GitHub returns the past year oldest first.
pub fn recent_commits(weeks: &[CommitActivityWeek]) -> i64 {
    weeks
        .iter()
        .rev()
        .take(RECENT_COMMIT_WEEKS)
        .map(|w| w.total.max(0))
        .sum()
}

/// Published (non-draft) release count and the newest publish date.
pub fn release_stats(releases: &[GhRelease]) -> (i64, Option<DateTime<Utc>>) {
    let published: Vec<&GhRelease> = releases.iter().filter(|r| !r.draft).collect();
    let latest = published.iter().filter_map(|r| r.published_at).max();
    (published.len() as i64, latest)
}

/// (open, merged) pull request counts.
pub fn pull_request_stats(pulls: &[GhPullRequest]) -> (i64, i64) {
    let open = pulls.iter().filter(|p| p.state == "open").count() as i64;
    let merged = pulls.iter().filter(|p| p.merged_at.is_some()).count() as i64;
    (open, merged)
}

/// Closed issues, excluding pull requests.
pub fn closed_issue_count(issues: &[GhIssue]) -> i64 {
    issues
        .iter()
        .filter(|i| i.state == "closed" && !i.is_pull_request())
        .count() as i64
}
