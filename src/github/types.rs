// Serde types for the GitHub REST API responses we consume.
//
// Only the fields we actually read are declared; serde ignores the rest.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::db::models::Repository;

#[derive(Debug, Clone, Deserialize)]
pub struct GhOwner {
    pub login: String,
}

/// A repository as returned by `/repositories/{id}` and the search API.
#[derive(Debug, Clone, Deserialize)]
pub struct GhRepository {
    pub id: i64,
    pub full_name: String,
    pub name: String,
    pub owner: GhOwner,
    pub description: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub html_url: String,
    #[serde(default)]
    pub stargazers_count: i64,
    #[serde(default)]
    pub forks_count: i64,
    #[serde(default)]
    pub open_issues_count: i64,
    /// The real watcher count. Only present on single-repository responses;
    /// `watchers_count` is an alias for stars.
    pub subscribers_count: Option<i64>,
    #[serde(default)]
    pub watchers_count: i64,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub fork: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub pushed_at: Option<DateTime<Utc>>,
}

impl GhRepository {
    /// Convert into our row type. `discovered_at` is only used if the row is
    /// new; upserts never overwrite it.
    pub fn into_repository(self, discovered_at: DateTime<Utc>) -> Repository {
        Repository {
            id: self.id,
            full_name: self.full_name,
            owner: self.owner.login,
            name: self.name,
            description: self.description,
            language: self.language,
            topics: self.topics,
            html_url: self.html_url,
            stars: self.stargazers_count,
            forks: self.forks_count,
            open_issues: self.open_issues_count,
            watchers: self.subscribers_count.unwrap_or(self.watchers_count),
            archived: self.archived,
            fork: self.fork,
            created_at: self.created_at,
            updated_at: self.updated_at,
            pushed_at: self.pushed_at,
            discovered_at,
        }
    }
}

/// One page of `/search/repositories`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage {
    pub total_count: i64,
    #[serde(default)]
    pub incomplete_results: bool,
    pub items: Vec<GhRepository>,
}

/// One week from `/stats/commit_activity`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitActivityWeek {
    pub total: i64,
    /// Unix timestamp of the start of the week.
    pub week: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhRelease {
    pub tag_name: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhPullRequest {
    pub number: i64,
    pub state: String,
    pub merged_at: Option<DateTime<Utc>>,
}

/// An issue from `/issues`. Pull requests show up here too, marked by the
/// `pull_request` key.
#[derive(Debug, Clone, Deserialize)]
pub struct GhIssue {
    pub number: i64,
    pub state: String,
    pub pull_request: Option<serde_json::Value>,
}

impl GhIssue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_from_search_item_uses_stars_for_watchers() {
        let json = r#"{
            "id": 42,
            "full_name": "acme/agent",
            "name": "agent",
            "owner": { "login": "acme" },
            "description": null,
            "language": "Python",
            "topics": ["llm", "agents"],
            "html_url": "https://github.com/acme/agent",
            "stargazers_count": 1200,
            "forks_count": 80,
            "open_issues_count": 14,
            "watchers_count": 1200,
            "archived": false,
            "fork": false,
            "created_at": "2024-01-02T03:04:05Z",
            "updated_at": "2024-06-01T00:00:00Z",
            "pushed_at": "2024-06-01T00:00:00Z"
        }"#;
        let gh: GhRepository = serde_json::from_str(json).unwrap();
        let repo = gh.into_repository(Utc::now());
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.stars, 1200);
        assert_eq!(repo.watchers, 1200);
        assert_eq!(repo.topics.len(), 2);
        assert!(repo.created_at.is_some());
    }

    #[test]
    fn test_subscribers_count_wins_when_present() {
        let json = r#"{
            "id": 1, "full_name": "a/b", "name": "b", "owner": {"login": "a"},
            "html_url": "https://github.com/a/b",
            "stargazers_count": 500, "watchers_count": 500, "subscribers_count": 31
        }"#;
        let gh: GhRepository = serde_json::from_str(json).unwrap();
        assert_eq!(gh.into_repository(Utc::now()).watchers, 31);
    }

    #[test]
    fn test_issue_marks_pull_requests() {
        let issue: GhIssue =
            serde_json::from_str(r#"{"number": 3, "state": "closed", "pull_request": {}}"#).unwrap();
        assert!(issue.is_pull_request());
        let issue: GhIssue = serde_json::from_str(r#"{"number": 4, "state": "closed"}"#).unwrap();
        assert!(!issue.is_pull_request());
    }
}
