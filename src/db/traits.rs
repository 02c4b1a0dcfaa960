// Database trait — async interface over all storage operations.
//
// Implementors: SqliteDatabase (wraps rusqlite). Methods are async so the
// scan pipeline can hold an `Arc<dyn Database>` across awaits without caring
// that the backing connection is synchronous.
//
// The trait mirrors the free functions in queries.rs one-to-one; callers that
// already hold a Connection (tests, migrations) can keep using those directly.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{
    Alert, Analysis, MetricsSnapshot, NewAlert, RankedRepository, RepoMetrics, Repository, Tier,
    TierAssignment, TierCounts,
};

#[async_trait]
pub trait Database: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    // --- Scan state ---

    /// Get a scan state value by key (e.g., "last_run_at").
    async fn get_scan_state(&self, key: &str) -> Result<Option<String>>;

    /// Set a scan state value (upsert).
    async fn set_scan_state(&self, key: &str, value: &str) -> Result<()>;

    // --- Repositories ---

    /// Insert or refresh a repository. Returns true if it was new.
    async fn upsert_repository(&self, repo: &Repository) -> Result<bool>;

    async fn get_repository(&self, id: i64) -> Result<Option<Repository>>;

    /// Case-insensitive lookup by owner/name.
    async fn get_repository_by_name(&self, full_name: &str) -> Result<Option<Repository>>;

    async fn repository_count(&self) -> Result<i64>;

    /// Discovered but never-scanned repositories, most-starred first.
    async fn unscanned_repositories(&self, limit: u32) -> Result<Vec<Repository>>;

    /// Repositories in `tier` last scanned before `cutoff`, by scan priority.
    async fn due_for_scan(
        &self,
        tier: Tier,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RankedRepository>>;

    // --- Snapshots and tiers ---

    /// The most recent `limit` snapshots, newest first.
    async fn latest_snapshots(&self, repo_id: i64, limit: u32) -> Result<Vec<MetricsSnapshot>>;

    async fn get_tier_assignment(&self, repo_id: i64) -> Result<Option<TierAssignment>>;

    async fn upsert_tier_assignment(&self, assignment: &TierAssignment) -> Result<()>;

    /// Persist repository counters, a snapshot, and the tier row in one
    /// transaction. Returns the snapshot id.
    async fn record_scan(&self, metrics: &RepoMetrics, assignment: &TierAssignment) -> Result<i64>;

    async fn list_by_tier(&self, tier: Tier, limit: u32) -> Result<Vec<RankedRepository>>;

    /// Fastest-growing repositories across all tiers.
    async fn get_trending(&self, limit: u32) -> Result<Vec<RankedRepository>>;

    async fn tier_counts(&self) -> Result<TierCounts>;

    /// Remove tier rows whose repository is gone. Returns rows removed.
    async fn delete_orphaned_tier_assignments(&self) -> Result<u32>;

    /// Scanned repositories that have no tier row.
    async fn repositories_missing_tier(&self) -> Result<Vec<Repository>>;

    // --- Analyses ---

    /// Repositories eligible for analysis, in processing order.
    async fn analysis_candidates(
        &self,
        fresh_after: DateTime<Utc>,
        max_tier: Tier,
        limit: u32,
    ) -> Result<Vec<RankedRepository>>;

    /// Record an analysis. With `fresh_after`, skips (returns None) when a
    /// newer analysis already exists.
    async fn insert_analysis(
        &self,
        analysis: &Analysis,
        fresh_after: Option<DateTime<Utc>>,
    ) -> Result<Option<i64>>;

    async fn get_latest_analysis(&self, repo_id: i64) -> Result<Option<Analysis>>;

    async fn list_analyses(&self, repo_id: i64, limit: u32) -> Result<Vec<Analysis>>;

    async fn analysis_count(&self) -> Result<i64>;

    async fn total_analysis_cost(&self) -> Result<f64>;

    // --- Alerts ---

    async fn insert_alert(&self, alert: &NewAlert, created_at: DateTime<Utc>) -> Result<i64>;

    async fn list_alerts(&self, unacknowledged_only: bool, limit: u32) -> Result<Vec<Alert>>;

    /// Returns false if the alert is missing or already acknowledged.
    async fn acknowledge_alert(&self, id: i64, at: DateTime<Utc>) -> Result<bool>;
}
