// SqliteDatabase — rusqlite backend implementing the Database trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Sync.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is never held across .await points.
//
// Holding the lock for a whole call also makes multi-statement operations
// (record_scan, the conditional analysis insert) atomic with respect to other
// tasks sharing this handle.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{
    Alert, Analysis, MetricsSnapshot, NewAlert, RankedRepository, RepoMetrics, Repository, Tier,
    TierAssignment, TierCounts,
};
use super::queries;
use super::traits::Database;

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn get_scan_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        queries::get_scan_state(&conn, key)
    }

    async fn set_scan_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::set_scan_state(&conn, key, value)
    }

    async fn upsert_repository(&self, repo: &Repository) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::upsert_repository(&conn, repo)
    }

    async fn get_repository(&self, id: i64) -> Result<Option<Repository>> {
        let conn = self.conn.lock().await;
        queries::get_repository(&conn, id)
    }

    async fn get_repository_by_name(&self, full_name: &str) -> Result<Option<Repository>> {
        let conn = self.conn.lock().await;
        queries::get_repository_by_name(&conn, full_name)
    }

    async fn repository_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::repository_count(&conn)
    }

    async fn unscanned_repositories(&self, limit: u32) -> Result<Vec<Repository>> {
        let conn = self.conn.lock().await;
        queries::unscanned_repositories(&conn, limit)
    }

    async fn due_for_scan(
        &self,
        tier: Tier,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RankedRepository>> {
        let conn = self.conn.lock().await;
        queries::due_for_scan(&conn, tier, cutoff, limit)
    }

    async fn latest_snapshots(&self, repo_id: i64, limit: u32) -> Result<Vec<MetricsSnapshot>> {
        let conn = self.conn.lock().await;
        queries::latest_snapshots(&conn, repo_id, limit)
    }

    async fn get_tier_assignment(&self, repo_id: i64) -> Result<Option<TierAssignment>> {
        let conn = self.conn.lock().await;
        queries::get_tier_assignment(&conn, repo_id)
    }

    async fn upsert_tier_assignment(&self, assignment: &TierAssignment) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::upsert_tier_assignment(&conn, assignment)
    }

    async fn record_scan(&self, metrics: &RepoMetrics, assignment: &TierAssignment) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::record_scan(&conn, metrics, assignment)
    }

    async fn list_by_tier(&self, tier: Tier, limit: u32) -> Result<Vec<RankedRepository>> {
        let conn = self.conn.lock().await;
        queries::list_by_tier(&conn, tier, limit)
    }

    async fn get_trending(&self, limit: u32) -> Result<Vec<RankedRepository>> {
        let conn = self.conn.lock().await;
        queries::get_trending(&conn, limit)
    }

    async fn tier_counts(&self) -> Result<TierCounts> {
        let conn = self.conn.lock().await;
        queries::tier_counts(&conn)
    }

    async fn delete_orphaned_tier_assignments(&self) -> Result<u32> {
        let conn = self.conn.lock().await;
        queries::delete_orphaned_tier_assignments(&conn)
    }

    async fn repositories_missing_tier(&self) -> Result<Vec<Repository>> {
        let conn = self.conn.lock().await;
        queries::repositories_missing_tier(&conn)
    }

    async fn analysis_candidates(
        &self,
        fresh_after: DateTime<Utc>,
        max_tier: Tier,
        limit: u32,
    ) -> Result<Vec<RankedRepository>> {
        let conn = self.conn.lock().await;
        queries::analysis_candidates(&conn, fresh_after, max_tier, limit)
    }

    async fn insert_analysis(
        &self,
        analysis: &Analysis,
        fresh_after: Option<DateTime<Utc>>,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock().await;
        queries::insert_analysis(&conn, analysis, fresh_after)
    }

    async fn get_latest_analysis(&self, repo_id: i64) -> Result<Option<Analysis>> {
        let conn = self.conn.lock().await;
        queries::get_latest_analysis(&conn, repo_id)
    }

    async fn list_analyses(&self, repo_id: i64, limit: u32) -> Result<Vec<Analysis>> {
        let conn = self.conn.lock().await;
        queries::list_analyses(&conn, repo_id, limit)
    }

    async fn analysis_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::analysis_count(&conn)
    }

    async fn total_analysis_cost(&self) -> Result<f64> {
        let conn = self.conn.lock().await;
        queries::total_analysis_cost(&conn)
    }

    async fn insert_alert(&self, alert: &NewAlert, created_at: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::insert_alert(&conn, alert, created_at)
    }

    async fn list_alerts(&self, unacknowledged_only: bool, limit: u32) -> Result<Vec<Alert>> {
        let conn = self.conn.lock().await;
        queries::list_alerts(&conn, unacknowledged_only, limit)
    }

    async fn acknowledge_alert(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::acknowledge_alert(&conn, id, at)
    }
}
