// Database schema — table creation and versioning.
//
// A `schema_version` table records the schema generation so that later
// changes can be applied as numbered migrations on top of version 1.
//
// Tier assignments, snapshots, and analyses reference repositories with
// ON DELETE CASCADE, so a tier row can never outlive its repository once
// foreign keys are on. The reconciliation job covers rows written before
// that was enforced.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// Idempotent; runs on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "
        -- Tracks schema version for future migrations
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Repositories found via topic search. Never deleted.
        CREATE TABLE IF NOT EXISTS repositories (
            id INTEGER PRIMARY KEY,            -- GitHub numeric id
            full_name TEXT NOT NULL UNIQUE,    -- owner/name
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            language TEXT,
            topics TEXT NOT NULL DEFAULT '[]', -- JSON array
            html_url TEXT NOT NULL,
            stars INTEGER NOT NULL DEFAULT 0,
            forks INTEGER NOT NULL DEFAULT 0,
            open_issues INTEGER NOT NULL DEFAULT 0,
            watchers INTEGER NOT NULL DEFAULT 0,
            archived INTEGER NOT NULL DEFAULT 0,
            fork INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT,
            pushed_at TEXT,
            discovered_at TEXT NOT NULL
        );

        -- Append-only metrics history
        CREATE TABLE IF NOT EXISTS repo_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
            stars INTEGER NOT NULL,
            forks INTEGER NOT NULL,
            open_issues INTEGER NOT NULL,
            watchers INTEGER NOT NULL,
            commits_recent INTEGER,            -- last 4 weeks (basic+)
            releases_count INTEGER,            -- basic+
            latest_release_at TEXT,            -- basic+, shown by `show`
            open_prs INTEGER,                  -- deep only
            merged_prs INTEGER,                -- deep only
            closed_issues INTEGER,             -- deep only
            scan_depth TEXT NOT NULL,          -- minimal / basic / deep
            recorded_at TEXT NOT NULL
        );

        -- Exactly one live tier row per scanned repository
        CREATE TABLE IF NOT EXISTS tier_assignments (
            repo_id INTEGER PRIMARY KEY REFERENCES repositories(id) ON DELETE CASCADE,
            tier INTEGER NOT NULL CHECK (tier IN (1, 2, 3)),
            growth_velocity REAL NOT NULL DEFAULT 0,
            engagement_score REAL NOT NULL DEFAULT 0,
            scan_priority REAL NOT NULL DEFAULT 0,
            last_deep_scan_at TEXT,
            last_basic_scan_at TEXT,
            updated_at TEXT NOT NULL
        );

        -- AI analysis history; latest per repo wins
        CREATE TABLE IF NOT EXISTS analyses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
            model TEXT NOT NULL,
            scores TEXT NOT NULL,              -- JSON object of named 0-100 scores
            overall_score REAL NOT NULL,
            recommendation TEXT NOT NULL
                CHECK (recommendation IN ('strong-buy', 'buy', 'watch', 'pass')),
            summary TEXT NOT NULL,
            strengths TEXT NOT NULL,           -- JSON array
            risks TEXT NOT NULL,               -- JSON array
            questions TEXT NOT NULL,           -- JSON array
            growth_prediction TEXT,
            investment_thesis TEXT,
            competitive_analysis TEXT,
            input_tokens INTEGER NOT NULL,
            output_tokens INTEGER NOT NULL,
            cost_usd REAL NOT NULL,
            created_at TEXT NOT NULL
        );

        -- Threshold crossings; only acknowledgement is ever updated
        CREATE TABLE IF NOT EXISTS alerts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_id INTEGER REFERENCES repositories(id) ON DELETE SET NULL,
            alert_type TEXT NOT NULL,
            level TEXT NOT NULL CHECK (level IN ('info', 'warning', 'critical')),
            message TEXT NOT NULL,
            metadata TEXT,                     -- JSON object
            acknowledged INTEGER NOT NULL DEFAULT 0,
            acknowledged_at TEXT,
            created_at TEXT NOT NULL
        );

        -- Scan state: last run time and summary
        CREATE TABLE IF NOT EXISTS scan_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Growth velocity needs the latest snapshots per repo
        CREATE INDEX IF NOT EXISTS idx_metrics_repo_time
            ON repo_metrics(repo_id, recorded_at);

        -- Due-for-scan selection within a tier
        CREATE INDEX IF NOT EXISTS idx_tiers_due
            ON tier_assignments(tier, last_basic_scan_at);

        -- Latest analysis per repo
        CREATE INDEX IF NOT EXISTS idx_analyses_repo_time
            ON analyses(repo_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_alerts_unacked
            ON alerts(acknowledged, created_at);
        ",
    )
    .context("Failed to create database tables")?;

    // Record initial schema version if not already set
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    Ok(())
}

/// Count the number of tables in the database (useful for init confirmation).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
