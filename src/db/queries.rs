// Database queries — CRUD operations for all tables.
//
// Every database interaction goes through this module. This keeps SQL
// contained in one place and gives the rest of the app clean Rust interfaces.
//
// Timestamps are bound from Rust (chrono) rather than datetime('now') so the
// same clock drives both writes and the due/freshness cut-offs.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use super::models::{
    Alert, AlertLevel, Analysis, MetricsSnapshot, NewAlert, RankedRepository, Recommendation,
    RepoMetrics, Repository, ScanDepth, Tier, TierAssignment, TierCounts,
};

const REPO_COLUMNS: &str = "r.id, r.full_name, r.owner, r.name, r.description, r.language, \
     r.topics, r.html_url, r.stars, r.forks, r.open_issues, r.watchers, r.archived, r.fork, \
     r.created_at, r.updated_at, r.pushed_at, r.discovered_at";
const REPO_COLUMN_COUNT: usize = 18;

const TIER_COLUMNS: &str = "t.repo_id, t.tier, t.growth_velocity, t.engagement_score, \
     t.scan_priority, t.last_deep_scan_at, t.last_basic_scan_at, t.updated_at";

const SNAPSHOT_COLUMNS: &str = "id, repo_id, stars, forks, open_issues, watchers, \
     commits_recent, releases_count, open_prs, merged_prs, closed_issues, scan_depth, \
     recorded_at, latest_release_at";

const ANALYSIS_COLUMNS: &str = "id, repo_id, model, scores, overall_score, recommendation, \
     summary, strengths, risks, questions, growth_prediction, investment_thesis, \
     competitive_analysis, input_tokens, output_tokens, cost_usd, created_at";

const ALERT_COLUMNS: &str = "id, repo_id, alert_type, level, message, metadata, acknowledged, \
     acknowledged_at, created_at";

// --- Row mapping helpers ---

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn optional_json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str(&s).map_err(|e| conversion_error(idx, e.to_string())))
        .transpose()
}

fn parsed_column<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_error(idx, format!("unexpected value {raw:?}")))
}

fn tier_column(row: &Row, idx: usize) -> rusqlite::Result<Tier> {
    let n: u8 = row.get(idx)?;
    Tier::from_number(n).ok_or_else(|| conversion_error(idx, format!("invalid tier {n}")))
}

fn repo_from_row(row: &Row, o: usize) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(o)?,
        full_name: row.get(o + 1)?,
        owner: row.get(o + 2)?,
        name: row.get(o + 3)?,
        description: row.get(o + 4)?,
        language: row.get(o + 5)?,
        topics: json_column(row, o + 6)?,
        html_url: row.get(o + 7)?,
        stars: row.get(o + 8)?,
        forks: row.get(o + 9)?,
        open_issues: row.get(o + 10)?,
        watchers: row.get(o + 11)?,
        archived: row.get(o + 12)?,
        fork: row.get(o + 13)?,
        created_at: row.get(o + 14)?,
        updated_at: row.get(o + 15)?,
        pushed_at: row.get(o + 16)?,
        discovered_at: row.get(o + 17)?,
    })
}

fn tier_from_row(row: &Row, o: usize) -> rusqlite::Result<TierAssignment> {
    Ok(TierAssignment {
        repo_id: row.get(o)?,
        tier: tier_column(row, o + 1)?,
        growth_velocity: row.get(o + 2)?,
        engagement_score: row.get(o + 3)?,
        scan_priority: row.get(o + 4)?,
        last_deep_scan_at: row.get(o + 5)?,
        last_basic_scan_at: row.get(o + 6)?,
        updated_at: row.get(o + 7)?,
    })
}

fn ranked_from_row(row: &Row) -> rusqlite::Result<RankedRepository> {
    Ok(RankedRepository {
        repository: repo_from_row(row, 0)?,
        assignment: tier_from_row(row, REPO_COLUMN_COUNT)?,
    })
}

fn snapshot_from_row(row: &Row) -> rusqlite::Result<MetricsSnapshot> {
    Ok(MetricsSnapshot {
        id: Some(row.get(0)?),
        repo_id: row.get(1)?,
        stars: row.get(2)?,
        forks: row.get(3)?,
        open_issues: row.get(4)?,
        watchers: row.get(5)?,
        commits_recent: row.get(6)?,
        releases_count: row.get(7)?,
        open_prs: row.get(8)?,
        merged_prs: row.get(9)?,
        closed_issues: row.get(10)?,
        scan_depth: parsed_column(row, 11, ScanDepth::parse)?,
        recorded_at: row.get(12)?,
        latest_release_at: row.get(13)?,
    })
}

fn analysis_from_row(row: &Row) -> rusqlite::Result<Analysis> {
    Ok(Analysis {
        id: Some(row.get(0)?),
        repo_id: row.get(1)?,
        model: row.get(2)?,
        scores: json_column(row, 3)?,
        overall_score: row.get(4)?,
        recommendation: parsed_column(row, 5, Recommendation::parse)?,
        summary: row.get(6)?,
        strengths: json_column(row, 7)?,
        risks: json_column(row, 8)?,
        questions: json_column(row, 9)?,
        growth_prediction: row.get(10)?,
        investment_thesis: row.get(11)?,
        competitive_analysis: row.get(12)?,
        input_tokens: row.get(13)?,
        output_tokens: row.get(14)?,
        cost_usd: row.get(15)?,
        created_at: row.get(16)?,
    })
}

fn alert_from_row(row: &Row) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        alert_type: row.get(2)?,
        level: parsed_column(row, 3, AlertLevel::parse)?,
        message: row.get(4)?,
        metadata: optional_json_column(row, 5)?,
        acknowledged: row.get(6)?,
        acknowledged_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

// --- Scan state ---

/// Get a scan state value by key (e.g., "last_run_at").
pub fn get_scan_state(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM scan_state WHERE key = ?1")?;
    let result = stmt.query_row(params![key], |row| row.get(0)).optional()?;
    Ok(result)
}

/// Set a scan state value (upsert).
pub fn set_scan_state(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO scan_state (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
        params![key, value],
    )?;
    Ok(())
}

// --- Repositories ---

/// Insert or refresh a repository. Returns true if it was new.
///
/// The id and discovered_at are never overwritten; everything else is.
pub fn upsert_repository(conn: &Connection, repo: &Repository) -> Result<bool> {
    let existed: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM repositories WHERE id = ?1",
        params![repo.id],
        |row| row.get(0),
    )?;

    let topics_json = serde_json::to_string(&repo.topics)?;
    conn.execute(
        "INSERT INTO repositories (id, full_name, owner, name, description, language, topics,
                                   html_url, stars, forks, open_issues, watchers, archived, fork,
                                   created_at, updated_at, pushed_at, discovered_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
         ON CONFLICT(id) DO UPDATE SET
            full_name = ?2,
            owner = ?3,
            name = ?4,
            description = ?5,
            language = ?6,
            topics = ?7,
            html_url = ?8,
            stars = ?9,
            forks = ?10,
            open_issues = ?11,
            watchers = ?12,
            archived = ?13,
            fork = ?14,
            created_at = ?15,
            updated_at = ?16,
            pushed_at = ?17",
        params![
            repo.id,
            repo.full_name,
            repo.owner,
            repo.name,
            repo.description,
            repo.language,
            topics_json,
            repo.html_url,
            repo.stars,
            repo.forks,
            repo.open_issues,
            repo.watchers,
            repo.archived,
            repo.fork,
            repo.created_at,
            repo.updated_at,
            repo.pushed_at,
            repo.discovered_at,
        ],
    )
    .with_context(|| format!("Failed to upsert repository {}", repo.full_name))?;

    Ok(!existed)
}

pub fn get_repository(conn: &Connection, id: i64) -> Result<Option<Repository>> {
    let sql = format!("SELECT {REPO_COLUMNS} FROM repositories r WHERE r.id = ?1");
    let result = conn
        .query_row(&sql, params![id], |row| repo_from_row(row, 0))
        .optional()?;
    Ok(result)
}

/// Look up a repository by owner/name, case-insensitively.
pub fn get_repository_by_name(conn: &Connection, full_name: &str) -> Result<Option<Repository>> {
    let sql = format!(
        "SELECT {REPO_COLUMNS} FROM repositories r WHERE LOWER(r.full_name) = LOWER(?1)"
    );
    let result = conn
        .query_row(&sql, params![full_name], |row| repo_from_row(row, 0))
        .optional()?;
    Ok(result)
}

pub fn repository_count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))?;
    Ok(count)
}

/// Discovered repositories that have never been scanned, most-starred first.
pub fn unscanned_repositories(conn: &Connection, limit: u32) -> Result<Vec<Repository>> {
    let sql = format!(
        "SELECT {REPO_COLUMNS}
         FROM repositories r
         LEFT JOIN tier_assignments t ON t.repo_id = r.id
         WHERE t.repo_id IS NULL AND r.archived = 0
         ORDER BY r.stars DESC, r.id
         LIMIT ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit], |row| repo_from_row(row, 0))?;
    collect_rows(rows)
}

/// Repositories in `tier` whose last scan is older than `cutoff`,
/// highest scan priority first.
pub fn due_for_scan(
    conn: &Connection,
    tier: Tier,
    cutoff: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<RankedRepository>> {
    let sql = format!(
        "SELECT {REPO_COLUMNS}, {TIER_COLUMNS}
         FROM tier_assignments t
         JOIN repositories r ON r.id = t.repo_id
         WHERE t.tier = ?1
           AND r.archived = 0
           AND (t.last_basic_scan_at IS NULL OR t.last_basic_scan_at < ?2)
         ORDER BY t.scan_priority DESC, r.id
         LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![tier.number(), cutoff, limit], ranked_from_row)?;
    collect_rows(rows)
}

// --- Metrics snapshots ---

pub fn insert_snapshot(conn: &Connection, snapshot: &MetricsSnapshot) -> Result<i64> {
    conn.execute(
        "INSERT INTO repo_metrics (repo_id, stars, forks, open_issues, watchers, commits_recent,
                                   releases_count, open_prs, merged_prs, closed_issues,
                                   scan_depth, recorded_at, latest_release_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            snapshot.repo_id,
            snapshot.stars,
            snapshot.forks,
            snapshot.open_issues,
            snapshot.watchers,
            snapshot.commits_recent,
            snapshot.releases_count,
            snapshot.open_prs,
            snapshot.merged_prs,
            snapshot.closed_issues,
            snapshot.scan_depth.as_str(),
            snapshot.recorded_at,
            snapshot.latest_release_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// The most recent `limit` snapshots for a repository, newest first.
pub fn latest_snapshots(conn: &Connection, repo_id: i64, limit: u32) -> Result<Vec<MetricsSnapshot>> {
    let sql = format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM repo_metrics
         WHERE repo_id = ?1
         ORDER BY recorded_at DESC, id DESC
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![repo_id, limit], snapshot_from_row)?;
    collect_rows(rows)
}

pub fn snapshot_count(conn: &Connection, repo_id: i64) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM repo_metrics WHERE repo_id = ?1",
        params![repo_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// --- Tier assignments ---

/// Save or replace a repository's live tier row.
pub fn upsert_tier_assignment(conn: &Connection, a: &TierAssignment) -> Result<()> {
    conn.execute(
        "INSERT INTO tier_assignments (repo_id, tier, growth_velocity, engagement_score,
                                       scan_priority, last_deep_scan_at, last_basic_scan_at,
                                       updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(repo_id) DO UPDATE SET
            tier = ?2,
            growth_velocity = ?3,
            engagement_score = ?4,
            scan_priority = ?5,
            last_deep_scan_at = ?6,
            last_basic_scan_at = ?7,
            updated_at = ?8",
        params![
            a.repo_id,
            a.tier.number(),
            a.growth_velocity,
            a.engagement_score,
            a.scan_priority,
            a.last_deep_scan_at,
            a.last_basic_scan_at,
            a.updated_at,
        ],
    )
    .with_context(|| format!("Failed to upsert tier assignment for repo {}", a.repo_id))?;
    Ok(())
}

pub fn get_tier_assignment(conn: &Connection, repo_id: i64) -> Result<Option<TierAssignment>> {
    let sql = format!("SELECT {TIER_COLUMNS} FROM tier_assignments t WHERE t.repo_id = ?1");
    let result = conn
        .query_row(&sql, params![repo_id], |row| tier_from_row(row, 0))
        .optional()?;
    Ok(result)
}

/// Persist one completed scan atomically: refreshed repository counters,
/// the new snapshot, and the tier assignment. Returns the snapshot id.
pub fn record_scan(
    conn: &Connection,
    metrics: &RepoMetrics,
    assignment: &TierAssignment,
) -> Result<i64> {
    let tx = conn.unchecked_transaction()?;
    upsert_repository(&tx, &metrics.repository)?;
    let snapshot_id = insert_snapshot(&tx, &metrics.snapshot())?;
    upsert_tier_assignment(&tx, assignment)?;
    tx.commit()
        .with_context(|| format!("Failed to commit scan of {}", metrics.repository.full_name))?;
    Ok(snapshot_id)
}

/// Repositories in one tier, highest scan priority first.
pub fn list_by_tier(conn: &Connection, tier: Tier, limit: u32) -> Result<Vec<RankedRepository>> {
    let sql = format!(
        "SELECT {REPO_COLUMNS}, {TIER_COLUMNS}
         FROM tier_assignments t
         JOIN repositories r ON r.id = t.repo_id
         WHERE t.tier = ?1
         ORDER BY t.scan_priority DESC, r.id
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![tier.number(), limit], ranked_from_row)?;
    collect_rows(rows)
}

/// Fastest-growing repositories across all tiers.
pub fn get_trending(conn: &Connection, limit: u32) -> Result<Vec<RankedRepository>> {
    let sql = format!(
        "SELECT {REPO_COLUMNS}, {TIER_COLUMNS}
         FROM tier_assignments t
         JOIN repositories r ON r.id = t.repo_id
         WHERE t.growth_velocity > 0
         ORDER BY t.growth_velocity DESC, r.stars DESC
         LIMIT ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit], ranked_from_row)?;
    collect_rows(rows)
}

pub fn tier_counts(conn: &Connection) -> Result<TierCounts> {
    let mut counts = TierCounts::default();
    let mut stmt =
        conn.prepare("SELECT tier, COUNT(*) FROM tier_assignments GROUP BY tier")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, u8>(0)?, row.get::<_, u32>(1)?)))?;
    for row in rows {
        let (tier, count) = row?;
        match Tier::from_number(tier) {
            Some(Tier::Hot) => counts.hot = count,
            Some(Tier::Rising) => counts.rising = count,
            Some(Tier::LongTail) => counts.long_tail = count,
            None => {}
        }
    }
    counts.unscanned = conn.query_row(
        "SELECT COUNT(*) FROM repositories r
         LEFT JOIN tier_assignments t ON t.repo_id = r.id
         WHERE t.repo_id IS NULL",
        [],
        |row| row.get(0),
    )?;
    Ok(counts)
}

/// Remove tier rows whose repository no longer exists. Returns rows removed.
pub fn delete_orphaned_tier_assignments(conn: &Connection) -> Result<u32> {
    let removed = conn.execute(
        "DELETE FROM tier_assignments
         WHERE repo_id NOT IN (SELECT id FROM repositories)",
        [],
    )?;
    Ok(removed as u32)
}

/// Repositories that were scanned (have snapshots) but lost their tier row.
pub fn repositories_missing_tier(conn: &Connection) -> Result<Vec<Repository>> {
    let sql = format!(
        "SELECT {REPO_COLUMNS}
         FROM repositories r
         LEFT JOIN tier_assignments t ON t.repo_id = r.id
         WHERE t.repo_id IS NULL
           AND EXISTS (SELECT 1 FROM repo_metrics m WHERE m.repo_id = r.id)
         ORDER BY r.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| repo_from_row(row, 0))?;
    collect_rows(rows)
}

// --- Analyses ---

/// Repositories that qualify for analysis: tier at or above `max_tier` and no
/// analysis since `fresh_after`. Ordered tier first, then stars, then recency.
pub fn analysis_candidates(
    conn: &Connection,
    fresh_after: DateTime<Utc>,
    max_tier: Tier,
    limit: u32,
) -> Result<Vec<RankedRepository>> {
    let sql = format!(
        "SELECT {REPO_COLUMNS}, {TIER_COLUMNS}
         FROM tier_assignments t
         JOIN repositories r ON r.id = t.repo_id
         WHERE t.tier <= ?1
           AND r.archived = 0
           AND NOT EXISTS (
               SELECT 1 FROM analyses a
               WHERE a.repo_id = r.id AND a.created_at >= ?2
           )
         ORDER BY t.tier ASC, r.stars DESC, r.updated_at DESC, r.id
         LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![max_tier.number(), fresh_after, limit], ranked_from_row)?;
    collect_rows(rows)
}

/// Record an analysis.
///
/// With `fresh_after` set, the insert is skipped (returning None) if the
/// repository already has an analysis at or after that instant. The check
/// and the insert are one statement, so overlapping runs can't both write.
pub fn insert_analysis(
    conn: &Connection,
    analysis: &Analysis,
    fresh_after: Option<DateTime<Utc>>,
) -> Result<Option<i64>> {
    let scores = serde_json::to_string(&analysis.scores)?;
    let strengths = serde_json::to_string(&analysis.strengths)?;
    let risks = serde_json::to_string(&analysis.risks)?;
    let questions = serde_json::to_string(&analysis.questions)?;

    let inserted = conn.execute(
        "INSERT INTO analyses (repo_id, model, scores, overall_score, recommendation, summary,
                               strengths, risks, questions, growth_prediction, investment_thesis,
                               competitive_analysis, input_tokens, output_tokens, cost_usd,
                               created_at)
         SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16
         WHERE ?17 IS NULL OR NOT EXISTS (
             SELECT 1 FROM analyses WHERE repo_id = ?1 AND created_at >= ?17
         )",
        params![
            analysis.repo_id,
            analysis.model,
            scores,
            analysis.overall_score,
            analysis.recommendation.as_str(),
            analysis.summary,
            strengths,
            risks,
            questions,
            analysis.growth_prediction,
            analysis.investment_thesis,
            analysis.competitive_analysis,
            analysis.input_tokens,
            analysis.output_tokens,
            analysis.cost_usd,
            analysis.created_at,
            fresh_after,
        ],
    )
    .with_context(|| format!("Failed to insert analysis for repo {}", analysis.repo_id))?;

    if inserted == 0 {
        Ok(None)
    } else {
        Ok(Some(conn.last_insert_rowid()))
    }
}

pub fn get_latest_analysis(conn: &Connection, repo_id: i64) -> Result<Option<Analysis>> {
    let sql = format!(
        "SELECT {ANALYSIS_COLUMNS} FROM analyses
         WHERE repo_id = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT 1"
    );
    let result = conn
        .query_row(&sql, params![repo_id], analysis_from_row)
        .optional()?;
    Ok(result)
}

/// Analysis history for a repository, newest first.
pub fn list_analyses(conn: &Connection, repo_id: i64, limit: u32) -> Result<Vec<Analysis>> {
    let sql = format!(
        "SELECT {ANALYSIS_COLUMNS} FROM analyses
         WHERE repo_id = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![repo_id, limit], analysis_from_row)?;
    collect_rows(rows)
}

pub fn analysis_count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM analyses", [], |row| row.get(0))?;
    Ok(count)
}

/// Total spend on analyses, in USD.
pub fn total_analysis_cost(conn: &Connection) -> Result<f64> {
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(cost_usd), 0.0) FROM analyses",
        [],
        |row| row.get(0),
    )?;
    Ok(total)
}

// --- Alerts ---

pub fn insert_alert(conn: &Connection, alert: &NewAlert, created_at: DateTime<Utc>) -> Result<i64> {
    let metadata = alert
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO alerts (repo_id, alert_type, level, message, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            alert.repo_id,
            alert.alert_type,
            alert.level.as_str(),
            alert.message,
            metadata,
            created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Recent alerts, newest first.
pub fn list_alerts(conn: &Connection, unacknowledged_only: bool, limit: u32) -> Result<Vec<Alert>> {
    let sql = format!(
        "SELECT {ALERT_COLUMNS} FROM alerts
         WHERE (?1 = 0 OR acknowledged = 0)
         ORDER BY created_at DESC, id DESC
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![unacknowledged_only, limit], alert_from_row)?;
    collect_rows(rows)
}

/// Mark an alert acknowledged. Returns false if it doesn't exist or was
/// already acknowledged.
pub fn acknowledge_alert(conn: &Connection, id: i64, at: DateTime<Utc>) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE alerts SET acknowledged = 1, acknowledged_at = ?2
         WHERE id = ?1 AND acknowledged = 0",
        params![id, at],
    )?;
    Ok(updated > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::create_tables;
    use chrono::Duration;
    use std::collections::BTreeMap;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    fn repo(id: i64, stars: i64) -> Repository {
        Repository {
            id,
            full_name: format!("owner/repo{id}"),
            owner: "owner".to_string(),
            name: format!("repo{id}"),
            description: Some("A test repository".to_string()),
            language: Some("Python".to_string()),
            topics: vec!["llm".to_string()],
            html_url: format!("https://github.com/owner/repo{id}"),
            stars,
            forks: 10,
            open_issues: 3,
            watchers: stars,
            archived: false,
            fork: false,
            created_at: None,
            updated_at: Some(Utc::now()),
            pushed_at: Some(Utc::now()),
            discovered_at: Utc::now(),
        }
    }

    fn assignment(repo_id: i64, tier: Tier, priority: f64, at: DateTime<Utc>) -> TierAssignment {
        TierAssignment {
            repo_id,
            tier,
            growth_velocity: 12.5,
            engagement_score: 40.0,
            scan_priority: priority,
            last_deep_scan_at: None,
            last_basic_scan_at: Some(at),
            updated_at: at,
        }
    }

    fn analysis(repo_id: i64, at: DateTime<Utc>) -> Analysis {
        let mut scores = BTreeMap::new();
        for (k, v) in [("innovation", 80.0), ("traction", 70.0), ("team", 60.0), ("moat", 50.0)] {
            scores.insert(k.to_string(), v);
        }
        Analysis {
            id: None,
            repo_id,
            model: "claude-test".to_string(),
            scores,
            overall_score: 65.0,
            recommendation: Recommendation::Buy,
            summary: "Promising".to_string(),
            strengths: vec!["fast".to_string()],
            risks: vec!["crowded".to_string()],
            questions: vec!["license?".to_string()],
            growth_prediction: None,
            investment_thesis: Some("Infra play".to_string()),
            competitive_analysis: None,
            input_tokens: 1000,
            output_tokens: 500,
            cost_usd: 0.01,
            created_at: at,
        }
    }

    #[test]
    fn test_scan_state_roundtrip() {
        let conn = test_db();
        assert_eq!(get_scan_state(&conn, "last_run_at").unwrap(), None);

        set_scan_state(&conn, "last_run_at", "2024-01-01").unwrap();
        set_scan_state(&conn, "last_run_at", "2024-01-02").unwrap();
        assert_eq!(
            get_scan_state(&conn, "last_run_at").unwrap(),
            Some("2024-01-02".to_string())
        );
    }

    #[test]
    fn test_upsert_repository_reports_new_and_keeps_discovered_at() {
        let conn = test_db();
        let mut r = repo(1, 100);
        let original_discovery = r.discovered_at;
        assert!(upsert_repository(&conn, &r).unwrap());

        r.stars = 250;
        r.discovered_at = original_discovery + Duration::days(3);
        assert!(!upsert_repository(&conn, &r).unwrap());

        let loaded = get_repository(&conn, 1).unwrap().unwrap();
        assert_eq!(loaded.stars, 250);
        assert_eq!(loaded.discovered_at, original_discovery);
        assert_eq!(loaded.topics, vec!["llm".to_string()]);
    }

    #[test]
    fn test_get_repository_by_name_is_case_insensitive() {
        let conn = test_db();
        upsert_repository(&conn, &repo(7, 10)).unwrap();
        assert!(get_repository_by_name(&conn, "OWNER/Repo7").unwrap().is_some());
        assert!(get_repository_by_name(&conn, "owner/missing").unwrap().is_none());
    }

    #[test]
    fn test_tier_assignment_roundtrip() {
        let conn = test_db();
        upsert_repository(&conn, &repo(1, 100)).unwrap();
        let now = Utc::now();
        let a = assignment(1, Tier::Rising, 123.456_789, now);
        upsert_tier_assignment(&conn, &a).unwrap();

        let loaded = get_tier_assignment(&conn, 1).unwrap().unwrap();
        assert_eq!(loaded.tier, Tier::Rising);
        assert!((loaded.growth_velocity - 12.5).abs() < 1e-9);
        assert!((loaded.scan_priority - 123.456_789).abs() < 1e-9);
        assert_eq!(loaded.last_basic_scan_at, Some(now));
    }

    #[test]
    fn test_due_for_scan_respects_cutoff_and_priority() {
        let conn = test_db();
        let now = Utc::now();
        for (id, priority, age_hours) in [(1, 10.0, 10), (2, 50.0, 10), (3, 99.0, 1)] {
            upsert_repository(&conn, &repo(id, 100)).unwrap();
            upsert_tier_assignment(
                &conn,
                &assignment(id, Tier::Hot, priority, now - Duration::hours(age_hours)),
            )
            .unwrap();
        }

        let due = due_for_scan(&conn, Tier::Hot, now - Duration::hours(6), 10).unwrap();
        let ids: Vec<i64> = due.iter().map(|r| r.repository.id).collect();
        // Repo 3 was scanned an hour ago; the other two ordered by priority.
        assert_eq!(ids, vec![2, 1]);

        assert!(due_for_scan(&conn, Tier::Rising, now, 10).unwrap().is_empty());
    }

    #[test]
    fn test_unscanned_repositories_excludes_tiered_and_archived() {
        let conn = test_db();
        upsert_repository(&conn, &repo(1, 500)).unwrap();
        upsert_repository(&conn, &repo(2, 900)).unwrap();
        let mut archived = repo(3, 5000);
        archived.archived = true;
        upsert_repository(&conn, &archived).unwrap();
        upsert_tier_assignment(&conn, &assignment(1, Tier::LongTail, 1.0, Utc::now())).unwrap();

        let unscanned = unscanned_repositories(&conn, 10).unwrap();
        assert_eq!(unscanned.len(), 1);
        assert_eq!(unscanned[0].id, 2);
    }

    #[test]
    fn test_snapshots_newest_first() {
        let conn = test_db();
        upsert_repository(&conn, &repo(1, 100)).unwrap();
        let now = Utc::now();
        let mut metrics = RepoMetrics::minimal(repo(1, 100), now - Duration::days(2));
        insert_snapshot(&conn, &metrics.snapshot()).unwrap();
        metrics.repository.stars = 180;
        metrics.observed_at = now;
        insert_snapshot(&conn, &metrics.snapshot()).unwrap();

        let snaps = latest_snapshots(&conn, 1, 2).unwrap();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].stars, 180);
        assert_eq!(snaps[1].stars, 100);
        assert_eq!(snaps[0].scan_depth, ScanDepth::Minimal);
        assert_eq!(snapshot_count(&conn, 1).unwrap(), 2);
    }

    #[test]
    fn test_record_scan_writes_all_three() {
        let conn = test_db();
        let now = Utc::now();
        let metrics = RepoMetrics::minimal(repo(5, 321), now);
        let a = assignment(5, Tier::LongTail, 3.0, now);
        record_scan(&conn, &metrics, &a).unwrap();

        assert_eq!(get_repository(&conn, 5).unwrap().unwrap().stars, 321);
        assert_eq!(snapshot_count(&conn, 5).unwrap(), 1);
        assert!(get_tier_assignment(&conn, 5).unwrap().is_some());
    }

    #[test]
    fn test_insert_analysis_fresh_guard() {
        let conn = test_db();
        upsert_repository(&conn, &repo(1, 100)).unwrap();
        let now = Utc::now();
        let window = now - Duration::days(7);

        let first = insert_analysis(&conn, &analysis(1, now), Some(window)).unwrap();
        assert!(first.is_some());

        // A second analysis inside the freshness window is refused.
        let second = insert_analysis(&conn, &analysis(1, now), Some(window)).unwrap();
        assert!(second.is_none());

        // Unconditional inserts always land.
        let forced = insert_analysis(&conn, &analysis(1, now), None).unwrap();
        assert!(forced.is_some());
        assert_eq!(analysis_count(&conn).unwrap(), 2);
    }

    #[test]
    fn test_latest_analysis_and_cost() {
        let conn = test_db();
        upsert_repository(&conn, &repo(1, 100)).unwrap();
        let now = Utc::now();
        insert_analysis(&conn, &analysis(1, now - Duration::days(10)), None).unwrap();
        let mut newer = analysis(1, now);
        newer.recommendation = Recommendation::StrongBuy;
        insert_analysis(&conn, &newer, None).unwrap();

        let latest = get_latest_analysis(&conn, 1).unwrap().unwrap();
        assert_eq!(latest.recommendation, Recommendation::StrongBuy);
        assert_eq!(latest.scores.len(), 4);
        assert_eq!(latest.investment_thesis.as_deref(), Some("Infra play"));
        assert_eq!(list_analyses(&conn, 1, 10).unwrap().len(), 2);
        assert!((total_analysis_cost(&conn).unwrap() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_analysis_candidates_order_and_freshness() {
        let conn = test_db();
        let now = Utc::now();
        // (id, stars, tier)
        for (id, stars, tier) in [
            (1, 500, Tier::Rising),
            (2, 9000, Tier::Rising),
            (3, 100, Tier::Hot),
            (4, 50_000, Tier::LongTail),
            (5, 20_000, Tier::Hot),
        ] {
            upsert_repository(&conn, &repo(id, stars)).unwrap();
            upsert_tier_assignment(&conn, &assignment(id, tier, 1.0, now)).unwrap();
        }
        // Repo 5 already has a fresh analysis.
        insert_analysis(&conn, &analysis(5, now), None).unwrap();

        let candidates =
            analysis_candidates(&conn, now - Duration::days(7), Tier::Rising, 10).unwrap();
        let ids: Vec<i64> = candidates.iter().map(|c| c.repository.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_orphan_cleanup_and_missing_tiers() {
        let conn = test_db();
        upsert_repository(&conn, &repo(1, 100)).unwrap();
        insert_snapshot(&conn, &RepoMetrics::minimal(repo(1, 100), Utc::now()).snapshot()).unwrap();

        // Simulate a legacy orphan written before foreign keys were enforced.
        conn.pragma_update(None, "foreign_keys", "OFF").unwrap();
        upsert_tier_assignment(&conn, &assignment(42, Tier::Hot, 1.0, Utc::now())).unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();

        assert_eq!(delete_orphaned_tier_assignments(&conn).unwrap(), 1);
        assert_eq!(delete_orphaned_tier_assignments(&conn).unwrap(), 0);

        let missing = repositories_missing_tier(&conn).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, 1);
    }

    #[test]
    fn test_tier_counts() {
        let conn = test_db();
        let now = Utc::now();
        for id in 1..=4 {
            upsert_repository(&conn, &repo(id, 10)).unwrap();
        }
        upsert_tier_assignment(&conn, &assignment(1, Tier::Hot, 1.0, now)).unwrap();
        upsert_tier_assignment(&conn, &assignment(2, Tier::LongTail, 1.0, now)).unwrap();
        upsert_tier_assignment(&conn, &assignment(3, Tier::LongTail, 1.0, now)).unwrap();

        let counts = tier_counts(&conn).unwrap();
        assert_eq!(counts.hot, 1);
        assert_eq!(counts.rising, 0);
        assert_eq!(counts.long_tail, 2);
        assert_eq!(counts.unscanned, 1);
    }

    #[test]
    fn test_alert_acknowledge_once() {
        let conn = test_db();
        upsert_repository(&conn, &repo(1, 10)).unwrap();
        let id = insert_alert(
            &conn,
            &NewAlert {
                repo_id: Some(1),
                alert_type: "growth_spike".to_string(),
                level: AlertLevel::Warning,
                message: "owner/repo1 is gaining 200 stars/day".to_string(),
                metadata: Some(serde_json::json!({ "growth_velocity": 200.0 })),
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(list_alerts(&conn, true, 10).unwrap().len(), 1);
        assert!(acknowledge_alert(&conn, id, Utc::now()).unwrap());
        assert!(!acknowledge_alert(&conn, id, Utc::now()).unwrap());

        assert!(list_alerts(&conn, true, 10).unwrap().is_empty());
        let all = list_alerts(&conn, false, 10).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].acknowledged);
        assert!(all[0].acknowledged_at.is_some());
        assert_eq!(all[0].metadata.as_ref().unwrap()["growth_velocity"], 200.0);
    }
}
