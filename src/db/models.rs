// Data models — Rust structs that map to database rows.
//
// These are the types that flow through the application. They're separate
// from the database queries so other modules can use them without depending
// on rusqlite directly.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A GitHub repository we track.
///
/// `id` is GitHub's numeric id and never changes; `full_name` can change on
/// rename or transfer and is overwritten on each scan along with the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub full_name: String,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub topics: Vec<String>,
    pub html_url: String,
    pub stars: i64,
    pub forks: i64,
    pub open_issues: i64,
    pub watchers: i64,
    pub archived: bool,
    pub fork: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub pushed_at: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
}

/// Priority bucket governing scan cadence and analysis model choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Tier {
    /// Tier 1
    Hot,
    /// Tier 2
    Rising,
    /// Tier 3
    LongTail,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Hot, Tier::Rising, Tier::LongTail];

    pub fn number(&self) -> u8 {
        match self {
            Tier::Hot => 1,
            Tier::Rising => 2,
            Tier::LongTail => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Tier::Hot),
            2 => Some(Tier::Rising),
            3 => Some(Tier::LongTail),
            _ => None,
        }
    }

    /// Zero-based index for per-tier settings arrays.
    pub fn index(&self) -> usize {
        (self.number() - 1) as usize
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Rising => "rising",
            Tier::LongTail => "long-tail",
        }
    }

    /// Which metrics a scan of this tier fetches.
    pub fn scan_depth(&self) -> ScanDepth {
        match self {
            Tier::Hot => ScanDepth::Deep,
            Tier::Rising => ScanDepth::Basic,
            Tier::LongTail => ScanDepth::Minimal,
        }
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> u8 {
        tier.number()
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Tier::from_number(n).ok_or_else(|| format!("invalid tier {n}"))
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tier {} ({})", self.number(), self.label())
    }
}

/// How much of a repository's activity a scan fetches.
///
/// Depth selects inputs, never the scoring formula: missing inputs fall back
/// to proxies inside the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDepth {
    /// Repository counters only.
    Minimal,
    /// Counters plus commit activity and releases.
    Basic,
    /// Everything, including pull request and issue stats.
    Deep,
}

impl ScanDepth {
    /// GitHub REST calls one scan at this depth costs.
    pub fn github_calls(&self) -> u32 {
        match self {
            ScanDepth::Minimal => 1,
            ScanDepth::Basic => 3,
            ScanDepth::Deep => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanDepth::Minimal => "minimal",
            ScanDepth::Basic => "basic",
            ScanDepth::Deep => "deep",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "minimal" => Some(ScanDepth::Minimal),
            "basic" => Some(ScanDepth::Basic),
            "deep" => Some(ScanDepth::Deep),
            _ => None,
        }
    }
}

impl fmt::Display for ScanDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fresh facts about one repository, as returned by the metrics collector.
///
/// The optional counters are only populated at the depths that fetch them.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoMetrics {
    pub repository: Repository,
    pub depth: ScanDepth,
    pub commits_recent: Option<i64>,
    pub releases_count: Option<i64>,
    pub latest_release_at: Option<DateTime<Utc>>,
    pub open_prs: Option<i64>,
    pub merged_prs: Option<i64>,
    pub closed_issues: Option<i64>,
    pub observed_at: DateTime<Utc>,
}

impl RepoMetrics {
    /// Metrics carrying only the repository counters.
    pub fn minimal(repository: Repository, observed_at: DateTime<Utc>) -> Self {
        Self {
            repository,
            depth: ScanDepth::Minimal,
            commits_recent: None,
            releases_count: None,
            latest_release_at: None,
            open_prs: None,
            merged_prs: None,
            closed_issues: None,
            observed_at,
        }
    }

    /// Rebuild metrics from a stored snapshot, with the snapshot's counters
    /// laid over the repository row.
    pub fn from_snapshot(mut repository: Repository, snapshot: &MetricsSnapshot) -> Self {
        repository.stars = snapshot.stars;
        repository.forks = snapshot.forks;
        repository.open_issues = snapshot.open_issues;
        repository.watchers = snapshot.watchers;
        Self {
            repository,
            depth: snapshot.scan_depth,
            commits_recent: snapshot.commits_recent,
            releases_count: snapshot.releases_count,
            latest_release_at: snapshot.latest_release_at,
            open_prs: snapshot.open_prs,
            merged_prs: snapshot.merged_prs,
            closed_issues: snapshot.closed_issues,
            observed_at: snapshot.recorded_at,
        }
    }

    /// The append-only snapshot row for these metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            id: None,
            repo_id: self.repository.id,
            stars: self.repository.stars,
            forks: self.repository.forks,
            open_issues: self.repository.open_issues,
            watchers: self.repository.watchers,
            commits_recent: self.commits_recent,
            releases_count: self.releases_count,
            latest_release_at: self.latest_release_at,
            open_prs: self.open_prs,
            merged_prs: self.merged_prs,
            closed_issues: self.closed_issues,
            scan_depth: self.depth,
            recorded_at: self.observed_at,
        }
    }
}

/// Point-in-time copy of a repository's counters. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub id: Option<i64>,
    pub repo_id: i64,
    pub stars: i64,
    pub forks: i64,
    pub open_issues: i64,
    pub watchers: i64,
    pub commits_recent: Option<i64>,
    pub releases_count: Option<i64>,
    pub latest_release_at: Option<DateTime<Utc>>,
    pub open_prs: Option<i64>,
    pub merged_prs: Option<i64>,
    pub closed_issues: Option<i64>,
    pub scan_depth: ScanDepth,
    pub recorded_at: DateTime<Utc>,
}

/// The single live tier row for a repository (upsert semantics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierAssignment {
    pub repo_id: i64,
    pub tier: Tier,
    pub growth_velocity: f64,
    pub engagement_score: f64,
    pub scan_priority: f64,
    pub last_deep_scan_at: Option<DateTime<Utc>>,
    pub last_basic_scan_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// A tier assignment joined with its repository, for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedRepository {
    pub repository: Repository,
    pub assignment: TierAssignment,
}

/// The model's investment recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recommendation {
    #[serde(alias = "strong_buy", alias = "STRONG_BUY", alias = "strong buy")]
    StrongBuy,
    #[serde(alias = "BUY")]
    Buy,
    #[serde(alias = "WATCH")]
    Watch,
    #[serde(alias = "PASS")]
    Pass,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::StrongBuy => "strong-buy",
            Recommendation::Buy => "buy",
            Recommendation::Watch => "watch",
            Recommendation::Pass => "pass",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "strong-buy" => Some(Recommendation::StrongBuy),
            "buy" => Some(Recommendation::Buy),
            "watch" => Some(Recommendation::Watch),
            "pass" => Some(Recommendation::Pass),
            _ => None,
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One AI-generated scoring record. Append-only; the latest per repository wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// None until persisted.
    pub id: Option<i64>,
    pub repo_id: i64,
    pub model: String,
    /// 4-7 named sub-scores, each 0-100.
    pub scores: BTreeMap<String, f64>,
    /// Mean of `scores`.
    pub overall_score: f64,
    pub recommendation: Recommendation,
    pub summary: String,
    pub strengths: Vec<String>,
    pub risks: Vec<String>,
    pub questions: Vec<String>,
    pub growth_prediction: Option<String>,
    pub investment_thesis: Option<String>,
    pub competitive_analysis: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

impl Analysis {
    pub fn tokens_used(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(AlertLevel::Info),
            "warning" => Some(AlertLevel::Warning),
            "critical" => Some(AlertLevel::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An alert about to be recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    pub repo_id: Option<i64>,
    pub alert_type: String,
    pub level: AlertLevel,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
}

/// A recorded alert. Only the acknowledgement fields ever change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub repo_id: Option<i64>,
    pub alert_type: String,
    pub level: AlertLevel,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Counts per tier, for status displays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub hot: u32,
    pub rising: u32,
    pub long_tail: u32,
    /// Repositories discovered but never scanned.
    pub unscanned: u32,
}

/// What the reconciliation job changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub orphans_removed: u32,
    pub assignments_restored: u32,
}
