// Orchestrator tests — full scan runs against in-memory fakes.
//
// A scripted RepoSource stands in for GitHub and a scripted LlmClient for
// Claude; storage is a real SQLite database in memory. These exercise the
// run loop end to end: work selection, budget checks, rate limiting,
// failure isolation, persistence, and alerting.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use repo_scout::config::{Config, RateLimits, ScanSettings};
use repo_scout::db::models::{RepoMetrics, Tier, TierAssignment};
use repo_scout::db::sqlite::SqliteDatabase;
use repo_scout::db::{queries, schema, Database};
use repo_scout::error::ScanError;
use repo_scout::github::traits::{Quota, RepoSource};
use repo_scout::github::types::{
    CommitActivityWeek, GhIssue, GhOwner, GhPullRequest, GhRelease, GhRepository, SearchPage,
};
use repo_scout::llm::traits::{Completion, LlmClient, Usage};
use repo_scout::pipeline::reconcile::reconcile;
use repo_scout::pipeline::{ScanOrchestrator, ScanTrigger, TimeBudget, TriggerError};
use repo_scout::rate_limit::{ApiName, RateLimiter};

// ============================================================
// Fakes
// ============================================================

#[derive(Default)]
struct FakeGitHub {
    repos: Mutex<HashMap<i64, GhRepository>>,
    failing: HashSet<i64>,
    search_results: Vec<GhRepository>,
    failing_topics: HashSet<String>,
    readme_calls: Mutex<u32>,
    quota: Option<Quota>,
}

impl FakeGitHub {
    fn with_repos(repos: Vec<GhRepository>) -> Self {
        Self {
            repos: Mutex::new(repos.into_iter().map(|r| (r.id, r)).collect()),
            ..Default::default()
        }
    }

    fn readme_calls(&self) -> u32 {
        *self.readme_calls.lock().unwrap()
    }
}

#[async_trait]
impl RepoSource for FakeGitHub {
    async fn search_repositories(
        &self,
        query: &str,
        _page: u32,
        _per_page: u32,
    ) -> Result<SearchPage, ScanError> {
        if self
            .failing_topics
            .iter()
            .any(|t| query.starts_with(&format!("topic:{t} ")))
        {
            return Err(ScanError::Upstream {
                service: "github".into(),
                status: 422,
                body: "Validation Failed".into(),
            });
        }
        Ok(SearchPage {
            total_count: self.search_results.len() as i64,
            incomplete_results: false,
            items: self.search_results.clone(),
        })
    }

    async fn get_repository(&self, id: i64) -> Result<GhRepository, ScanError> {
        if self.failing.contains(&id) {
            return Err(ScanError::Upstream {
                service: "github".into(),
                status: 500,
                body: "boom".into(),
            });
        }
        self.repos
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| ScanError::Upstream {
                service: "github".into(),
                status: 404,
                body: "Not Found".into(),
            })
    }

    async fn get_commit_activity(
        &self,
        _full_name: &str,
    ) -> Result<Option<Vec<CommitActivityWeek>>, ScanError> {
        Ok(Some(vec![CommitActivityWeek { total: 12, week: 0 }]))
    }

    async fn get_releases(&self, _full_name: &str) -> Result<Vec<GhRelease>, ScanError> {
        Ok(vec![])
    }

    async fn get_pull_requests(&self, _full_name: &str) -> Result<Vec<GhPullRequest>, ScanError> {
        Ok(vec![])
    }

    async fn get_closed_issues(&self, _full_name: &str) -> Result<Vec<GhIssue>, ScanError> {
        Ok(vec![])
    }

    async fn get_readme(&self, full_name: &str) -> Result<Option<String>, ScanError> {
        *self.readme_calls.lock().unwrap() += 1;
        Ok(Some(format!("# {full_name}\nAn inference engine.")))
    }

    fn quota(&self) -> Option<Quota> {
        self.quota
    }
}

struct FakeClaude {
    reply: String,
    models: Mutex<Vec<String>>,
    /// Time each call takes before answering.
    delay: Duration,
    /// Answer every call with a 429.
    rate_limited: bool,
}

impl FakeClaude {
    fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            models: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            rate_limited: false,
        }
    }

    fn calls(&self) -> usize {
        self.models.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for FakeClaude {
    async fn complete(
        &self,
        _prompt: &str,
        model: &str,
        _max_tokens: u32,
    ) -> Result<Completion, ScanError> {
        self.models.lock().unwrap().push(model.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.rate_limited {
            return Err(ScanError::RateLimitExceeded {
                api: ApiName::Claude,
                retry_after_ms: 30_000,
            });
        }
        Ok(Completion {
            text: self.reply.clone(),
            usage: Usage {
                input_tokens: 2_000,
                output_tokens: 500,
            },
            stop_reason: Some("end_turn".into()),
        })
    }
}

const GOOD_REPLY: &str = r#"```json
{
  "scores": {"innovation": 90, "market_potential": 85, "technical_quality": 80, "community_traction": 85},
  "recommendation": "buy",
  "summary": "Fast-moving inference engine with strong adoption.",
  "strengths": ["performance"],
  "risks": ["crowded market"],
  "questions": ["monetization?"]
}
```"#;

// ============================================================
// Helpers
// ============================================================

fn gh_repo(id: i64, full_name: &str, stars: i64) -> GhRepository {
    let (owner, name) = full_name.split_once('/').unwrap();
    GhRepository {
        id,
        full_name: full_name.to_string(),
        name: name.to_string(),
        owner: GhOwner {
            login: owner.to_string(),
        },
        description: Some("LLM tooling".into()),
        language: Some("Rust".into()),
        topics: vec!["llm".into()],
        html_url: format!("https://github.com/{full_name}"),
        stargazers_count: stars,
        forks_count: stars / 10,
        open_issues_count: 20,
        subscribers_count: Some(50),
        watchers_count: stars,
        archived: false,
        fork: false,
        created_at: None,
        updated_at: Some(Utc::now()),
        pushed_at: Some(Utc::now()),
    }
}

fn memory_db() -> Arc<dyn Database> {
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    schema::create_tables(&conn).unwrap();
    Arc::new(SqliteDatabase::new(conn))
}

fn test_config() -> Config {
    Config {
        scan: ScanSettings {
            discover_on_scan: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn limiter(config: &Config) -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(config.rate_limits.buckets()))
}

async fn seed(db: &Arc<dyn Database>, repos: &[GhRepository]) {
    for r in repos {
        db.upsert_repository(&r.clone().into_repository(Utc::now()))
            .await
            .unwrap();
    }
}

fn fresh_budget() -> TimeBudget {
    TimeBudget::new(Duration::from_secs(300), Duration::from_secs(10), 0.6)
}

fn orchestrator(
    config: &Config,
    db: &Arc<dyn Database>,
    github: &Arc<FakeGitHub>,
    claude: Option<&Arc<FakeClaude>>,
) -> ScanOrchestrator {
    let llm = claude.map(|c| c.clone() as Arc<dyn LlmClient>);
    ScanOrchestrator::new(config, db.clone(), github.clone(), llm, limiter(config))
}

// ============================================================
// Runs
// ============================================================

#[tokio::test]
async fn first_run_scans_and_analyzes_new_repositories() {
    let repos = vec![gh_repo(1, "acme/engine", 20_000), gh_repo(2, "acme/agent", 3_000)];
    let db = memory_db();
    seed(&db, &repos).await;
    let github = Arc::new(FakeGitHub::with_repos(repos));
    let claude = Arc::new(FakeClaude::replying(GOOD_REPLY));
    let config = test_config();

    let summary = orchestrator(&config, &db, &github, Some(&claude))
        .run(fresh_budget())
        .await
        .unwrap();

    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.new_scanned, 2);
    assert_eq!(summary.analyzed, 2);
    assert_eq!(summary.failed, 0);
    assert!(summary.cost_usd > 0.0);
    assert!(!summary.metrics_stopped_early);

    let assignment = db.get_tier_assignment(1).await.unwrap().unwrap();
    assert_eq!(assignment.tier, Tier::Rising);
    assert!(assignment.last_basic_scan_at.is_some());

    let analysis = db.get_latest_analysis(1).await.unwrap().unwrap();
    assert!((analysis.overall_score - 85.0).abs() < 1e-9);

    // Overall 85 crosses the default 80 score threshold for both repos.
    let alerts = db.list_alerts(true, 50).await.unwrap();
    assert_eq!(
        alerts.iter().filter(|a| a.alert_type == "score_threshold").count(),
        2
    );

    assert!(db.get_scan_state("last_run_at").await.unwrap().is_some());
}

#[tokio::test]
async fn second_run_within_intervals_does_nothing() {
    let repos = vec![gh_repo(1, "acme/engine", 20_000)];
    let db = memory_db();
    seed(&db, &repos).await;
    let github = Arc::new(FakeGitHub::with_repos(repos));
    let claude = Arc::new(FakeClaude::replying(GOOD_REPLY));
    let config = test_config();
    let orch = orchestrator(&config, &db, &github, Some(&claude));

    orch.run(fresh_budget()).await.unwrap();
    let second = orch.run(fresh_budget()).await.unwrap();

    assert_eq!(second.scanned, 0);
    assert_eq!(second.analyzed, 0);
    assert_eq!(claude.calls(), 1);
    assert_eq!(db.latest_snapshots(1, 10).await.unwrap().len(), 1);
    assert_eq!(db.analysis_count().await.unwrap(), 1);
}

#[tokio::test]
async fn exhausted_budget_starts_no_work() {
    let repos = vec![gh_repo(1, "acme/engine", 20_000)];
    let db = memory_db();
    seed(&db, &repos).await;
    let github = Arc::new(FakeGitHub::with_repos(repos));
    let claude = Arc::new(FakeClaude::replying(GOOD_REPLY));
    let config = test_config();

    // 290s of 300 spent with a 10s buffer: no phase may start a unit.
    let budget = fresh_budget().with_elapsed(Duration::from_secs(290));
    let summary = orchestrator(&config, &db, &github, Some(&claude))
        .run(budget)
        .await
        .unwrap();

    assert_eq!(summary.scanned, 0);
    assert_eq!(summary.analyzed, 0);
    assert!(summary.metrics_stopped_early);
    assert_eq!(claude.calls(), 0);
    assert!(db.get_tier_assignment(1).await.unwrap().is_none());
}

#[tokio::test]
async fn analysis_phase_respects_its_own_deadline() {
    let repos = vec![gh_repo(1, "acme/engine", 20_000)];
    let db = memory_db();
    seed(&db, &repos).await;
    let github = Arc::new(FakeGitHub::with_repos(repos));
    let claude = Arc::new(FakeClaude::replying(GOOD_REPLY));
    let config = test_config();
    let orch = orchestrator(&config, &db, &github, Some(&claude));

    // Metrics deadline is 180s; analysis deadline 300s.
    orch.run(fresh_budget().with_elapsed(Duration::from_secs(100)))
        .await
        .unwrap();
    assert_eq!(claude.calls(), 1);

    let repos = vec![gh_repo(2, "acme/agent", 9_000)];
    seed(&db, &repos).await;
    github.repos.lock().unwrap().insert(2, repos[0].clone());
    let summary = orch
        .run(fresh_budget().with_elapsed(Duration::from_secs(200)))
        .await
        .unwrap();
    assert_eq!(summary.scanned, 0);
    assert!(summary.metrics_stopped_early);
    assert!(!summary.analysis_stopped_early);
}

#[tokio::test]
async fn slow_model_call_cannot_overrun_total_budget() {
    let repos = vec![gh_repo(1, "acme/engine", 20_000)];
    let db = memory_db();
    seed(&db, &repos).await;
    let github = Arc::new(FakeGitHub::with_repos(repos));
    let config = test_config();

    // Metrics only, so the repository has a tier and is due for analysis.
    orchestrator(&config, &db, &github, None)
        .run(fresh_budget())
        .await
        .unwrap();

    let claude = Arc::new(FakeClaude {
        delay: Duration::from_millis(2_500),
        ..FakeClaude::replying(GOOD_REPLY)
    });
    // 3s total, 1s buffer, 1.9s spent: the analysis unit may start but has
    // only 0.1s before the buffer, far less than the model takes.
    let total = Duration::from_secs(3);
    let budget = TimeBudget::new(total, Duration::from_secs(1), 0.6)
        .with_elapsed(Duration::from_millis(1_900));
    let summary = orchestrator(&config, &db, &github, Some(&claude))
        .run(budget)
        .await
        .unwrap();

    assert!(
        summary.elapsed_ms < total.as_millis() as u64,
        "run took {}ms of a {}ms budget",
        summary.elapsed_ms,
        total.as_millis()
    );
    assert_eq!(claude.calls(), 1);
    assert_eq!(summary.analyzed, 0);
    assert!(summary.analysis_stopped_early);
    assert_eq!(db.analysis_count().await.unwrap(), 0);
}

#[tokio::test]
async fn one_failing_repository_does_not_stop_the_run() {
    let repos = vec![gh_repo(1, "acme/broken", 50_000), gh_repo(2, "acme/fine", 20_000)];
    let db = memory_db();
    seed(&db, &repos).await;
    let github = Arc::new(FakeGitHub {
        failing: HashSet::from([1]),
        ..FakeGitHub::with_repos(repos)
    });
    let config = test_config();

    let summary = orchestrator(&config, &db, &github, None)
        .run(fresh_budget())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.scanned, 1);
    // The failed repository wrote nothing and stays eligible.
    assert!(db.get_tier_assignment(1).await.unwrap().is_none());
    assert!(db.latest_snapshots(1, 1).await.unwrap().is_empty());
    assert!(db.get_tier_assignment(2).await.unwrap().is_some());
}

#[tokio::test]
async fn malformed_model_output_persists_nothing() {
    let repos = vec![gh_repo(1, "acme/engine", 20_000)];
    let db = memory_db();
    seed(&db, &repos).await;
    let github = Arc::new(FakeGitHub::with_repos(repos));
    let claude = Arc::new(FakeClaude::replying(
        r#"{"scores": {"innovation": 90}, "summary": "missing recommendation"}"#,
    ));
    let config = test_config();

    let summary = orchestrator(&config, &db, &github, Some(&claude))
        .run(fresh_budget())
        .await
        .unwrap();

    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.analyzed, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(db.analysis_count().await.unwrap(), 0);
    assert!(db.get_latest_analysis(1).await.unwrap().is_none());
}

#[tokio::test]
async fn local_rate_limit_denial_skips_without_waiting() {
    let repos = vec![gh_repo(1, "acme/engine", 20_000), gh_repo(2, "acme/agent", 10_000)];
    let db = memory_db();
    seed(&db, &repos).await;
    let github = Arc::new(FakeGitHub::with_repos(repos));
    let claude = Arc::new(FakeClaude::replying(GOOD_REPLY));
    // Enough GitHub budget for exactly one basic scan, none for Claude.
    let config = Config {
        rate_limits: RateLimits {
            github_rest_per_minute: 3,
            github_search_per_minute: 10,
            claude_per_minute: 0,
        },
        ..test_config()
    };

    let started = std::time::Instant::now();
    let summary = orchestrator(&config, &db, &github, Some(&claude))
        .run(fresh_budget())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(summary.scanned, 1);
    // One metrics denial plus one analysis denial.
    assert_eq!(summary.rate_limited, 2);
    assert_eq!(summary.analyzed, 0);
    assert_eq!(claude.calls(), 0);
    // A denied analysis must not have spent the README call either.
    assert_eq!(github.readme_calls(), 0);
}

#[tokio::test]
async fn growth_spike_promotes_and_escalates_model() {
    let ten_days_ago: DateTime<Utc> = Utc::now() - chrono::Duration::days(10);
    let db = memory_db();

    // Previous scan 10 days ago at 10k stars, Tier 2.
    let before = gh_repo(1, "acme/rocket", 10_000).into_repository(ten_days_ago);
    db.upsert_repository(&before).await.unwrap();
    let metrics = RepoMetrics::minimal(before, ten_days_ago);
    let assignment = TierAssignment {
        repo_id: 1,
        tier: Tier::Rising,
        growth_velocity: 0.0,
        engagement_score: 50.0,
        scan_priority: 100.0,
        last_deep_scan_at: None,
        last_basic_scan_at: Some(ten_days_ago),
        updated_at: ten_days_ago,
    };
    db.record_scan(&metrics, &assignment).await.unwrap();

    // Now at 20k: 1000 stars/day.
    let github = Arc::new(FakeGitHub::with_repos(vec![gh_repo(1, "acme/rocket", 20_000)]));
    let claude = Arc::new(FakeClaude::replying(GOOD_REPLY));
    let config = test_config();

    let summary = orchestrator(&config, &db, &github, Some(&claude))
        .run(fresh_budget())
        .await
        .unwrap();
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.new_scanned, 0);

    let current = db.get_tier_assignment(1).await.unwrap().unwrap();
    assert_eq!(current.tier, Tier::Hot);
    assert!((current.growth_velocity - 1000.0).abs() < 1.0);

    let types: Vec<String> = db
        .list_alerts(true, 50)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.alert_type)
        .collect();
    assert!(types.contains(&"growth_spike".to_string()));
    assert!(types.contains(&"tier_promotion".to_string()));

    let models = claude.models.lock().unwrap().clone();
    assert_eq!(models, vec![config.models.premium.id.clone()]);
}

#[tokio::test]
async fn reconcile_restores_missing_tier_rows() {
    let conn = Connection::open_in_memory().unwrap();
    schema::create_tables(&conn).unwrap();

    let observed = Utc::now() - chrono::Duration::hours(1);
    let repo = gh_repo(1, "acme/engine", 20_000).into_repository(observed);
    let assignment = TierAssignment {
        repo_id: 1,
        tier: Tier::LongTail,
        growth_velocity: 0.0,
        engagement_score: 0.0,
        scan_priority: 0.0,
        last_deep_scan_at: None,
        last_basic_scan_at: Some(observed),
        updated_at: observed,
    };
    queries::record_scan(&conn, &RepoMetrics::minimal(repo, observed), &assignment).unwrap();
    // Drift: the tier row is gone but the snapshot remains.
    conn.execute("DELETE FROM tier_assignments WHERE repo_id = 1", [])
        .unwrap();
    let db: Arc<dyn Database> = Arc::new(SqliteDatabase::new(conn));

    let github = Arc::new(FakeGitHub::default());
    let config = test_config();
    let orch = orchestrator(&config, &db, &github, None);
    let report = reconcile(db.as_ref(), orch.classifier(), Utc::now())
        .await
        .unwrap();

    assert_eq!(report.orphans_removed, 0);
    assert_eq!(report.assignments_restored, 1);
    let restored = db.get_tier_assignment(1).await.unwrap().unwrap();
    // Reclassified from the snapshot: 20k stars with no history is Tier 2.
    assert_eq!(restored.tier, Tier::Rising);
    assert_eq!(
        restored.last_basic_scan_at.map(|t| t.timestamp()),
        Some(observed.timestamp())
    );

    // A second pass has nothing left to do.
    let again = reconcile(db.as_ref(), orch.classifier(), Utc::now())
        .await
        .unwrap();
    assert_eq!(again.assignments_restored, 0);
}

#[tokio::test]
async fn discovery_counts_only_new_repositories() {
    let db = memory_db();
    seed(&db, &[gh_repo(1, "acme/engine", 20_000)]).await;
    let github = Arc::new(FakeGitHub {
        search_results: vec![gh_repo(1, "acme/engine", 20_000), gh_repo(2, "acme/agent", 900)],
        ..Default::default()
    });
    let config = Config {
        topics: vec!["llm".into()],
        ..test_config()
    };

    let outcome = orchestrator(&config, &db, &github, None)
        .discover(None)
        .await
        .unwrap();

    assert_eq!(outcome.new_repositories, 1);
    assert_eq!(outcome.seen, 2);
    assert_eq!(db.repository_count().await.unwrap(), 2);
}

#[tokio::test]
async fn failed_topic_search_still_counts_as_done() {
    let db = memory_db();
    let github = Arc::new(FakeGitHub {
        search_results: vec![gh_repo(2, "acme/agent", 900)],
        failing_topics: HashSet::from(["llm".to_string()]),
        ..Default::default()
    });
    let config = Config {
        topics: vec!["llm".into(), "agents".into()],
        ..test_config()
    };

    let outcome = orchestrator(&config, &db, &github, None)
        .discover(None)
        .await
        .unwrap();

    assert_eq!(outcome.topics_done, 2);
    assert_eq!(outcome.pages, 1);
    assert_eq!(outcome.new_repositories, 1);
    assert!(!outcome.rate_limited);
}

#[tokio::test]
async fn on_demand_analysis_applies_upstream_limits() {
    let repos = vec![gh_repo(1, "acme/engine", 20_000)];
    let db = memory_db();
    seed(&db, &repos).await;
    // The README response reports the REST quota as spent.
    let github = Arc::new(FakeGitHub {
        quota: Some(Quota {
            api: ApiName::GitHubRest,
            remaining: 0,
            reset_at: Utc::now() + chrono::Duration::minutes(5),
        }),
        ..FakeGitHub::with_repos(repos)
    });
    let claude = Arc::new(FakeClaude {
        rate_limited: true,
        ..FakeClaude::replying(GOOD_REPLY)
    });
    let config = test_config();
    let shared = limiter(&config);
    let orch = ScanOrchestrator::new(
        &config,
        db.clone(),
        github.clone(),
        Some(claude.clone() as Arc<dyn LlmClient>),
        shared.clone(),
    );

    let err = orch.analyze_repository("acme/engine").await.unwrap_err();

    assert!(err
        .downcast_ref::<ScanError>()
        .is_some_and(ScanError::is_rate_limited));
    assert_eq!(github.readme_calls(), 1);
    assert!(!shared.try_acquire(ApiName::GitHubRest).allowed);
    assert!(!shared.try_acquire(ApiName::Claude).allowed);
    assert_eq!(db.analysis_count().await.unwrap(), 0);
}

#[tokio::test]
async fn trigger_refuses_overlapping_runs() {
    let repos = vec![gh_repo(1, "acme/engine", 20_000)];
    let db = memory_db();
    seed(&db, &repos).await;
    let github = Arc::new(FakeGitHub::with_repos(repos));
    let config = test_config();
    let trigger = ScanTrigger::new(orchestrator(&config, &db, &github, None));

    let handle = trigger.try_launch().await.unwrap();
    // The status flips to running before try_launch returns.
    if trigger.status().await.running {
        assert_eq!(
            trigger.try_launch().await.unwrap_err(),
            TriggerError::AlreadyRunning
        );
    }
    handle.await.unwrap();

    let status = trigger.status().await;
    assert!(!status.running);
    assert!(status.last_error.is_none());
    assert_eq!(status.last_summary.unwrap().scanned, 1);
}
