// Scan orchestrator — one time-budgeted scan invocation.
//
// A run goes through these steps in order:
//   1. housekeeping: reconcile tier rows, then optionally discover
//   2. metrics refresh: never-scanned repositories first, then each tier's
//      due repositories, until the metrics deadline
//   3. batch analysis: stale tier 1-2 repositories, until the total deadline
//   4. persist a RunSummary to scan_state
//
// Work is strictly sequential. Every unit of work checks the clock and the
// rate limiter first; a denial skips the unit and moves on without sleeping.
// A unit that starts also runs under a timeout of whatever its phase has left
// before the buffer, so a slow upstream cannot carry the run past its total.
// Failures are isolated per repository: logged with the repo id and error
// kind, counted, and otherwise ignored. A failed repository writes nothing,
// so it stays due for the next run.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::budget::{Phase, TimeBudget};
use super::discovery::{Discovery, DiscoveryOutcome};
use super::reconcile::reconcile;
use crate::analysis::AnalysisRequester;
use crate::config::{AlertThresholds, Config, ScanSettings};
use crate::db::models::{
    Analysis, NewAlert, RankedRepository, ReconcileReport, Repository, ScanDepth, Tier,
    TierAssignment,
};
use crate::db::Database;
use crate::error::ScanError;
use crate::github::metrics::MetricsCollector;
use crate::github::traits::RepoSource;
use crate::llm::traits::LlmClient;
use crate::output::truncate_chars;
use crate::rate_limit::{ApiName, RateLimiter};
use crate::scoring::alerts::{evaluate_analysis, evaluate_metrics};
use crate::scoring::tier::TierClassifier;

/// scan_state key holding the RFC 3339 time of the last completed run.
pub const LAST_RUN_AT: &str = "last_run_at";
/// scan_state key holding the last run's summary as JSON.
pub const LAST_RUN_SUMMARY: &str = "last_run_summary";

/// Raw model output kept in logs when a reply fails validation.
const RAW_LOG_CHARS: usize = 500;

/// Callback receiving human-readable progress as the run advances.
pub type ProgressSink = Arc<dyn Fn(&str) + Send + Sync>;

/// What one invocation did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub discovered: u32,
    pub reconciled: ReconcileReport,
    /// Repositories whose metrics were refreshed.
    pub scanned: u32,
    /// Of `scanned`, how many were scanned for the first time.
    pub new_scanned: u32,
    /// Units skipped on a local denial or an upstream 429.
    pub rate_limited: u32,
    pub failed: u32,
    pub analyzed: u32,
    /// Analyses dropped because a fresher one landed first.
    pub analysis_skipped: u32,
    pub alerts: u32,
    pub cost_usd: f64,
    pub metrics_stopped_early: bool,
    pub analysis_stopped_early: bool,
    pub elapsed_ms: u64,
}

/// One repository queued for a metrics refresh.
#[derive(Debug, Clone)]
struct MetricsItem {
    repository: Repository,
    depth: ScanDepth,
    previous: Option<TierAssignment>,
}

enum AnalysisOutcome {
    Stored { cost_usd: f64, alerts: u32 },
    Skipped { cost_usd: f64 },
}

pub struct ScanOrchestrator {
    db: Arc<dyn Database>,
    source: Arc<dyn RepoSource>,
    limiter: Arc<RateLimiter>,
    collector: MetricsCollector,
    classifier: TierClassifier,
    requester: Option<AnalysisRequester>,
    settings: ScanSettings,
    alert_thresholds: AlertThresholds,
    topics: Vec<String>,
    show_progress: bool,
    progress: Option<ProgressSink>,
}

impl ScanOrchestrator {
    /// Build an orchestrator. Without an LLM client the analysis phase is
    /// skipped entirely.
    pub fn new(
        config: &Config,
        db: Arc<dyn Database>,
        source: Arc<dyn RepoSource>,
        llm: Option<Arc<dyn LlmClient>>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let requester = llm.map(|llm| {
            AnalysisRequester::new(llm, config.models.clone(), config.model_selection.clone())
        });

        Self {
            db,
            collector: MetricsCollector::new(source.clone()),
            source,
            limiter,
            classifier: TierClassifier::new(
                config.thresholds.clone(),
                config.weights.clone(),
                &config.topics,
            ),
            requester,
            settings: config.scan.clone(),
            alert_thresholds: config.alerts.clone(),
            topics: config.topics.clone(),
            show_progress: false,
            progress: None,
        }
    }

    /// Draw indicatif progress bars on stderr.
    pub fn with_progress_bars(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_progress_sink(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn classifier(&self) -> &TierClassifier {
        &self.classifier
    }

    fn report(&self, message: &str) {
        if let Some(sink) = &self.progress {
            sink(message);
        }
    }

    fn progress_bar(&self, len: usize, label: &str) -> ProgressBar {
        let pb = if self.show_progress {
            ProgressBar::new(len as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template(&format!("  {label} [{{bar:30}}] {{pos}}/{{len}} {{msg}}"))
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb
    }

    /// Run one full invocation against `budget`.
    pub async fn run(&self, budget: TimeBudget) -> Result<RunSummary> {
        let started_at = Utc::now();
        let mut summary = RunSummary {
            started_at,
            ..Default::default()
        };
        info!(budget_secs = self.settings.total_budget.as_secs(), "Scan started");

        // Housekeeping
        self.report("Reconciling tier assignments…");
        match reconcile(self.db.as_ref(), &self.classifier, started_at).await {
            Ok(report) => summary.reconciled = report,
            Err(e) => warn!(error = %e, "Reconciliation failed, continuing"),
        }

        if self.settings.discover_on_scan {
            self.report("Discovering repositories…");
            let outcome = self.discover(Some(&budget)).await?;
            summary.discovered = outcome.new_repositories;
        }

        // Phase 1: metrics refresh
        self.report("Refreshing metrics…");
        self.run_metrics_phase(&budget, &mut summary).await?;

        // Phase 2: batch analysis
        if self.requester.is_some() {
            self.report("Analyzing repositories…");
            self.run_analysis_phase(&budget, &mut summary).await?;
        } else {
            debug!("No LLM client configured, skipping analysis phase");
        }

        summary.elapsed_ms = budget.elapsed().as_millis() as u64;
        self.persist_summary(&summary).await?;

        info!(
            scanned = summary.scanned,
            analyzed = summary.analyzed,
            rate_limited = summary.rate_limited,
            failed = summary.failed,
            alerts = summary.alerts,
            cost_usd = summary.cost_usd,
            elapsed_ms = summary.elapsed_ms,
            "Scan finished"
        );
        self.report(&format!(
            "Completed: {} scanned, {} analyzed, {} alerts",
            summary.scanned, summary.analyzed, summary.alerts
        ));

        Ok(summary)
    }

    /// Topic discovery on its own, outside a full run.
    pub async fn discover(&self, budget: Option<&TimeBudget>) -> Result<DiscoveryOutcome> {
        Discovery {
            source: self.source.as_ref(),
            db: self.db.as_ref(),
            limiter: &self.limiter,
            show_progress: self.show_progress,
        }
        .run(
            &self.topics,
            self.settings.discovery_pages,
            self.settings.discovery_min_stars,
            budget,
        )
        .await
    }

    /// Build the metrics work list: new repositories first, then each tier's
    /// due repositories. A repository appears at most once.
    async fn metrics_work(&self, now: DateTime<Utc>) -> Result<Vec<MetricsItem>> {
        let mut seen = HashSet::new();
        let mut work = Vec::new();

        for repository in self
            .db
            .unscanned_repositories(self.settings.new_repo_quota)
            .await
            .context("Failed to list unscanned repositories")?
        {
            if seen.insert(repository.id) {
                work.push(MetricsItem {
                    repository,
                    depth: ScanDepth::Basic,
                    previous: None,
                });
            }
        }

        for tier in Tier::ALL {
            let interval = chrono::Duration::from_std(self.settings.interval(tier))
                .unwrap_or_else(|_| chrono::Duration::days(7));
            let due = self
                .db
                .due_for_scan(tier, now - interval, self.settings.quota(tier))
                .await
                .with_context(|| format!("Failed to list due repositories for {tier}"))?;

            for RankedRepository {
                repository,
                assignment,
            } in due
            {
                if seen.insert(repository.id) {
                    work.push(MetricsItem {
                        repository,
                        depth: tier.scan_depth(),
                        previous: Some(assignment),
                    });
                }
            }
        }

        Ok(work)
    }

    async fn run_metrics_phase(&self, budget: &TimeBudget, summary: &mut RunSummary) -> Result<()> {
        let work = self.metrics_work(Utc::now()).await?;
        debug!(items = work.len(), "Metrics work list built");

        let pb = self.progress_bar(work.len(), "Metrics");
        for (done, item) in work.iter().enumerate() {
            if !budget.can_continue(Phase::Metrics) {
                info!(
                    remaining_items = work.len() - done,
                    "Metrics phase deadline reached"
                );
                summary.metrics_stopped_early = true;
                break;
            }
            pb.set_message(item.repository.full_name.clone());
            pb.inc(1);

            let calls = item.depth.github_calls();
            let decision = self.limiter.try_acquire_n(ApiName::GitHubRest, calls);
            if !decision.allowed {
                debug!(
                    repo_id = item.repository.id,
                    retry_after_ms = decision.retry_after_ms.unwrap_or_default(),
                    "GitHub budget denied, skipping"
                );
                summary.rate_limited += 1;
                continue;
            }

            let unit = tokio::time::timeout(
                budget.remaining(Phase::Metrics),
                self.refresh_metrics(item),
            )
            .await;
            let Ok(result) = unit else {
                info!(
                    repo_id = item.repository.id,
                    "Metrics phase deadline reached mid-scan, abandoning unit"
                );
                summary.metrics_stopped_early = true;
                break;
            };

            match result {
                Ok(alerts) => {
                    summary.scanned += 1;
                    if item.previous.is_none() {
                        summary.new_scanned += 1;
                    }
                    summary.alerts += alerts;
                }
                Err(e) => self.record_failure(item.repository.id, e, summary),
            }
        }
        pb.finish_and_clear();
        Ok(())
    }

    /// Collect, classify, persist, and alert for one repository.
    /// Returns the number of alerts raised.
    async fn refresh_metrics(&self, item: &MetricsItem) -> Result<u32, ScanError> {
        let collected = self.collector.collect(&item.repository, item.depth).await;
        self.sync_quota();
        let metrics = collected?;

        let repo_id = metrics.repository.id;
        let previous_snapshot = self.db.latest_snapshots(repo_id, 1).await?.into_iter().next();
        let c = self.classifier.classify(&metrics, previous_snapshot.as_ref());

        let observed_at = metrics.observed_at;
        let last_deep_scan_at = if item.depth == ScanDepth::Deep {
            Some(observed_at)
        } else {
            item.previous.as_ref().and_then(|p| p.last_deep_scan_at)
        };
        let assignment = TierAssignment {
            repo_id,
            tier: c.tier,
            growth_velocity: c.growth_velocity,
            engagement_score: c.engagement_score,
            scan_priority: c.scan_priority,
            last_deep_scan_at,
            last_basic_scan_at: Some(observed_at),
            updated_at: observed_at,
        };

        self.db.record_scan(&metrics, &assignment).await?;
        debug!(
            repo_id,
            tier = assignment.tier.number(),
            growth = assignment.growth_velocity,
            "Metrics recorded"
        );

        let alerts = evaluate_metrics(
            &metrics.repository,
            item.previous.as_ref(),
            &assignment,
            &self.alert_thresholds,
        );
        Ok(self.store_alerts(&alerts, observed_at).await)
    }

    async fn run_analysis_phase(
        &self,
        budget: &TimeBudget,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let Some(requester) = &self.requester else {
            return Ok(());
        };

        let now = Utc::now();
        let freshness = chrono::Duration::from_std(self.settings.analysis_freshness)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        let fresh_after = now - freshness;

        let candidates = self
            .db
            .analysis_candidates(
                fresh_after,
                self.settings.analysis_max_tier,
                self.settings.analysis_batch_limit,
            )
            .await
            .context("Failed to list analysis candidates")?;
        debug!(candidates = candidates.len(), "Analysis candidates selected");

        let pb = self.progress_bar(candidates.len(), "Analysis");
        for candidate in &candidates {
            if !budget.can_continue(Phase::Analysis) {
                info!("Analysis phase deadline reached");
                summary.analysis_stopped_early = true;
                break;
            }
            pb.set_message(candidate.repository.full_name.clone());
            pb.inc(1);

            let decision = self
                .limiter
                .try_acquire_all(&[(ApiName::Claude, 1), (ApiName::GitHubRest, 1)]);
            if !decision.allowed {
                debug!(
                    repo_id = candidate.repository.id,
                    retry_after_ms = decision.retry_after_ms.unwrap_or_default(),
                    "Analysis budget denied, skipping"
                );
                summary.rate_limited += 1;
                continue;
            }

            let unit = tokio::time::timeout(
                budget.remaining(Phase::Analysis),
                self.analyze_candidate(requester, candidate, Some(fresh_after)),
            )
            .await;
            let Ok(result) = unit else {
                info!(
                    repo_id = candidate.repository.id,
                    "Analysis phase deadline reached mid-call, abandoning unit"
                );
                summary.analysis_stopped_early = true;
                break;
            };

            match result {
                Ok(AnalysisOutcome::Stored { cost_usd, alerts }) => {
                    summary.analyzed += 1;
                    summary.cost_usd += cost_usd;
                    summary.alerts += alerts;
                }
                Ok(AnalysisOutcome::Skipped { cost_usd }) => {
                    summary.analysis_skipped += 1;
                    summary.cost_usd += cost_usd;
                }
                Err(e) => self.record_failure(candidate.repository.id, e, summary),
            }
        }
        pb.finish_and_clear();
        Ok(())
    }

    async fn analyze_candidate(
        &self,
        requester: &AnalysisRequester,
        candidate: &RankedRepository,
        fresh_after: Option<DateTime<Utc>>,
    ) -> Result<AnalysisOutcome, ScanError> {
        let repo = &candidate.repository;
        let readme = self.source.get_readme(&repo.full_name).await;
        self.sync_quota();
        let readme = readme?.unwrap_or_default();

        let model = requester.select_model(Some(&candidate.assignment));
        let mut analysis = requester.analyze(repo, &readme, model).await?;
        let previous = self.db.get_latest_analysis(repo.id).await?;

        let Some(id) = self.db.insert_analysis(&analysis, fresh_after).await? else {
            debug!(repo_id = repo.id, "Fresh analysis already present, discarded");
            return Ok(AnalysisOutcome::Skipped {
                cost_usd: analysis.cost_usd,
            });
        };
        analysis.id = Some(id);

        info!(
            repo_id = repo.id,
            model = %analysis.model,
            score = analysis.overall_score,
            recommendation = %analysis.recommendation,
            "Analysis recorded"
        );

        let alerts = evaluate_analysis(repo, previous.as_ref(), &analysis, &self.alert_thresholds);
        let alerts = self.store_alerts(&alerts, analysis.created_at).await;
        Ok(AnalysisOutcome::Stored {
            cost_usd: analysis.cost_usd,
            alerts,
        })
    }

    /// Analyze one repository on demand, ignoring the freshness window.
    pub async fn analyze_repository(&self, full_name: &str) -> Result<Analysis> {
        let Some(requester) = &self.requester else {
            anyhow::bail!("No LLM client configured. Set ANTHROPIC_API_KEY in your .env file.");
        };
        let repository = self
            .db
            .get_repository_by_name(full_name)
            .await?
            .with_context(|| format!("Unknown repository {full_name}. Run `repo-scout discover` first."))?;
        let assignment = self.db.get_tier_assignment(repository.id).await?;

        let decision = self
            .limiter
            .try_acquire_all(&[(ApiName::Claude, 1), (ApiName::GitHubRest, 1)]);
        if !decision.allowed {
            return Err(ScanError::RateLimitExceeded {
                api: ApiName::Claude,
                retry_after_ms: decision.retry_after_ms.unwrap_or_default(),
            }
            .into());
        }

        let readme = self.source.get_readme(&repository.full_name).await;
        self.sync_quota();
        let readme = readme
            .map_err(|e| self.absorb_error(repository.id, e))?
            .unwrap_or_default();

        let model = requester.select_model(assignment.as_ref());
        let mut analysis = requester
            .analyze(&repository, &readme, model)
            .await
            .map_err(|e| self.absorb_error(repository.id, e))?;

        let previous = self.db.get_latest_analysis(repository.id).await?;
        analysis.id = self.db.insert_analysis(&analysis, None).await?;

        let alerts = evaluate_analysis(
            &repository,
            previous.as_ref(),
            &analysis,
            &self.alert_thresholds,
        );
        self.store_alerts(&alerts, analysis.created_at).await;
        Ok(analysis)
    }

    /// Lower the local GitHub budget to what the last response reported.
    fn sync_quota(&self) {
        if let Some(quota) = self.source.quota() {
            let reset_in = (quota.reset_at - Utc::now()).to_std().unwrap_or_default();
            self.limiter.reconcile(quota.api, quota.remaining, reset_in);
        }
    }

    /// Persist alerts. A failed insert is logged and does not fail the unit.
    async fn store_alerts(&self, alerts: &[NewAlert], at: DateTime<Utc>) -> u32 {
        let mut stored = 0;
        for alert in alerts {
            match self.db.insert_alert(alert, at).await {
                Ok(_) => {
                    info!(
                        repo_id = alert.repo_id,
                        alert_type = %alert.alert_type,
                        level = %alert.level,
                        "{}",
                        alert.message
                    );
                    stored += 1;
                }
                Err(e) => warn!(repo_id = alert.repo_id, error = %e, "Failed to store alert"),
            }
        }
        stored
    }

    fn record_failure(&self, repo_id: i64, error: ScanError, summary: &mut RunSummary) {
        let error = self.absorb_error(repo_id, error);
        if let ScanError::RateLimitExceeded { api, .. } = &error {
            summary.rate_limited += 1;
            warn!(repo_id, kind = error.kind(), api = %api, "Upstream rate limit, skipping");
            return;
        }

        summary.failed += 1;
        warn!(repo_id, kind = error.kind(), error = %error, "Repository failed, skipping");
    }

    /// Side effects shared by every failed unit: an upstream rate limit empties
    /// the local window until the upstream reset, and a rejected model reply
    /// is logged raw.
    fn absorb_error(&self, repo_id: i64, error: ScanError) -> ScanError {
        match &error {
            ScanError::RateLimitExceeded {
                api,
                retry_after_ms,
            } => {
                self.limiter
                    .reconcile(*api, 0, Duration::from_millis(*retry_after_ms));
            }
            ScanError::ModelResponse { raw, .. } => {
                debug!(repo_id, raw = %truncate_chars(raw, RAW_LOG_CHARS), "Rejected model output");
            }
            _ => {}
        }
        error
    }

    async fn persist_summary(&self, summary: &RunSummary) -> Result<()> {
        let json = serde_json::to_string(summary).context("Failed to serialize run summary")?;
        self.db.set_scan_state(LAST_RUN_SUMMARY, &json).await?;
        self.db
            .set_scan_state(LAST_RUN_AT, &Utc::now().to_rfc3339())
            .await?;
        Ok(())
    }
}

/// The summary of the last completed run, if any.
pub async fn last_run_summary(db: &dyn Database) -> Result<Option<RunSummary>> {
    match db.get_scan_state(LAST_RUN_SUMMARY).await? {
        Some(json) => Ok(Some(
            serde_json::from_str(&json).context("Corrupt last_run_summary in scan_state")?,
        )),
        None => Ok(None),
    }
}
