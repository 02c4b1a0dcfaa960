// Reconciliation — repairs tier assignments that drifted from the data.
//
// Two kinds of drift are fixed:
//   1. tier rows whose repository no longer exists (deleted)
//   2. scanned repositories (with snapshots) that lost their tier row
//      (re-classified from their stored snapshots)
//
// Runs at the start of every scan and from `repo-scout reconcile`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::db::models::{ReconcileReport, RepoMetrics, ScanDepth, TierAssignment};
use crate::db::Database;
use crate::scoring::tier::TierClassifier;

pub async fn reconcile(
    db: &dyn Database,
    classifier: &TierClassifier,
    now: DateTime<Utc>,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport {
        orphans_removed: db.delete_orphaned_tier_assignments().await?,
        ..Default::default()
    };

    for repo in db.repositories_missing_tier().await? {
        let repo_id = repo.id;
        let snapshots = db.latest_snapshots(repo_id, 2).await?;
        let Some(latest) = snapshots.first() else {
            continue;
        };

        let metrics = RepoMetrics::from_snapshot(repo, latest);
        let c = classifier.classify(&metrics, snapshots.get(1));
        let assignment = TierAssignment {
            repo_id,
            tier: c.tier,
            growth_velocity: c.growth_velocity,
            engagement_score: c.engagement_score,
            scan_priority: c.scan_priority,
            last_deep_scan_at: (latest.scan_depth == ScanDepth::Deep).then_some(latest.recorded_at),
            last_basic_scan_at: Some(latest.recorded_at),
            updated_at: now,
        };

        match db.upsert_tier_assignment(&assignment).await {
            Ok(()) => report.assignments_restored += 1,
            Err(e) => warn!(repo_id, error = %e, "Failed to restore tier assignment"),
        }
    }

    if report.orphans_removed > 0 || report.assignments_restored > 0 {
        info!(
            orphans_removed = report.orphans_removed,
            assignments_restored = report.assignments_restored,
            "Reconciled tier assignments"
        );
    }

    Ok(report)
}
