// Alert evaluation — threshold crossings observed during a scan cycle.
//
// Alerts fire on *crossings*, not on levels: a repository that has been
// growing fast for a month raises one growth alert, not one per scan.

use serde_json::json;

use crate::config::AlertThresholds;
use crate::db::models::{
    AlertLevel, Analysis, NewAlert, Recommendation, Repository, Tier, TierAssignment,
};

pub const GROWTH_SPIKE: &str = "growth_spike";
pub const TIER_PROMOTION: &str = "tier_promotion";
pub const SCORE_THRESHOLD: &str = "score_threshold";
pub const STRONG_BUY: &str = "strong_buy";

/// Alerts raised by a metrics refresh: growth crossing and tier promotion.
pub fn evaluate_metrics(
    repo: &Repository,
    previous: Option<&TierAssignment>,
    current: &TierAssignment,
    thresholds: &AlertThresholds,
) -> Vec<NewAlert> {
    let mut alerts = Vec::new();

    let was_below = previous.is_none_or(|p| p.growth_velocity < thresholds.growth_velocity);
    if was_below && current.growth_velocity >= thresholds.growth_velocity {
        alerts.push(NewAlert {
            repo_id: Some(repo.id),
            alert_type: GROWTH_SPIKE.to_string(),
            level: AlertLevel::Warning,
            message: format!(
                "{} is gaining {:.0} stars/day ({} total)",
                repo.full_name, current.growth_velocity, repo.stars
            ),
            metadata: Some(json!({
                "growth_velocity": current.growth_velocity,
                "previous_growth_velocity": previous.map(|p| p.growth_velocity),
                "stars": repo.stars,
            })),
        });
    }

    if let Some(prev) = previous {
        if current.tier < prev.tier {
            let level = if current.tier == Tier::Hot {
                AlertLevel::Critical
            } else {
                AlertLevel::Info
            };
            alerts.push(NewAlert {
                repo_id: Some(repo.id),
                alert_type: TIER_PROMOTION.to_string(),
                level,
                message: format!(
                    "{} promoted from {} to {}",
                    repo.full_name, prev.tier, current.tier
                ),
                metadata: Some(json!({
                    "from": prev.tier.number(),
                    "to": current.tier.number(),
                })),
            });
        }
    }

    alerts
}

/// Alerts raised by a new analysis: score crossing and strong-buy.
pub fn evaluate_analysis(
    repo: &Repository,
    previous: Option<&Analysis>,
    current: &Analysis,
    thresholds: &AlertThresholds,
) -> Vec<NewAlert> {
    let mut alerts = Vec::new();

    let was_below = previous.is_none_or(|p| p.overall_score < thresholds.min_score);
    if was_below && current.overall_score >= thresholds.min_score {
        alerts.push(NewAlert {
            repo_id: Some(repo.id),
            alert_type: SCORE_THRESHOLD.to_string(),
            level: AlertLevel::Warning,
            message: format!(
                "{} scored {:.0}/100 ({})",
                repo.full_name, current.overall_score, current.recommendation
            ),
            metadata: Some(json!({
                "overall_score": current.overall_score,
                "previous_score": previous.map(|p| p.overall_score),
                "model": current.model,
            })),
        });
    }

    let was_strong_buy =
        previous.is_some_and(|p| p.recommendation == Recommendation::StrongBuy);
    if current.recommendation == Recommendation::StrongBuy && !was_strong_buy {
        alerts.push(NewAlert {
            repo_id: Some(repo.id),
            alert_type: STRONG_BUY.to_string(),
            level: AlertLevel::Critical,
            message: format!("{} rated strong-buy: {}", repo.full_name, current.summary),
            metadata: Some(json!({ "overall_score": current.overall_score })),
        });
    }

    alerts
}
