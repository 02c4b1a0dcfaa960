// Tier classification and scan priority.
//
// One classifier serves every scan depth, and every input it reads comes
// from the minimal fetch. Deeper scans add history to the snapshot (releases,
// pull requests, closed issues) but never change a repository's engagement
// or priority, so scores stay comparable across a tier change.
//
// Thresholds are passed in rather than hard-coded so they can be retuned from
// configuration without touching this module.

use chrono::{DateTime, Utc};

use crate::db::models::{MetricsSnapshot, RepoMetrics};

pub use crate::db::models::{ScanDepth, Tier};

/// Star and growth cut-offs for the tier decision.
#[derive(Debug, Clone, PartialEq)]
pub struct TierThresholds {
    /// Tier 1 needs at least this many stars...
    pub high_stars: i64,
    /// ...AND growth (stars/day) strictly above this.
    pub high_growth: f64,
    /// Tier 2 needs at least this many stars...
    pub mid_stars: i64,
    /// ...OR growth strictly above this.
    pub moderate_growth: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            high_stars: 5_000,
            high_growth: 100.0,
            mid_stars: 1_000,
            moderate_growth: 20.0,
        }
    }
}

/// Weights for the engagement score and the scan priority.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierWeights {
    /// Priority weight on growth velocity (stars/day).
    pub growth: f64,
    /// Priority weight on the 0-100 engagement score.
    pub engagement: f64,
    /// Priority weight on ln(stars + 1).
    pub stars_log: f64,
    /// Engagement component weights. Normalized by their sum.
    pub fork_ratio: f64,
    pub responsiveness: f64,
    pub topic_match: f64,
    /// Fork/star ratio that scores a full 100.
    pub fork_ratio_saturation: f64,
    /// Matching topics that score a full 100.
    pub topic_match_saturation: u32,
}

impl Default for ClassifierWeights {
    fn default() -> Self {
        Self {
            growth: 1.0,
            engagement: 0.5,
            stars_log: 10.0,
            fork_ratio: 0.4,
            responsiveness: 0.4,
            topic_match: 0.2,
            fork_ratio_saturation: 0.25,
            topic_match_saturation: 3,
        }
    }
}

/// Output of `TierClassifier::classify`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub tier: Tier,
    pub growth_velocity: f64,
    pub engagement_score: f64,
    pub scan_priority: f64,
}

/// Pushes within this many days count as fully responsive.
const RECENT_PUSH_DAYS: f64 = 7.0;
/// Pushes older than this count as unresponsive.
const STALE_PUSH_DAYS: f64 = 90.0;

pub struct TierClassifier {
    pub thresholds: TierThresholds,
    pub weights: ClassifierWeights,
    /// Lowercased topics that count toward the topic-match component.
    topics: Vec<String>,
}

impl TierClassifier {
    pub fn new(thresholds: TierThresholds, weights: ClassifierWeights, topics: &[String]) -> Self {
        Self {
            thresholds,
            weights,
            topics: topics.iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    /// Classify a repository from its current metrics and, if one exists,
    /// the snapshot from its previous scan.
    pub fn classify(
        &self,
        current: &RepoMetrics,
        previous: Option<&MetricsSnapshot>,
    ) -> Classification {
        let repo = &current.repository;
        let growth = growth_velocity(repo.stars, current.observed_at, previous);
        let engagement = self.engagement_score(current);
        let tier = decide_tier(repo.stars, growth, &self.thresholds);
        let priority = scan_priority(repo.stars, growth, engagement, &self.weights);

        Classification {
            tier,
            growth_velocity: growth,
            engagement_score: engagement,
            scan_priority: priority,
        }
    }

    /// Weighted combination of fork ratio, responsiveness (push recency), and
    /// topic match, each normalized to 0-100.
    pub fn engagement_score(&self, current: &RepoMetrics) -> f64 {
        let repo = &current.repository;
        let w = &self.weights;

        let fork_ratio = repo.forks.max(0) as f64 / repo.stars.max(1) as f64;
        let fork_component = saturate(fork_ratio, w.fork_ratio_saturation);

        let responsiveness = push_recency(repo.pushed_at, current.observed_at);

        let matches = repo
            .topics
            .iter()
            .filter(|t| self.topics.iter().any(|c| c.eq_ignore_ascii_case(t)))
            .count();
        let topic_component = saturate(matches as f64, w.topic_match_saturation as f64);

        let total_weight = w.fork_ratio + w.responsiveness + w.topic_match;
        if total_weight <= 0.0 {
            return 0.0;
        }

        let score = (w.fork_ratio * fork_component
            + w.responsiveness * responsiveness
            + w.topic_match * topic_component)
            / total_weight;

        finite_or_zero(score).clamp(0.0, 100.0)
    }
}

/// Star delta per elapsed day. Zero when there is nothing to compare against.
pub fn growth_velocity(
    current_stars: i64,
    observed_at: DateTime<Utc>,
    previous: Option<&MetricsSnapshot>,
) -> f64 {
    let Some(prev) = previous else {
        return 0.0;
    };

    let elapsed_days = (observed_at - prev.recorded_at).num_milliseconds() as f64 / 86_400_000.0;
    if elapsed_days <= 0.0 {
        return 0.0;
    }

    finite_or_zero((current_stars - prev.stars) as f64 / elapsed_days)
}

/// First match wins, evaluated from Tier 1 down.
pub fn decide_tier(stars: i64, growth_velocity: f64, thresholds: &TierThresholds) -> Tier {
    if stars >= thresholds.high_stars && growth_velocity > thresholds.high_growth {
        Tier::Hot
    } else if stars >= thresholds.mid_stars || growth_velocity > thresholds.moderate_growth {
        Tier::Rising
    } else {
        Tier::LongTail
    }
}

/// Orders work within a tier. Never changes the tier itself.
pub fn scan_priority(
    stars: i64,
    growth_velocity: f64,
    engagement_score: f64,
    weights: &ClassifierWeights,
) -> f64 {
    let stars_term = ((stars.max(0) as f64) + 1.0).ln();
    finite_or_zero(
        weights.growth * finite_or_zero(growth_velocity)
            + weights.engagement * finite_or_zero(engagement_score)
            + weights.stars_log * stars_term,
    )
}

/// 100 for a push in the last week, falling linearly to 0 at 90 days.
fn push_recency(pushed_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(pushed) = pushed_at else {
        return 0.0;
    };
    let days = (now - pushed).num_seconds().max(0) as f64 / 86_400.0;
    if days <= RECENT_PUSH_DAYS {
        100.0
    } else if days >= STALE_PUSH_DAYS {
        0.0
    } else {
        100.0 * (STALE_PUSH_DAYS - days) / (STALE_PUSH_DAYS - RECENT_PUSH_DAYS)
    }
}

/// Map `value` onto 0-100, reaching 100 at `saturation`.
fn saturate(value: f64, saturation: f64) -> f64 {
    if saturation <= 0.0 {
        return 0.0;
    }
    (finite_or_zero(value) / saturation).clamp(0.0, 1.0) * 100.0
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}
