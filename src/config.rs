use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::rate_limit::{ApiName, BucketConfig};
use crate::scoring::tier::{ClassifierWeights, Tier, TierThresholds};

/// Default topics searched during discovery and counted by the engagement score.
pub const DEFAULT_TOPICS: &[&str] = &[
    "machine-learning",
    "deep-learning",
    "artificial-intelligence",
    "llm",
    "large-language-models",
    "generative-ai",
    "transformers",
    "rag",
    "ai-agents",
    "computer-vision",
    "nlp",
];

/// Per-invocation scan settings: time budget, quotas, and cadences.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Total wall-clock budget for one invocation.
    pub total_budget: Duration,
    /// Reserved at the end of every phase and never spent.
    pub safety_buffer: Duration,
    /// Fraction of the total budget that ends the metrics-refresh phase.
    pub metrics_share: f64,
    /// Never-scanned repositories picked up per invocation.
    pub new_repo_quota: u32,
    /// Per-tier quotas, indexed by tier (1, 2, 3).
    pub tier_quotas: [u32; 3],
    /// Per-tier rescan intervals, indexed by tier (1, 2, 3).
    pub tier_intervals: [Duration; 3],
    /// An analysis newer than this counts as fresh.
    pub analysis_freshness: Duration,
    /// Only tiers at or above this priority (numerically <=) get analyzed.
    pub analysis_max_tier: Tier,
    /// Cap on analyses per invocation.
    pub analysis_batch_limit: u32,
    /// Run topic discovery at the start of each invocation.
    pub discover_on_scan: bool,
    /// Search pages (100 results each) per topic.
    pub discovery_pages: u32,
    pub discovery_min_stars: u32,
}

impl ScanSettings {
    pub fn quota(&self, tier: Tier) -> u32 {
        self.tier_quotas[tier.index()]
    }

    pub fn interval(&self, tier: Tier) -> Duration {
        self.tier_intervals[tier.index()]
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            total_budget: Duration::from_secs(300),
            safety_buffer: Duration::from_secs(10),
            metrics_share: 0.6,
            new_repo_quota: 50,
            tier_quotas: [50, 100, 100],
            tier_intervals: [
                Duration::from_secs(6 * 3600),
                Duration::from_secs(24 * 3600),
                Duration::from_secs(168 * 3600),
            ],
            analysis_freshness: Duration::from_secs(7 * 86_400),
            analysis_max_tier: Tier::Rising,
            analysis_batch_limit: 20,
            discover_on_scan: true,
            discovery_pages: 1,
            discovery_min_stars: 100,
        }
    }
}

/// Calls allowed per minute for each external API.
#[derive(Debug, Clone)]
pub struct RateLimits {
    pub github_rest_per_minute: u32,
    pub github_search_per_minute: u32,
    pub claude_per_minute: u32,
}

impl RateLimits {
    pub fn buckets(&self) -> Vec<(ApiName, BucketConfig)> {
        vec![
            (
                ApiName::GitHubRest,
                BucketConfig::per_minute(self.github_rest_per_minute),
            ),
            (
                ApiName::GitHubSearch,
                BucketConfig::per_minute(self.github_search_per_minute),
            ),
            (
                ApiName::Claude,
                BucketConfig::per_minute(self.claude_per_minute),
            ),
        ]
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            github_rest_per_minute: 30,
            github_search_per_minute: 10,
            claude_per_minute: 5,
        }
    }
}

/// A model id and its per-million-token prices in USD.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub id: String,
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

/// The three model tiers the analysis requester chooses between.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    pub premium: ModelSpec,
    pub standard: ModelSpec,
    pub economy: ModelSpec,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            premium: ModelSpec {
                id: "claude-opus-4-1-20250805".to_string(),
                input_per_mtok: 15.0,
                output_per_mtok: 75.0,
            },
            standard: ModelSpec {
                id: "claude-sonnet-4-20250514".to_string(),
                input_per_mtok: 3.0,
                output_per_mtok: 15.0,
            },
            economy: ModelSpec {
                id: "claude-3-5-haiku-20241022".to_string(),
                input_per_mtok: 0.8,
                output_per_mtok: 4.0,
            },
        }
    }
}

/// Thresholds for picking a model from a repository's tier assignment.
#[derive(Debug, Clone)]
pub struct ModelSelection {
    pub premium_min_priority: f64,
    pub standard_min_priority: f64,
    /// Growth (stars/day) that escalates straight to the premium model.
    pub escalation_growth: f64,
    pub max_tokens: u32,
    pub readme_max_chars: usize,
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            premium_min_priority: 200.0,
            standard_min_priority: 100.0,
            escalation_growth: 250.0,
            max_tokens: 2000,
            readme_max_chars: 8000,
        }
    }
}

/// Crossing points that raise alerts during a scan cycle.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    /// Stars/day.
    pub growth_velocity: f64,
    /// Overall analysis score (0-100).
    pub min_score: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            growth_velocity: 100.0,
            min_score: 80.0,
        }
    }
}

/// Central configuration loaded from environment variables.
///
/// Secrets come from env vars only. The .env file is loaded at startup via
/// dotenvy. Every threshold has a default and can be retuned without a
/// rebuild.
#[derive(Clone)]
pub struct Config {
    pub github_token: String,
    pub anthropic_api_key: String,
    pub github_api_url: String,
    pub anthropic_api_url: String,
    pub db_path: String,
    pub http_timeout: Duration,
    pub topics: Vec<String>,
    pub thresholds: TierThresholds,
    pub weights: ClassifierWeights,
    pub scan: ScanSettings,
    pub rate_limits: RateLimits,
    pub models: ModelCatalog,
    pub model_selection: ModelSelection,
    pub alerts: AlertThresholds,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Tokens are optional at load time; commands that talk to GitHub or
    /// Claude call `require_github` / `require_anthropic` first.
    pub fn load() -> Result<Self> {
        let topics = match env::var("SCOUT_TOPICS") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            _ => DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
        };

        let thresholds = {
            let d = TierThresholds::default();
            TierThresholds {
                high_stars: env_or("SCOUT_TIER1_MIN_STARS", d.high_stars)?,
                high_growth: env_or("SCOUT_TIER1_MIN_GROWTH", d.high_growth)?,
                mid_stars: env_or("SCOUT_TIER2_MIN_STARS", d.mid_stars)?,
                moderate_growth: env_or("SCOUT_TIER2_MIN_GROWTH", d.moderate_growth)?,
            }
        };

        let weights = {
            let d = ClassifierWeights::default();
            ClassifierWeights {
                growth: env_or("SCOUT_PRIORITY_GROWTH_WEIGHT", d.growth)?,
                engagement: env_or("SCOUT_PRIORITY_ENGAGEMENT_WEIGHT", d.engagement)?,
                stars_log: env_or("SCOUT_PRIORITY_STARS_WEIGHT", d.stars_log)?,
                ..d
            }
        };

        let scan = {
            let d = ScanSettings::default();
            let max_tier: u8 = env_or("SCOUT_ANALYSIS_MAX_TIER", d.analysis_max_tier.number())?;
            ScanSettings {
                total_budget: secs_or("SCOUT_BUDGET_SECS", d.total_budget)?,
                safety_buffer: secs_or("SCOUT_SAFETY_BUFFER_SECS", d.safety_buffer)?,
                metrics_share: env_or("SCOUT_METRICS_SHARE", d.metrics_share)?.clamp(0.0, 1.0),
                new_repo_quota: env_or("SCOUT_NEW_REPO_QUOTA", d.new_repo_quota)?,
                tier_quotas: [
                    env_or("SCOUT_TIER1_QUOTA", d.tier_quotas[0])?,
                    env_or("SCOUT_TIER2_QUOTA", d.tier_quotas[1])?,
                    env_or("SCOUT_TIER3_QUOTA", d.tier_quotas[2])?,
                ],
                tier_intervals: [
                    hours_or("SCOUT_TIER1_INTERVAL_HOURS", d.tier_intervals[0])?,
                    hours_or("SCOUT_TIER2_INTERVAL_HOURS", d.tier_intervals[1])?,
                    hours_or("SCOUT_TIER3_INTERVAL_HOURS", d.tier_intervals[2])?,
                ],
                analysis_freshness: Duration::from_secs(
                    env_or::<u64>("SCOUT_ANALYSIS_FRESHNESS_DAYS", 7)? * 86_400,
                ),
                analysis_max_tier: Tier::from_number(max_tier).with_context(|| {
                    format!("SCOUT_ANALYSIS_MAX_TIER must be 1, 2 or 3 (got {max_tier})")
                })?,
                analysis_batch_limit: env_or("SCOUT_ANALYSIS_BATCH_LIMIT", d.analysis_batch_limit)?,
                discover_on_scan: env_or("SCOUT_DISCOVER_ON_SCAN", d.discover_on_scan)?,
                discovery_pages: env_or("SCOUT_DISCOVERY_PAGES", d.discovery_pages)?,
                discovery_min_stars: env_or("SCOUT_DISCOVERY_MIN_STARS", d.discovery_min_stars)?,
            }
        };

        let rate_limits = {
            let d = RateLimits::default();
            RateLimits {
                github_rest_per_minute: env_or("SCOUT_GITHUB_REST_PER_MIN", d.github_rest_per_minute)?,
                github_search_per_minute: env_or(
                    "SCOUT_GITHUB_SEARCH_PER_MIN",
                    d.github_search_per_minute,
                )?,
                claude_per_minute: env_or("SCOUT_CLAUDE_PER_MIN", d.claude_per_minute)?,
            }
        };

        let models = {
            let d = ModelCatalog::default();
            ModelCatalog {
                premium: ModelSpec {
                    id: env::var("SCOUT_MODEL_PREMIUM").unwrap_or(d.premium.id),
                    ..d.premium
                },
                standard: ModelSpec {
                    id: env::var("SCOUT_MODEL_STANDARD").unwrap_or(d.standard.id),
                    ..d.standard
                },
                economy: ModelSpec {
                    id: env::var("SCOUT_MODEL_ECONOMY").unwrap_or(d.economy.id),
                    ..d.economy
                },
            }
        };

        let model_selection = {
            let d = ModelSelection::default();
            ModelSelection {
                premium_min_priority: env_or("SCOUT_PREMIUM_MIN_PRIORITY", d.premium_min_priority)?,
                standard_min_priority: env_or(
                    "SCOUT_STANDARD_MIN_PRIORITY",
                    d.standard_min_priority,
                )?,
                escalation_growth: env_or("SCOUT_ESCALATION_GROWTH", d.escalation_growth)?,
                max_tokens: env_or("SCOUT_MAX_TOKENS", d.max_tokens)?,
                readme_max_chars: env_or("SCOUT_README_MAX_CHARS", d.readme_max_chars)?,
            }
        };

        let alerts = {
            let d = AlertThresholds::default();
            AlertThresholds {
                growth_velocity: env_or("SCOUT_ALERT_GROWTH", d.growth_velocity)?,
                min_score: env_or("SCOUT_ALERT_MIN_SCORE", d.min_score)?,
            }
        };

        let defaults = Self::default();
        Ok(Self {
            github_token: env::var("GITHUB_TOKEN").unwrap_or_default(),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            github_api_url: env::var("GITHUB_API_URL").unwrap_or(defaults.github_api_url),
            anthropic_api_url: env::var("ANTHROPIC_API_URL").unwrap_or(defaults.anthropic_api_url),
            db_path: env::var("SCOUT_DB_PATH").unwrap_or(defaults.db_path),
            http_timeout: secs_or("SCOUT_HTTP_TIMEOUT_SECS", defaults.http_timeout)?,
            topics,
            thresholds,
            weights,
            scan,
            rate_limits,
            models,
            model_selection,
            alerts,
        })
    }

    /// Check that a GitHub token is configured.
    pub fn require_github(&self) -> Result<()> {
        if self.github_token.is_empty() {
            anyhow::bail!(
                "GITHUB_TOKEN not set. Add it to your .env file.\n\
                 Or export it in your shell."
            );
        }
        Ok(())
    }

    /// Check that the Anthropic API key is configured.
    pub fn require_anthropic(&self) -> Result<()> {
        if self.anthropic_api_key.is_empty() {
            anyhow::bail!(
                "ANTHROPIC_API_KEY not set. Add it to your .env file.\n\
                 Or export it in your shell."
            );
        }
        Ok(())
    }
}

impl Default for Config {
    /// Built-in defaults with no credentials. Used by tests and as the base
    /// that environment variables override.
    fn default() -> Self {
        Self {
            github_token: String::new(),
            anthropic_api_key: String::new(),
            github_api_url: crate::github::client::DEFAULT_GITHUB_API_URL.to_string(),
            anthropic_api_url: crate::llm::claude::DEFAULT_ANTHROPIC_API_URL.to_string(),
            db_path: "./repo-scout.db".to_string(),
            http_timeout: Duration::from_secs(20),
            topics: DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect(),
            thresholds: TierThresholds::default(),
            weights: ClassifierWeights::default(),
            scan: ScanSettings::default(),
            rate_limits: RateLimits::default(),
            models: ModelCatalog::default(),
            model_selection: ModelSelection::default(),
            alerts: AlertThresholds::default(),
        }
    }
}

/// Parse an env var, falling back to `default` when unset or blank.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {key}: {raw:?}")),
        _ => Ok(default),
    }
}

fn secs_or(key: &str, default: Duration) -> Result<Duration> {
    env_or(key, default.as_secs()).map(Duration::from_secs)
}

fn hours_or(key: &str, default: Duration) -> Result<Duration> {
    env_or(key, default.as_secs() / 3600).map(|h| Duration::from_secs(h * 3600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_settings_index_by_tier() {
        let s = ScanSettings::default();
        assert_eq!(s.quota(Tier::Hot), 50);
        assert_eq!(s.interval(Tier::Hot), Duration::from_secs(6 * 3600));
        assert_eq!(s.interval(Tier::LongTail), Duration::from_secs(168 * 3600));
    }

    #[test]
    fn test_env_or_rejects_garbage() {
        // Key is unique to this test so parallel tests don't race on it.
        env::set_var("SCOUT_TEST_ENV_OR_GARBAGE", "not-a-number");
        let result: Result<u32> = env_or("SCOUT_TEST_ENV_OR_GARBAGE", 5);
        assert!(result.is_err());
        env::remove_var("SCOUT_TEST_ENV_OR_GARBAGE");
    }

    #[test]
    fn test_env_or_default_when_unset() {
        let value: f64 = env_or("SCOUT_TEST_DEFINITELY_UNSET", 1.5).unwrap();
        assert!((value - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rate_limit_buckets_cover_all_apis() {
        let buckets = RateLimits::default().buckets();
        assert_eq!(buckets.len(), 3);
        assert!(buckets
            .iter()
            .any(|(api, cfg)| *api == ApiName::Claude && cfg.capacity == 5));
    }
}
