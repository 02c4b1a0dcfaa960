// Topic discovery — finds candidate repositories through GitHub search.
//
// Each configured topic becomes one query, paged up to `pages` deep. Every
// page costs one Search token; once the Search budget is denied, discovery
// stops for the rest of the invocation since later topics would be denied
// too.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use super::budget::{Phase, TimeBudget};
use crate::db::Database;
use crate::error::ScanError;
use crate::github::traits::RepoSource;
use crate::rate_limit::{ApiName, RateLimiter};

/// Results per search page (GitHub's maximum).
const PER_PAGE: u32 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    /// Repositories inserted for the first time.
    pub new_repositories: u32,
    /// Search results seen, including ones already known.
    pub seen: u32,
    pub pages: u32,
    /// Topics finished, including ones whose search failed.
    pub topics_done: u32,
    /// Discovery stopped on a Search budget denial.
    pub rate_limited: bool,
}

/// The search query for one topic.
pub fn topic_query(topic: &str, min_stars: u32) -> String {
    format!("topic:{topic} stars:>={min_stars} archived:false")
}

pub struct Discovery<'a> {
    pub source: &'a dyn RepoSource,
    pub db: &'a dyn Database,
    pub limiter: &'a RateLimiter,
    pub show_progress: bool,
}

impl Discovery<'_> {
    /// Search every topic and upsert what comes back.
    pub async fn run(
        &self,
        topics: &[String],
        pages: u32,
        min_stars: u32,
        budget: Option<&TimeBudget>,
    ) -> Result<DiscoveryOutcome> {
        let mut outcome = DiscoveryOutcome::default();

        let pb = if self.show_progress {
            ProgressBar::new(topics.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  Discovery [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        'topics: for topic in topics {
            pb.set_message(topic.clone());
            let query = topic_query(topic, min_stars);

            for page in 1..=pages.max(1) {
                if budget.is_some_and(|b| !b.can_continue(Phase::Metrics)) {
                    debug!("Time budget reached during discovery");
                    break 'topics;
                }

                let decision = self.limiter.try_acquire(ApiName::GitHubSearch);
                if !decision.allowed {
                    info!(
                        topic = %topic,
                        retry_after_ms = decision.retry_after_ms.unwrap_or_default(),
                        "Search budget exhausted, stopping discovery"
                    );
                    outcome.rate_limited = true;
                    break 'topics;
                }

                let search = self.source.search_repositories(&query, page, PER_PAGE);
                let searched = match budget {
                    Some(b) => match tokio::time::timeout(b.remaining(Phase::Metrics), search).await {
                        Ok(searched) => searched,
                        Err(_) => {
                            debug!(topic = %topic, "Time budget reached mid-search");
                            break 'topics;
                        }
                    },
                    None => search.await,
                };

                let result = match searched {
                    Ok(result) => result,
                    Err(ScanError::RateLimitExceeded {
                        api,
                        retry_after_ms,
                    }) => {
                        self.limiter
                            .reconcile(api, 0, Duration::from_millis(retry_after_ms));
                        outcome.rate_limited = true;
                        warn!(topic = %topic, "GitHub search rate limited, stopping discovery");
                        break 'topics;
                    }
                    Err(e) => {
                        warn!(topic = %topic, kind = e.kind(), error = %e, "Search failed, skipping topic");
                        outcome.topics_done += 1;
                        pb.inc(1);
                        continue 'topics;
                    }
                };
                outcome.pages += 1;

                let count = result.items.len() as u32;
                let now = Utc::now();
                for item in result.items {
                    outcome.seen += 1;
                    let repo = item.into_repository(now);
                    match self.db.upsert_repository(&repo).await {
                        Ok(true) => outcome.new_repositories += 1,
                        Ok(false) => {}
                        Err(e) => warn!(
                            repo_id = repo.id,
                            kind = "persistence",
                            error = %e,
                            "Failed to store discovered repository"
                        ),
                    }
                }

                if count < PER_PAGE {
                    break;
                }
            }
            outcome.topics_done += 1;
            pb.inc(1);
        }
        pb.finish_and_clear();

        info!(
            new = outcome.new_repositories,
            seen = outcome.seen,
            pages = outcome.pages,
            "Discovery finished"
        );
        Ok(outcome)
    }
}
