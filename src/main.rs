use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use repo_scout::config::Config;
use repo_scout::db::models::{RankedRepository, Tier};
use repo_scout::db::Database;
use repo_scout::github::client::GitHubClient;
use repo_scout::llm::claude::ClaudeClient;
use repo_scout::llm::traits::LlmClient;
use repo_scout::output::terminal;
use repo_scout::pipeline::{ScanOrchestrator, ScanTrigger, TimeBudget};
use repo_scout::rate_limit::RateLimiter;

/// repo-scout: Tiered GitHub scanning and AI investment scoring.
///
/// Finds fast-growing AI/ML repositories, refreshes their metrics on a
/// tier-dependent cadence, and asks Claude for a structured assessment.
#[derive(Parser)]
#[command(name = "repo-scout", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Search GitHub topics for new repositories
    Discover,

    /// Run one time-budgeted scan (metrics refresh, then analysis)
    Scan {
        /// Skip the analysis phase even if an Anthropic key is set
        #[arg(long)]
        no_analyze: bool,
    },

    /// Run scans on a timer until interrupted
    Watch {
        /// Minutes between scan starts (default: 60)
        #[arg(long, default_value = "60")]
        interval_minutes: u64,
    },

    /// Analyze one repository now, ignoring the freshness window
    Analyze {
        /// The repository (e.g. huggingface/transformers)
        repo: String,
    },

    /// Show a repository's tier, metrics, and analyses
    Show {
        /// The repository (e.g. huggingface/transformers)
        repo: String,
    },

    /// List repositories by tier
    Report {
        /// Only show this tier (1-3)
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=3))]
        tier: Option<u8>,

        /// Max repositories per tier (default: 25)
        #[arg(long, default_value = "25")]
        limit: u32,
    },

    /// List the fastest-growing repositories
    Trending {
        /// Max repositories (default: 20)
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// List alerts
    Alerts {
        /// Include acknowledged alerts
        #[arg(long)]
        all: bool,

        /// Max alerts (default: 50)
        #[arg(long, default_value = "50")]
        limit: u32,
    },

    /// Acknowledge an alert
    Ack {
        /// The alert id shown by `repo-scout alerts`
        id: i64,
    },

    /// Repair tier assignments (orphans and missing rows)
    Reconcile,

    /// Show system status (tier counts, spend, last scan)
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("repo_scout=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            info!("Initializing repo-scout database...");
            let config = Config::load()?;
            let db = repo_scout::db::initialize_sqlite(&config.db_path)?;
            let table_count = db.table_count().await?;
            println!("Database initialized at: {}", config.db_path);
            println!("Tables created: {table_count}");
            println!("\nrepo-scout is ready. Next step: set up your .env file");
            println!("  (GITHUB_TOKEN and ANTHROPIC_API_KEY)");
            println!("\nThen run: repo-scout discover");
        }

        Commands::Discover => {
            let config = Config::load()?;
            config.require_github()?;
            let db = repo_scout::db::initialize_sqlite(&config.db_path)?;
            let orchestrator = build_orchestrator(&config, db, false)?.with_progress_bars(true);

            println!("Searching {} topics...", config.topics.len());
            let outcome = orchestrator.discover(None).await?;
            println!(
                "Discovered {} new repositories ({} results, {} pages)",
                outcome.new_repositories.to_string().bold(),
                outcome.seen,
                outcome.pages
            );
            if outcome.rate_limited {
                println!(
                    "{}",
                    "Search budget exhausted; remaining topics will be searched next run.".dimmed()
                );
            }
        }

        Commands::Scan { no_analyze } => {
            let config = Config::load()?;
            config.require_github()?;
            let db = repo_scout::db::initialize_sqlite(&config.db_path)?;
            let orchestrator =
                build_orchestrator(&config, db, !no_analyze)?.with_progress_bars(true);

            let budget = TimeBudget::from_settings(&config.scan);
            let summary = orchestrator.run(budget).await?;
            terminal::display_run_summary(&summary);
        }

        Commands::Watch { interval_minutes } => {
            let config = Config::load()?;
            config.require_github()?;
            let db = repo_scout::db::initialize_sqlite(&config.db_path)?;
            let trigger = ScanTrigger::new(build_orchestrator(&config, db, true)?);

            let every = Duration::from_secs(interval_minutes.max(1) * 60);
            println!(
                "Scanning every {interval_minutes} minutes. Press Ctrl-C to stop."
            );

            tokio::select! {
                _ = trigger.watch(every, |status| {
                    if let Some(err) = &status.last_error {
                        println!("{} {}", "Scan failed:".red(), err);
                    } else if let Some(summary) = &status.last_summary {
                        terminal::display_run_summary(summary);
                    }
                }) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, stopping scheduler");
                }
            }
        }

        Commands::Analyze { repo } => {
            let config = Config::load()?;
            config.require_github()?;
            config.require_anthropic()?;
            let db = repo_scout::db::open_sqlite(&config.db_path)?;
            let orchestrator = build_orchestrator(&config, db, true)?;

            println!("Analyzing {repo}...");
            let analysis = orchestrator.analyze_repository(&repo).await?;
            terminal::display_analysis(&analysis);
        }

        Commands::Show { repo } => {
            let config = Config::load()?;
            let db = repo_scout::db::open_sqlite(&config.db_path)?;

            let Some(repository) = db.get_repository_by_name(&repo).await? else {
                anyhow::bail!("Unknown repository {repo}. Run `repo-scout discover` first.");
            };
            let ranked = db
                .get_tier_assignment(repository.id)
                .await?
                .map(|assignment| RankedRepository {
                    repository: repository.clone(),
                    assignment,
                });
            if ranked.is_none() {
                println!("{} has not been scanned yet.", repository.full_name);
            }
            let latest = db.latest_snapshots(repository.id, 1).await?;
            let analyses = db.list_analyses(repository.id, 5).await?;
            terminal::display_repository(ranked.as_ref(), latest.first(), &analyses);
        }

        Commands::Report { tier, limit } => {
            let config = Config::load()?;
            let db = repo_scout::db::open_sqlite(&config.db_path)?;

            let tiers: Vec<Tier> = match tier.and_then(Tier::from_number) {
                Some(t) => vec![t],
                None => Tier::ALL.to_vec(),
            };
            for t in tiers {
                let repos = db.list_by_tier(t, limit).await?;
                terminal::display_ranked(&t.to_string(), &repos);
            }
        }

        Commands::Trending { limit } => {
            let config = Config::load()?;
            let db = repo_scout::db::open_sqlite(&config.db_path)?;
            let repos = db.get_trending(limit).await?;
            terminal::display_ranked("Trending", &repos);
        }

        Commands::Alerts { all, limit } => {
            let config = Config::load()?;
            let db = repo_scout::db::open_sqlite(&config.db_path)?;
            let alerts = db.list_alerts(!all, limit).await?;
            terminal::display_alerts(&alerts);
        }

        Commands::Ack { id } => {
            let config = Config::load()?;
            let db = repo_scout::db::open_sqlite(&config.db_path)?;
            if db.acknowledge_alert(id, Utc::now()).await? {
                println!("Alert #{id} acknowledged.");
            } else {
                println!("No unacknowledged alert #{id}.");
            }
        }

        Commands::Reconcile => {
            let config = Config::load()?;
            let db = repo_scout::db::open_sqlite(&config.db_path)?;
            let orchestrator = build_orchestrator(&config, db.clone(), false)?;
            let report = repo_scout::pipeline::reconcile::reconcile(
                db.as_ref(),
                orchestrator.classifier(),
                Utc::now(),
            )
            .await?;
            println!(
                "Removed {} orphaned tier rows, restored {} tier assignments.",
                report.orphans_removed, report.assignments_restored
            );
        }

        Commands::Status => {
            let config = Config::load()?;
            let db = match repo_scout::db::open_sqlite(&config.db_path) {
                Ok(db) => db,
                Err(_) => {
                    println!("Database: not initialized");
                    println!("\nRun `repo-scout init` to set up the database.");
                    return Ok(());
                }
            };
            repo_scout::status::show(&db, &config.db_path).await?;
        }
    }

    Ok(())
}

/// Wire the GitHub client, the Claude client (when wanted and configured),
/// and the shared rate limiter into an orchestrator.
fn build_orchestrator(
    config: &Config,
    db: Arc<dyn Database>,
    with_analysis: bool,
) -> Result<ScanOrchestrator> {
    let source = Arc::new(GitHubClient::new(
        &config.github_api_url,
        &config.github_token,
        config.http_timeout,
    )?);

    let llm: Option<Arc<dyn LlmClient>> = if !with_analysis {
        None
    } else if config.anthropic_api_key.is_empty() {
        warn!("ANTHROPIC_API_KEY not set, analysis phase disabled");
        None
    } else {
        Some(Arc::new(ClaudeClient::new(
            &config.anthropic_api_url,
            &config.anthropic_api_key,
            config.http_timeout,
        )?))
    };

    let limiter = Arc::new(RateLimiter::new(config.rate_limits.buckets()));
    Ok(ScanOrchestrator::new(config, db, source, llm, limiter))
}
