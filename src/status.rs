// System status display — shows DB stats, tier counts, spend, and the last run.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::db::Database;
use crate::pipeline::orchestrator::{last_run_summary, LAST_RUN_AT};

/// Display system status to the terminal.
pub async fn show(db: &Arc<dyn Database>, db_display_path: &str) -> Result<()> {
    if !Path::new(db_display_path).exists() {
        println!("Database: not initialized");
        println!("\nRun `repo-scout init` to set up the database.");
        return Ok(());
    }

    let file_size = std::fs::metadata(db_display_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Database: {} ({})", db_display_path, file_size);

    let total = db.repository_count().await?;
    let counts = db.tier_counts().await?;
    println!("Repositories: {} tracked", total);
    println!(
        "  Tier 1: {}  Tier 2: {}  Tier 3: {}  Unscanned: {}",
        counts.hot, counts.rising, counts.long_tail, counts.unscanned
    );
    if total == 0 {
        println!("  Run `repo-scout discover` to find repositories");
    }

    let analyses = db.analysis_count().await?;
    let cost = db.total_analysis_cost().await?;
    println!("Analyses: {} (total spend ${:.2})", analyses, cost);

    let unacked = db.list_alerts(true, 1000).await?.len();
    if unacked > 0 {
        println!("Alerts: {} unacknowledged", unacked);
    }

    match db.get_scan_state(LAST_RUN_AT).await? {
        Some(at) => {
            println!("Last scan: {}", at);
            if let Some(summary) = last_run_summary(db.as_ref()).await? {
                println!(
                    "  {} scanned, {} analyzed, {} rate limited, {} failed",
                    summary.scanned, summary.analyzed, summary.rate_limited, summary.failed
                );
            }
        }
        None => {
            println!("Last scan: never");
            println!("  Run `repo-scout scan` to refresh metrics");
        }
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
