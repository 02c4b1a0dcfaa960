// Colored terminal output for tier reports, analyses, alerts, and run summaries.
//
// This module handles all terminal-specific formatting. The main.rs command
// handlers delegate here.

use colored::Colorize;

use super::{format_count, truncate_chars};
use crate::db::models::{
    Alert, AlertLevel, Analysis, MetricsSnapshot, RankedRepository, Recommendation, Tier,
};
use crate::pipeline::RunSummary;

/// Display a ranked repository list in the terminal.
pub fn display_ranked(title: &str, repos: &[RankedRepository]) {
    if repos.is_empty() {
        println!("No repositories scanned yet. Run `repo-scout scan` first.");
        return;
    }

    println!("\n{}", format!("=== {title} ({} repos) ===", repos.len()).bold());
    println!();

    println!(
        "  {:>4}  {:<40} {:>7}  {:<16} {:>9}  {:>8}",
        "Rank".dimmed(),
        "Repository".dimmed(),
        "Stars".dimmed(),
        "Tier".dimmed(),
        "Stars/day".dimmed(),
        "Priority".dimmed(),
    );
    println!("  {}", "-".repeat(92).dimmed());

    for (i, ranked) in repos.iter().enumerate() {
        let repo = &ranked.repository;
        let a = &ranked.assignment;
        println!(
            "  {:>4}. {:<40} {:>7}  {:<16} {:>9.1}  {:>8.1}",
            i + 1,
            truncate_chars(&repo.full_name, 37),
            format_count(repo.stars),
            colorize_tier(a.tier),
            a.growth_velocity,
            a.scan_priority,
        );
    }
    println!();
}

/// Display one repository's tier assignment and latest analyses.
pub fn display_repository(
    ranked: Option<&RankedRepository>,
    latest: Option<&MetricsSnapshot>,
    analyses: &[Analysis],
) {
    if let Some(ranked) = ranked {
        let repo = &ranked.repository;
        let a = &ranked.assignment;
        println!("\n{}", format!("=== {} ===", repo.full_name).bold());
        if let Some(desc) = &repo.description {
            println!("  {}", truncate_chars(desc, 200).dimmed());
        }
        println!("  {}", repo.html_url);
        println!(
            "  Stars: {}  Forks: {}  Open issues: {}  Language: {}",
            format_count(repo.stars),
            format_count(repo.forks),
            repo.open_issues,
            repo.language.as_deref().unwrap_or("?")
        );
        println!("  Tier: {}", colorize_tier(a.tier));
        println!(
            "  Growth: {:.1} stars/day  Engagement: {:.1}  Priority: {:.1}",
            a.growth_velocity, a.engagement_score, a.scan_priority
        );
        if let Some(at) = a.last_basic_scan_at {
            println!("  Last scanned: {}", at.format("%Y-%m-%d %H:%M UTC"));
        }
    }

    if let Some(snap) = latest {
        let mut activity = Vec::new();
        if let Some(commits) = snap.commits_recent {
            activity.push(format!("{commits} commits (4w)"));
        }
        if let Some(releases) = snap.releases_count {
            let last = snap
                .latest_release_at
                .map(|at| format!(", last {}", at.format("%Y-%m-%d")))
                .unwrap_or_default();
            activity.push(format!("{releases} releases{last}"));
        }
        if let (Some(open), Some(merged)) = (snap.open_prs, snap.merged_prs) {
            activity.push(format!("{open} open / {merged} merged PRs"));
        }
        if let Some(closed) = snap.closed_issues {
            activity.push(format!("{closed} closed issues"));
        }
        if !activity.is_empty() {
            println!(
                "  Activity ({} scan): {}",
                snap.scan_depth,
                activity.join("  ")
            );
        }
    }

    match analyses.first() {
        Some(latest) => display_analysis(latest),
        None => println!("\n  No analysis yet."),
    }

    if analyses.len() > 1 {
        println!("\n  {}", "History:".dimmed());
        for a in &analyses[1..] {
            println!(
                "    {}  {:>5.1}  {:<10}  {}",
                a.created_at.format("%Y-%m-%d"),
                a.overall_score,
                colorize_recommendation(a.recommendation),
                a.model.dimmed()
            );
        }
    }
}

/// Display a single analysis in full.
pub fn display_analysis(analysis: &Analysis) {
    println!(
        "\n  {} {:.1}/100  {}",
        "Analysis:".bold(),
        analysis.overall_score,
        colorize_recommendation(analysis.recommendation)
    );
    println!(
        "  {}",
        format!(
            "{} · {} tokens · ${:.4} · {}",
            analysis.model,
            analysis.tokens_used(),
            analysis.cost_usd,
            analysis.created_at.format("%Y-%m-%d %H:%M UTC")
        )
        .dimmed()
    );
    println!("\n  {}", analysis.summary);

    println!();
    for (name, score) in &analysis.scores {
        println!("    {:<24} {:>5.1}", name, score);
    }

    print_list("Strengths", &analysis.strengths);
    print_list("Risks", &analysis.risks);
    print_list("Open questions", &analysis.questions);

    if let Some(thesis) = &analysis.investment_thesis {
        println!("\n  Thesis: {thesis}");
    }
    if let Some(growth) = &analysis.growth_prediction {
        println!("  Growth outlook: {growth}");
    }
    if let Some(comp) = &analysis.competitive_analysis {
        println!("  Competition: {comp}");
    }
}

fn print_list(label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("\n  {label}:");
    for item in items {
        println!("    - {item}");
    }
}

/// Display alerts, newest first.
pub fn display_alerts(alerts: &[Alert]) {
    if alerts.is_empty() {
        println!("No alerts.");
        return;
    }

    println!("\n{}", format!("=== Alerts ({}) ===", alerts.len()).bold());
    println!();
    for alert in alerts {
        let ack = if alert.acknowledged {
            "acked".dimmed().to_string()
        } else {
            String::new()
        };
        println!(
            "  #{:<5} {:<8} {:<16} {}  {}",
            alert.id,
            colorize_level(alert.level),
            alert.alert_type,
            alert.message,
            ack
        );
        println!(
            "         {}",
            alert.created_at.format("%Y-%m-%d %H:%M UTC").to_string().dimmed()
        );
    }
    println!();
}

/// Display what a scan run did.
pub fn display_run_summary(summary: &RunSummary) {
    println!("\n{}", "=== Scan complete ===".bold());
    if summary.discovered > 0 {
        println!("  Discovered: {} new repositories", summary.discovered);
    }
    if summary.reconciled.orphans_removed > 0 || summary.reconciled.assignments_restored > 0 {
        println!(
            "  Reconciled: {} orphans removed, {} tiers restored",
            summary.reconciled.orphans_removed, summary.reconciled.assignments_restored
        );
    }
    println!(
        "  Scanned: {} ({} new)",
        summary.scanned, summary.new_scanned
    );
    println!(
        "  Analyzed: {} (${:.4})",
        summary.analyzed, summary.cost_usd
    );
    if summary.analysis_skipped > 0 {
        println!("  Skipped (already fresh): {}", summary.analysis_skipped);
    }
    if summary.rate_limited > 0 {
        println!("  {} {} rate limited", "~".yellow(), summary.rate_limited);
    }
    if summary.failed > 0 {
        println!("  {} {} failed (see logs)", "!".bright_red(), summary.failed);
    }
    if summary.alerts > 0 {
        println!("  {} {} new alerts", "!!".red().bold(), summary.alerts);
    }
    if summary.metrics_stopped_early || summary.analysis_stopped_early {
        println!("  {}", "Time budget reached before all work was done".dimmed());
    }
    println!(
        "  {}",
        format!("Elapsed: {:.1}s", summary.elapsed_ms as f64 / 1000.0).dimmed()
    );
}

fn colorize_tier(tier: Tier) -> colored::ColoredString {
    let label = tier.to_string();
    match tier {
        Tier::Hot => label.red().bold(),
        Tier::Rising => label.yellow(),
        Tier::LongTail => label.dimmed(),
    }
}

fn colorize_recommendation(rec: Recommendation) -> colored::ColoredString {
    match rec {
        Recommendation::StrongBuy => rec.as_str().green().bold(),
        Recommendation::Buy => rec.as_str().green(),
        Recommendation::Watch => rec.as_str().yellow(),
        Recommendation::Pass => rec.as_str().dimmed(),
    }
}

fn colorize_level(level: AlertLevel) -> colored::ColoredString {
    match level {
        AlertLevel::Critical => level.as_str().red().bold(),
        AlertLevel::Warning => level.as_str().yellow(),
        AlertLevel::Info => level.as_str().normal(),
    }
}
