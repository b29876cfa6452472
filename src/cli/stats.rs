// CLI statistics commands: stats, dashboard

use super::Context;
use crate::models::GlobalStatistics;
use crate::stats::{compute_breakdowns, summary_line, Breakdowns, CategoryBreakdown, MAX_BAR_HEIGHT};

/// Widest bar drawn in the daily chart, in characters.
const BAR_WIDTH: usize = 40;

/// Scale a bar height onto `width` characters of '#'. Any non-zero bar gets
/// at least one character.
pub fn render_bar(height: f64, width: usize) -> String {
    if height <= 0.0 {
        return String::new();
    }
    let chars = (height / MAX_BAR_HEIGHT * width as f64).round() as usize;
    "#".repeat(chars.clamp(1, width))
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() > max {
        let head: String = value.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        value.to_string()
    }
}

fn print_categories(title: &str, rows: &[CategoryBreakdown]) {
    println!();
    println!("{}", title);
    println!("{:<20}{:>8}{:>9}", "NAME", "COUNT", "SHARE");
    for row in rows {
        println!(
            "{:<20}{:>8}{:>8.1}%",
            truncate(&row.key, 19),
            row.count,
            row.percentage
        );
    }
}

fn print_dashboard(stats: &GlobalStatistics, breakdowns: &Breakdowns) {
    println!("Total applications:  {}", stats.total_applications);
    println!("Successful:          {}", stats.successful_applications);
    println!("Failed:              {}", stats.failed_applications);
    println!("Success rate:        {:.1}%", stats.success_rate);
    println!("Sessions:            {}", stats.sessions.len());
    if let Some(last) = &stats.last_session {
        println!("Last session:        {}", last);
    }

    if stats.has_search_terms() {
        println!();
        println!("Per search term");
        println!(
            "{:<24}{:>10}{:>8}{:>10}{:>10}{:>8}{:>9}",
            "TERM", "SUBMITTED", "FOUND", "ALREADY", "EXCLUDED", "FAILED", "SHARE"
        );
        for row in &breakdowns.search_terms {
            println!(
                "{:<24}{:>10}{:>8}{:>10}{:>10}{:>8}{:>8.1}%",
                truncate(&row.term, 23),
                row.count,
                row.found,
                row.already_applied,
                row.excluded,
                row.failed,
                row.percentage
            );
        }
    }

    if stats.has_contract_types() {
        print_categories("Per contract type", &breakdowns.contract_types);
    }
    if stats.has_remote_types() {
        print_categories("Per remote type", &breakdowns.remote_types);
    }

    if stats.has_daily_data() {
        println!();
        println!("Daily applications");
        for bar in &breakdowns.daily {
            println!(
                "{}  {:<width$} {}",
                bar.date,
                render_bar(bar.height, BAR_WIDTH),
                bar.count,
                width = BAR_WIDTH
            );
        }
    }
}

/// autoapply stats
pub async fn cmd_stats(ctx: &Context, json: bool) -> anyhow::Result<()> {
    ctx.ensure_authenticated().await?;
    let stats = ctx
        .client
        .statistics(None)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load statistics: {}", e))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", summary_line(&stats));
    let extras = [
        ("Jobs seen", stats.total_jobs_seen),
        ("Attempted", stats.total_attempted_applications),
        ("Skipped (excluded keyword)", stats.skipped_excluded_keyword),
        ("Skipped (already applied)", stats.skipped_already_applied),
        ("Failed (other)", stats.failed_other),
    ];
    for (label, value) in extras {
        if let Some(value) = value {
            println!("  {:<28}{}", label, value);
        }
    }
    if let Some(last) = &stats.last_session {
        println!("  {:<28}{}", "Last session", last);
    }
    Ok(())
}

/// autoapply dashboard
pub async fn cmd_dashboard(ctx: &Context, json: bool) -> anyhow::Result<()> {
    ctx.ensure_authenticated().await?;
    let stats = ctx
        .client
        .advanced_statistics(None)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load statistics: {}", e))?;
    let breakdowns = compute_breakdowns(&stats)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&breakdowns)?);
        return Ok(());
    }

    if stats.total_applications == 0 && !stats.has_daily_data() {
        println!("No applications yet.");
        return Ok(());
    }
    print_dashboard(&stats, &breakdowns);
    Ok(())
}
