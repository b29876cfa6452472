// Statistics aggregation: turns the backend's statistics payload into sorted,
// percentage-annotated breakdowns for display.

use chrono::NaiveDate;
use serde::Serialize;

use crate::errors::StatsError;
use crate::models::stats::CountMap;
use crate::models::{GlobalStatistics, Statistics};

/// Height of the tallest bar in the daily chart.
pub const MAX_BAR_HEIGHT: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchTermBreakdown {
    pub term: String,
    /// Applications submitted for this term.
    pub count: u64,
    pub found: u64,
    pub already_applied: u64,
    pub excluded: u64,
    pub failed: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryBreakdown {
    pub key: String,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub count: u64,
    pub height: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Breakdowns {
    pub search_terms: Vec<SearchTermBreakdown>,
    pub contract_types: Vec<CategoryBreakdown>,
    pub remote_types: Vec<CategoryBreakdown>,
    pub daily: Vec<DailyBar>,
}

fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

fn categories(counts: &CountMap, total: u64) -> Vec<CategoryBreakdown> {
    let mut rows: Vec<CategoryBreakdown> = counts
        .iter()
        .map(|(key, &count)| CategoryBreakdown {
            key: key.to_string(),
            count,
            percentage: percentage(count, total),
        })
        .collect();
    // sort_by is stable: equal counts keep payload order
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time component
/// (`2024-03-01T10:00:00`, `2024-03-01 10:00`).
fn parse_day(key: &str) -> Result<NaiveDate, StatsError> {
    let day = key.get(..10).unwrap_or(key);
    let rest = key.get(10..).unwrap_or("");
    if !(rest.is_empty() || rest.starts_with('T') || rest.starts_with(' ')) {
        return Err(StatsError::InvalidDate(key.to_string()));
    }
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|_| StatsError::InvalidDate(key.to_string()))
}

fn daily_bars(per_day: &CountMap) -> Result<Vec<DailyBar>, StatsError> {
    let mut days = per_day
        .iter()
        .map(|(key, &count)| parse_day(key).map(|date| (date, count)))
        .collect::<Result<Vec<_>, _>>()?;
    days.sort_by_key(|(date, _)| *date);

    let max = days.iter().map(|(_, count)| *count).max().unwrap_or(0);
    Ok(days
        .into_iter()
        .map(|(date, count)| DailyBar {
            date,
            count,
            height: if max == 0 {
                0.0
            } else {
                count as f64 * MAX_BAR_HEIGHT / max as f64
            },
        })
        .collect())
}

/// Compute every breakdown shown on the statistics dashboard.
pub fn compute_breakdowns(stats: &GlobalStatistics) -> Result<Breakdowns, StatsError> {
    let total = stats.total_applications;

    let mut search_terms: Vec<SearchTermBreakdown> = stats
        .per_search_term
        .iter()
        .map(|s| SearchTermBreakdown {
            term: s.term.clone(),
            count: s.submitted,
            found: s.found,
            already_applied: s.already_applied,
            excluded: s.excluded,
            failed: s.failed,
            percentage: percentage(s.submitted, total),
        })
        .collect();
    search_terms.sort_by(|a, b| b.count.cmp(&a.count));

    Ok(Breakdowns {
        search_terms,
        contract_types: categories(&stats.per_contract_type, total),
        remote_types: categories(&stats.per_remote_type, total),
        daily: daily_bars(&stats.per_day)?,
    })
}

/// One-line status summary, e.g.
/// `Statistics loaded: 12 total applications, 9 successful (75.0% success rate)`.
pub fn summary_line(stats: &Statistics) -> String {
    format!(
        "Statistics loaded: {} total applications, {} successful ({:.1}% success rate)",
        stats.total_applications, stats.successful_applications, stats.success_rate
    )
}
