use std::fmt::Write;

use chrono::Month;

use crate::calendar::Calendar;
use crate::error::OwnerId;
use crate::models::AnalyticsSnapshot;

const BAR_WIDTH: i64 = 20;

fn bar(count: i64, max: i64) -> String {
    if max <= 0 || count <= 0 {
        return String::new();
    }
    let width = ((count * BAR_WIDTH + max - 1) / max).max(1);
    "#".repeat(width as usize)
}

fn month_name(month: u32) -> &'static str {
    u8::try_from(month)
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .map(|m| m.name())
        .unwrap_or("Unknown")
}

pub fn build_report(owner: OwnerId, calendar: &Calendar, snapshot: &AnalyticsSnapshot) -> String {
    let mut output = String::new();
    let summary = &snapshot.summary;

    let _ = writeln!(output, "# Job Application Dashboard");
    let _ = writeln!(
        output,
        "Generated for {} on {}",
        owner,
        calendar.local_date(snapshot.generated_at)
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Today: {}", summary.today);
    let _ = writeln!(output, "- This week: {}", summary.this_week);
    let _ = writeln!(output, "- This month: {}", summary.this_month);
    let _ = writeln!(output, "- Total: {}", summary.total);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Last 7 Days");
    let max = snapshot.daily.iter().map(|d| d.count).max().unwrap_or(0);
    for day in &snapshot.daily {
        let line = format!("- {}: {} {}", day.date, day.count, bar(day.count, max));
        let _ = writeln!(output, "{}", line.trim_end());
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Weeks");
    if snapshot.weekly.is_empty() {
        let _ = writeln!(output, "No applications in the last 8 weeks.");
    } else {
        for week in &snapshot.weekly {
            let _ = writeln!(output, "- {} week {}: {}", week.year, week.week, week.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## This Year by Month");
    let max = snapshot.monthly.iter().map(|m| m.count).max().unwrap_or(0);
    for month in &snapshot.monthly {
        let line = format!(
            "- {}: {} {}",
            month_name(month.month),
            month.count,
            bar(month.count, max)
        );
        let _ = writeln!(output, "{}", line.trim_end());
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Mix");
    let total: i64 = snapshot.status.iter().map(|s| s.count).sum();
    if total == 0 {
        let _ = writeln!(output, "No applications recorded yet.");
    } else {
        for entry in &snapshot.status {
            let share = entry.count as f64 * 100.0 / total as f64;
            let _ = writeln!(output, "- {}: {} ({:.1}%)", entry.status, entry.count, share);
        }
    }

    output
}
