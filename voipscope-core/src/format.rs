//! Formatting helpers shared across front-ends.

use chrono::{DateTime, Utc};

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    let now = Utc::now();
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// Format a dialog duration with one decimal, or `-` if unknown.
pub fn format_duration_secs(duration_s: Option<f64>) -> String {
    match duration_s {
        Some(secs) => format!("{:.1}s", secs),
        None => "-".to_string(),
    }
}

/// Format an optional status code, or `-` if missing.
pub fn format_status_code(code: Option<u16>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string())
}
