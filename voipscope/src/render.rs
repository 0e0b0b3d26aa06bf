//! Text rendering of dialogs and ladders for `voipscope`.

use voipscope_core::format::{format_duration_secs, format_relative_time, format_status_code};
use voipscope_core::{DialogRecord, LadderStep, Role};

/// Characters kept from a long Call-ID in tables.
const CALL_ID_WIDTH: usize = 28;

fn truncate(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let kept: String = input.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}~", kept)
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

pub fn dialog_table(dialogs: &[DialogRecord]) -> String {
    let mut out = format!(
        "{:<width$}  {:<16}  {:>5}  {:>8}  {:<28}  {}\n",
        "CALL-ID",
        "STATE",
        "CODE",
        "DURATION",
        "FROM -> TO",
        "LAST SEEN",
        width = CALL_ID_WIDTH
    );

    for dialog in dialogs {
        let parties = format!(
            "{} -> {}",
            or_dash(&dialog.peer_a_identity),
            or_dash(&dialog.peer_b_identity)
        );
        out.push_str(&format!(
            "{:<width$}  {:<16}  {:>5}  {:>8}  {:<28}  {}\n",
            truncate(&dialog.dialog_id, CALL_ID_WIDTH),
            dialog.state.display_name(),
            format_status_code(dialog.final_status_code),
            format_duration_secs(dialog.duration_s),
            truncate(&parties, 28),
            dialog
                .last_seen
                .map(format_relative_time)
                .unwrap_or_else(|| "-".to_string()),
            width = CALL_ID_WIDTH
        ));
    }
    out
}

pub fn dialog_detail(dialog: &DialogRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!("Call-ID:   {}\n", dialog.dialog_id));
    out.push_str(&format!("State:     {}\n", dialog.state.display_name()));
    out.push_str(&format!(
        "Final:     {}\n",
        format_status_code(dialog.final_status_code)
    ));
    out.push_str(&format!(
        "Method:    {}\n",
        dialog.method_of_origin.as_deref().unwrap_or("-")
    ));
    out.push_str(&format!(
        "Duration:  {}\n",
        format_duration_secs(dialog.duration_s)
    ));
    out.push_str(&format!("From:      {}\n", or_dash(&dialog.from_header)));
    out.push_str(&format!("To:        {}\n", or_dash(&dialog.to_header)));

    out.push_str(&format!("\nMessages ({}):\n", dialog.messages.len()));
    for message in &dialog.messages {
        let ts = message
            .ts
            .map(|t| t.format("%H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "  {:<12}  {:>21} -> {:<21}  {}\n",
            ts,
            or_dash(&message.source_addr),
            or_dash(&message.dest_addr),
            message.label()
        ));
    }
    out
}

/// Columns between adjacent lifelines.
const LANE_GAP: usize = 24;

fn lane(role: Role) -> usize {
    match role {
        Role::A => 0,
        Role::B => 1,
        Role::Proxy => 2,
    }
}

/// ASCII ladder with one row per step.
pub fn ladder_diagram(steps: &[LadderStep]) -> String {
    let lanes = if steps
        .iter()
        .any(|s| s.from == Role::Proxy || s.to == Role::Proxy)
    {
        3
    } else {
        2
    };
    let width = (lanes - 1) * LANE_GAP + 1;

    let mut header = vec![' '; width];
    for (i, role) in [Role::A, Role::B, Role::Proxy].iter().take(lanes).enumerate() {
        let name = role.as_str();
        let start = (i * LANE_GAP).min(width.saturating_sub(name.len()));
        for (j, c) in name.chars().enumerate() {
            header[start + j] = c;
        }
    }

    let mut out = String::new();
    out.push_str(header.iter().collect::<String>().trim_end());
    out.push('\n');

    for step in steps {
        let mut row = vec![' '; width];
        for i in 0..lanes {
            row[i * LANE_GAP] = '|';
        }

        let (from, to) = (lane(step.from) * LANE_GAP, lane(step.to) * LANE_GAP);
        if from == to {
            let mut line: String = row.iter().collect();
            line.push_str(&format!("  ({})", step.label));
            out.push_str(&line);
            out.push('\n');
            continue;
        }

        let (lo, hi) = (from.min(to), from.max(to));
        for cell in &mut row[lo + 1..hi] {
            *cell = '-';
        }
        if to > from {
            row[hi - 1] = '>';
        } else {
            row[lo + 1] = '<';
        }

        let label: Vec<char> = step.label.chars().collect();
        let span = hi - lo;
        if label.len() + 4 <= span {
            let start = lo + (span - label.len()) / 2;
            row[start..start + label.len()].copy_from_slice(&label);
        }

        let mut line: String = row.iter().collect::<String>().trim_end().to_string();
        if label.len() + 4 > span {
            line.push_str(&format!("  {}", step.label));
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(from: Role, to: Role, label: &str) -> LadderStep {
        LadderStep {
            from,
            to,
            label: label.to_string(),
        }
    }

    #[test]
    fn test_ladder_arrows() {
        let diagram = ladder_diagram(&[
            step(Role::A, Role::B, "INVITE"),
            step(Role::B, Role::A, "200"),
        ]);
        let lines: Vec<&str> = diagram.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with('A'));
        assert!(lines[0].ends_with('B'));
        assert!(lines[1].contains("INVITE"));
        assert!(lines[1].ends_with(">|"));
        assert!(lines[2].starts_with("|<"));
        assert!(lines[2].contains("200"));
    }

    #[test]
    fn test_ladder_adds_proxy_lane() {
        let diagram = ladder_diagram(&[step(Role::B, Role::Proxy, "INVITE")]);
        let header = diagram.lines().next().unwrap();
        assert!(header.ends_with("Proxy"));
        assert_eq!(diagram.lines().nth(1).unwrap().matches('|').count(), 3);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd~");
    }
}
