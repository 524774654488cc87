//! Component B — Plot Window Resolver.
//!
//! Maps wall-clock time to the set of plot lines a character has
//! "already lived by now today," with a previous-day fallback when
//! today has no plot rows yet.

use crate::config::EngineConfig;
use chrono::{DateTime, FixedOffset, NaiveDate, Timelike};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
struct PlotLine {
    line_number: usize,
    start_minutes: i32,
    end_minutes: Option<i32>,
    full_line: String,
}

fn parse_plot_lines(content: &str) -> Vec<PlotLine> {
    let mut lines = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        let Some((range, text)) = trimmed.split_once(char::is_whitespace) else {
            continue;
        };
        let Some((start_str, end_str)) = range.split_once('-') else {
            continue;
        };
        let Some(start_minutes) = parse_hhmm(start_str) else {
            continue;
        };
        let end_minutes = parse_hhmm(end_str);
        lines.push(PlotLine {
            line_number: idx + 1,
            start_minutes,
            end_minutes,
            full_line: format!("{range} {}", text.trim()),
        });
    }
    lines.sort_by_key(|l| l.start_minutes);
    lines
}

fn parse_hhmm(s: &str) -> Option<i32> {
    let (h, m) = s.split_once(':')?;
    let h: i32 = h.trim().parse().ok()?;
    let m: i32 = m.trim().parse().ok()?;
    if !(0..24).contains(&h) || !(0..60).contains(&m) {
        return None;
    }
    Some(h * 60 + m)
}

/// Locates the folder for `role_id` under `plot_root`, trying the
/// configured candidate names in order, then globs for a file whose name
/// starts with `date_str` and ends in `.txt`.
fn find_plot_file(config: &EngineConfig, role_id: &str, date: NaiveDate) -> Option<PathBuf> {
    let date_str = date.format("%Y-%m-%d").to_string();
    for folder in config.plot_file_candidates(role_id) {
        if !folder.is_dir() {
            continue;
        }
        if let Ok(entries) = std::fs::read_dir(&folder) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with(&date_str) && name.ends_with(".txt") {
                    return Some(entry.path());
                }
            }
        }
    }
    None
}

fn read_plot_lines(config: &EngineConfig, role_id: &str, date: NaiveDate) -> Option<Vec<PlotLine>> {
    let path = find_plot_file(config, role_id, date)?;
    let content = std::fs::read_to_string(path).ok()?;
    let lines = parse_plot_lines(&content);
    if lines.is_empty() {
        None
    } else {
        Some(lines)
    }
}

/// Resolves the ordered plot lines "already lived" by `role_id` as of
/// `now`. Returns an empty vec when no plot file exists for today at all.
pub fn resolve(config: &EngineConfig, role_id: &str, now: DateTime<FixedOffset>) -> Vec<String> {
    let today = now.date_naive();
    let Some(lines) = read_plot_lines(config, role_id, today) else {
        return Vec::new();
    };

    let current_minutes = now.hour() as i32 * 60 + now.minute() as i32;
    let earliest = lines.iter().min_by_key(|l| l.start_minutes).unwrap();
    let mut latest_end = lines
        .iter()
        .map(|l| l.end_minutes.unwrap_or(l.start_minutes))
        .max()
        .unwrap();
    for l in &lines {
        if let Some(end) = l.end_minutes {
            latest_end = latest_end.max(end);
        }
    }

    if current_minutes < earliest.start_minutes {
        let previous_day = today - chrono::Duration::days(1);
        if let Some(previous_lines) = read_plot_lines(config, role_id, previous_day) {
            return previous_lines.into_iter().map(|l| l.full_line).collect();
        }
        let first_line_number = earliest.line_number;
        return lines
            .into_iter()
            .filter(|l| l.line_number <= first_line_number)
            .map(|l| l.full_line)
            .collect();
    }

    if current_minutes >= latest_end {
        return lines.into_iter().map(|l| l.full_line).collect();
    }

    let mut target: Option<&PlotLine> = None;
    for line in &lines {
        match line.end_minutes {
            Some(end) => {
                if line.start_minutes <= current_minutes && current_minutes < end {
                    target = Some(line);
                    break;
                }
            }
            None => {
                if line.start_minutes <= current_minutes {
                    target = Some(line);
                }
            }
        }
    }

    let target_line_number = match target {
        Some(t) => t.line_number,
        None => {
            lines
                .iter()
                .min_by_key(|l| (l.start_minutes - current_minutes).abs())
                .unwrap()
                .line_number
        }
    };

    lines
        .into_iter()
        .filter(|l| l.line_number <= target_line_number)
        .map(|l| l.full_line)
        .collect()
}
