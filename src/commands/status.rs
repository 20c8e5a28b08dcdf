//! `bugwatch status` command.

use crate::config::SyncConfig;
use crate::context::ServiceContext;
use crate::model::BugWatch;
use crate::store::WatchStore;

const HEADERS: [&str; 8] = [
    "ID",
    "TRACKER",
    "REMOTE",
    "LOCAL",
    "REMOTE STATUS",
    "STATUS",
    "ERROR",
    "CHECKED",
];

/// Execute the `status` command.
///
/// Displays a table of watches, optionally limited to one tracker.
///
/// # Errors
///
/// Returns an error string if the store cannot be opened or the tracker is
/// unknown.
pub fn run(ctx: &ServiceContext, config: &SyncConfig, tracker: Option<&str>) -> Result<(), String> {
    let store = WatchStore::in_context(ctx, &config.store_root)?;
    let watches = match tracker {
        Some(name) => {
            if store.tracker(name).is_none() {
                return Err(format!("Unknown tracker: {name}"));
            }
            store.watches_for(name)
        }
        None => store.watches(),
    };

    if watches.is_empty() {
        println!("No watches found in store.");
        return Ok(());
    }

    print!("{}", render_table(&watches));
    println!("\n{} watch(es) total.", watches.len());
    Ok(())
}

/// Lays out watches as an aligned text table with a header row.
#[must_use]
pub fn render_table(watches: &[BugWatch]) -> String {
    let rows: Vec<[String; 8]> = watches.iter().map(row).collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    push_line(&mut out, &HEADERS.map(ToString::to_string), &widths);
    push_line(&mut out, &widths.map(|w| "-".repeat(w)), &widths);
    for row in &rows {
        push_line(&mut out, row, &widths);
    }
    out
}

fn row(watch: &BugWatch) -> [String; 8] {
    let dash = || "-".to_string();
    [
        watch.id.to_string(),
        watch.tracker.clone(),
        watch.remote_bug.clone(),
        watch.local_bug.to_string(),
        watch.remote_status.clone().unwrap_or_else(dash),
        watch.local_status.map_or_else(dash, |s| s.to_string()),
        watch.last_error.map_or_else(dash, |e| e.to_string()),
        watch
            .last_checked
            .map_or_else(dash, |t| t.format("%Y-%m-%d %H:%M").to_string()),
    ]
}

fn push_line(out: &mut String, cells: &[String; 8], widths: &[usize; 8]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect();
    out.push_str(line.join("  ").trim_end());
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::model::{ErrorClassification, LocalStatus};

    #[test]
    fn table_shows_status_and_errors() {
        let mut fixed = BugWatch::new(1, "gnome", "42", 7);
        fixed.record_status(
            "RESOLVED FIXED",
            LocalStatus::FixReleased,
            chrono::Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap(),
        );
        let mut missing = BugWatch::new(2, "gnome", "999999", 8);
        missing.record_error(ErrorClassification::BugNotFound, chrono::Utc::now());

        let table = render_table(&[fixed, missing]);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("ID  TRACKER  REMOTE"));
        assert!(lines[1].starts_with("--  -------"));
        assert!(lines[2].contains("RESOLVED FIXED  FIXRELEASED  -"));
        assert!(lines[2].ends_with("2024-06-01 12:30"));
        assert!(lines[3].contains("BUG_NOT_FOUND"));
    }

    #[test]
    fn never_checked_watches_show_dashes() {
        let table = render_table(&[BugWatch::new(3, "debian", "1042", 9)]);
        let row = table.lines().nth(2).unwrap();
        assert_eq!(row.split_whitespace().filter(|c| *c == "-").count(), 4);
    }
}
