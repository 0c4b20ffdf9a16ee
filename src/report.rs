//! Terminal output
//!
//! A spinner while the scan runs and a styled summary afterwards. All of
//! this is presentation only; the numbers come straight off the root
//! rollup node.

use std::path::Path;
use std::time::Duration;

use chrono::DateTime;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};

use crate::scan::node::AGE_THRESHOLD_WEEKS;
use crate::scan::ScanResult;

/// Spinner shown while a scan is in flight
pub fn scan_spinner(target: &Path) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("scanning {}", target.display()));
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Print the post-scan summary for the root rollup
pub fn print_report(result: &ScanResult, show_users: bool) {
    let root = result.root();

    println!();
    println!(
        "{}",
        style(format!("  {}", result.root_path().display()))
            .bold()
            .cyan()
    );
    println!(
        "  {} in {} files, {} directories ({:.2}s, {} nodes)",
        style(format_size(root.total(), BINARY)).bold().green(),
        root.file_count(),
        root.dir_count(),
        result.elapsed().as_secs_f64(),
        result.node_count(),
    );
    println!(
        "  last access {}   last modify {}",
        format_epoch(root.atime()),
        format_epoch(root.mtime()),
    );

    println!();
    println!("  {}", style("untouched for at least").dim());
    for (weeks, bytes) in AGE_THRESHOLD_WEEKS.iter().zip(root.buckets()) {
        println!(
            "    {:>3} week{}  {:>12}",
            weeks,
            if *weeks == 1 { " " } else { "s" },
            format_size(*bytes, BINARY),
        );
    }

    if show_users {
        println!();
        println!("  {}", style("bytes by owner uid").dim());
        let mut owners: Vec<(u32, u64)> =
            root.owner_bytes().iter().map(|(u, b)| (*u, *b)).collect();
        owners.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        for (uid, bytes) in owners {
            println!("    {:>10}  {:>12}", uid, format_size(bytes, BINARY));
        }
    }
    println!();
}

fn format_epoch(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("@{ts}"))
}
