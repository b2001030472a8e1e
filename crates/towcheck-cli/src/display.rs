//! End-of-run summary cards.

use std::path::Path;
use std::time::Duration;

use towcheck_core::FilterParams;
use towcheck_pipeline::RunSummary;
use towcheck_pipeline::progress::format_duration;
use towcheck_store::FilterSummary;

pub fn print_filter_card(params: &FilterParams, summary: Option<&FilterSummary>, path: &Path) {
    println!("=== towcheck filter ===");
    println!();

    println!("Parameters");
    let regions: Vec<&str> = params.regions.iter().map(String::as_str).collect();
    row("regions", regions.join(", "));
    row("cargo classes", params.cargo_classes.join(", "));
    row("size", format!("{} >= {}", params.size_metric, params.min_size));
    println!();

    println!("Table");
    row("path", path.display());
    match summary {
        Some(s) => {
            row("raw rows", s.raw_rows);
            row("kept rows", s.kept_rows);
            if s.duplicates > 0 {
                row("duplicate DOT numbers", s.duplicates);
            }
        }
        None => row("status", "up to date, not regenerated"),
    }
}

pub fn print_run_card(summary: &RunSummary, output_rows: usize, output: &Path, elapsed: Duration) {
    if summary.interrupted {
        println!("=== towcheck run (interrupted) ===");
    } else {
        println!("=== towcheck run ===");
    }
    println!();

    println!("Carriers");
    row("total", summary.total);
    row("already processed", summary.skipped);
    row("processed this run", summary.processed);
    row("remaining", summary.remaining());
    println!();

    println!("Outcomes");
    row("verified", summary.verified);
    row("rejected", summary.rejected);
    row("inconclusive", summary.inconclusive);
    if summary.duplicate_rows > 0 {
        row("rows already in output", summary.duplicate_rows);
    }
    if summary.processed > 0 {
        let rate = summary.verified as f64 / summary.processed as f64 * 100.0;
        row("hit rate", format!("{rate:.1}%"));
    }
    println!();

    println!("Output");
    row("path", output.display());
    row("rows", output_rows);
    row("elapsed", format_duration(elapsed));

    if summary.interrupted {
        println!();
        println!("Progress is saved; rerun the same command to continue.");
    }
}

fn row(label: &str, value: impl std::fmt::Display) {
    println!("  {:<26} {}", label, value);
}
