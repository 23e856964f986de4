//! Terminal output for the command line.
//!
//! All user-facing printing goes through [`OutputFormatter`] so styling stays in one
//! place. Diagnostics go through `tracing` instead, see [`crate::logging`].

use crate::file_organizer::{OrganizeReport, PlannedMove};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::Path;

/// Styled terminal output.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// ```no_run
    /// use tidydesk::output::OutputFormatter;
    /// OutputFormatter::success("Desktop organized");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message to stderr in red.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{message}");
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Prints a titled notification line, used by the console notifier.
    ///
    /// ```no_run
    /// use tidydesk::output::OutputFormatter;
    /// OutputFormatter::notice("File Organized", "File report.pdf was organized into Documents");
    /// ```
    pub fn notice(title: &str, message: &str) {
        println!(
            "{} {} {}",
            chrono::Local::now().format("%H:%M:%S").to_string().dimmed(),
            format!("{title}:").magenta().bold(),
            message
        );
    }

    /// Creates a progress bar for an organize pass. The length is set by the pass.
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map(|style| style.progress_chars("█▓░"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    }

    /// Prints per-category file counts with a total row.
    pub fn summary_table(category_counts: &BTreeMap<String, usize>, total_files: usize) {
        Self::header("SUMMARY");

        let width = category_counts
            .keys()
            .map(|name| name.len())
            .max()
            .unwrap_or(0)
            .max(8); // "Category"

        println!("{:<width$} | {}", "Category".bold(), "Files".bold());
        println!("{}", "-".repeat(width + 10));

        for (category, count) in category_counts {
            println!(
                "{:<width$} | {} {}",
                category,
                count.to_string().green(),
                plural(*count)
            );
        }

        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total_files.to_string().green().bold(),
            plural(total_files)
        );
    }

    /// Prints the outcome of an organize pass: summary table, skips and failures.
    pub fn organize_report(report: &OrganizeReport) {
        if report.restored > 0 {
            Self::info(&format!(
                "Restored {} entries from existing folders",
                report.restored
            ));
        }

        Self::summary_table(&report.category_counts(), report.moved.len());

        if !report.skipped.is_empty() {
            Self::header("SKIPPED");
            for (path, reason) in &report.skipped {
                println!("  {} ({})", file_name(path), reason.to_string().dimmed());
            }
        }

        if !report.failures.is_empty() || !report.rule_failures.is_empty() {
            Self::header("FAILURES");
            for (path, reason) in report.failures.iter().chain(&report.rule_failures) {
                Self::error(&format!("{}: {reason}", file_name(path)));
            }
        }
    }

    /// Prints where each file would go in a dry run.
    pub fn plan(plan: &[PlannedMove]) {
        if plan.is_empty() {
            Self::dry_run_notice("Nothing to organize");
            return;
        }

        let width = plan
            .iter()
            .map(|planned| file_name(&planned.path).len())
            .max()
            .unwrap_or(0);
        for planned in plan {
            Self::dry_run_notice(&format!(
                "{:<width$} -> {}/",
                file_name(&planned.path),
                planned.category
            ));
        }

        let mut counts = BTreeMap::new();
        for planned in plan {
            *counts.entry(planned.category.clone()).or_insert(0) += 1;
        }
        Self::summary_table(&counts, plan.len());
    }

    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {message}").yellow());
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
