//! Colored console output for crawl progress and results.

use crate::types::CrawlSummary;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

/// Console output handler with colors and formatting.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleOutput {
    verbose: bool,
    json_mode: bool,
}

impl ConsoleOutput {
    pub fn new(verbose: bool, json_mode: bool) -> Self {
        Self { verbose, json_mode }
    }

    pub fn print_banner(&self) {
        if self.json_mode {
            return;
        }

        println!();
        println!("{}", "╔══════════════════════════════════════════════════════════════╗".cyan());
        println!("{}", "║                    SPIDERMAP v0.1.0                          ║".cyan());
        println!("{}", "║       Browser Resource Capture & Source Map Recovery         ║".cyan());
        println!("{}", "╚══════════════════════════════════════════════════════════════╝".cyan());
        println!();
    }

    pub fn print_crawl_start(&self, target: &str) {
        if self.json_mode {
            return;
        }

        println!("{} Crawling: {}", "[*]".bright_blue(), target.bright_white());
    }

    /// Only shown with `--verbose`.
    pub fn print_progress(&self, message: &str) {
        if self.json_mode || !self.verbose {
            return;
        }

        println!("{} {}", "[.]".dimmed(), message.dimmed());
    }

    pub fn print_info(&self, message: &str) {
        if self.json_mode {
            return;
        }

        println!("{} {}", "[*]".bright_blue(), message);
    }

    /// Per-target summary, or pretty JSON in `--json` mode.
    pub fn print_summary(&self, summary: &CrawlSummary) {
        if self.json_mode {
            if let Ok(json) = serde_json::to_string_pretty(summary) {
                println!("{}", json);
            }
            return;
        }

        println!();
        println!("{}", "=== Crawl Summary ===".bright_cyan());
        println!("  Target:        {}", summary.target);
        println!("  Duration:      {:.2}s", summary.duration_secs);

        match summary.error {
            Some(ref error) => {
                println!("  {}", format!("Failed: {}", error).red().bold());
            }
            None => {
                println!("  Captured:      {}", summary.captured_count);
                println!("  Source files:  {}", summary.source_files_count.to_string().green());
                println!("  Total:         {}", summary.total_count);
                println!("  Output:        {}", summary.output_dir.dimmed());
            }
        }

        println!();
    }

    pub fn print_batch_totals(&self, succeeded: usize, failed: usize) {
        if self.json_mode {
            return;
        }

        println!("{}", "=== Batch Complete ===".bright_cyan());
        println!(
            "  Succeeded: {}, Failed: {}, Total: {}",
            succeeded.to_string().green(),
            if failed > 0 {
                failed.to_string().red()
            } else {
                failed.to_string().normal()
            },
            succeeded + failed
        );
        println!();
    }

    /// Remediation text for a browser that would not start.
    pub fn print_launch_help(&self, error: &str) {
        eprintln!();
        eprintln!("{} {}", "Browser failed to start:".red().bold(), error);
        eprintln!();
        eprintln!("Install Chrome or Chromium, or let spidermap fetch one:");
        eprintln!("  spidermap setup");
        eprintln!();
        eprintln!("macOS:          brew install --cask google-chrome");
        eprintln!("Debian/Ubuntu:  sudo apt-get install chromium-browser");
        eprintln!("Custom path:    spidermap crawl --chrome-path /path/to/chrome <URL>");
        eprintln!();
    }

    pub fn create_progress_bar(&self, total: u64, message: &str) -> Option<ProgressBar> {
        if self.json_mode {
            return None;
        }

        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .ok()?
            .progress_chars("#>-");

        let pb = ProgressBar::new(total);
        pb.set_style(style);
        pb.set_message(message.to_string());
        Some(pb)
    }
}
