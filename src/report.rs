//! Reporting core
//!
//! Collects pass/fail/skip/error counts and per-file rollups, and fans
//! execution events out to registered formatters. What formatters do with
//! the events (files on disk, terminals, CI annotations) is their own
//! business; the core only aggregates and dispatches.

use crate::runner::{CaseRecord, FileOutcome, Status};
use colored::Colorize;
use serde::{Deserialize, Serialize};

/// Counts aggregated for one finished suite
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SuiteAggregate {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl SuiteAggregate {
    pub fn count(&mut self, status: Status) {
        match status {
            Status::Passed => self.passed += 1,
            Status::Failed => self.failed += 1,
            Status::Skipped => self.skipped += 1,
            Status::Errored => self.errored += 1,
        }
    }
}

/// Per-file rollup kept in the run summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRollup {
    pub file: String,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
    pub duration_ns: u64,
}

/// Whole-run aggregate handed to formatters at the end
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
    pub duration_ns: u64,
    pub files: Vec<FileRollup>,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.errored
    }

    pub fn success(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }

    /// Files ordered slowest first, for the tail of a console report
    pub fn slowest_files(&self, limit: usize) -> Vec<&FileRollup> {
        let mut sorted: Vec<&FileRollup> = self.files.iter().collect();
        sorted.sort_by(|a, b| b.duration_ns.cmp(&a.duration_ns));
        sorted.truncate(limit);
        sorted
    }
}

/// Receives execution events; implementations render them somewhere
pub trait Formatter {
    fn on_test_started(&mut self, _name: &str) {}
    fn on_test_finished(&mut self, _record: &CaseRecord) {}
    fn on_suite_started(&mut self, _name: &str) {}
    fn on_suite_finished(&mut self, _name: &str, _aggregate: &SuiteAggregate) {}
    fn on_run_finished(&mut self, _summary: &RunSummary) {}
}

/// Swallows every event; useful in tests and as a placeholder
pub struct NullFormatter;

impl Formatter for NullFormatter {}

/// Terminal formatter used by the driver binary
pub struct ConsoleFormatter {
    verbose: bool,
}

impl ConsoleFormatter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Formatter for ConsoleFormatter {
    fn on_test_finished(&mut self, record: &CaseRecord) {
        let label = match record.status {
            Status::Passed => "PASS".green(),
            Status::Failed => "FAIL".red(),
            Status::Skipped => "SKIP".yellow(),
            Status::Errored => "ERR ".red().bold(),
        };
        if self.verbose || record.status != Status::Passed {
            println!("{} {}", label, record.name);
            if let Some(failure) = &record.failure {
                println!("     {}", failure.format_full().replace('\n', "\n     "));
            }
            if let Some(reason) = &record.skip_reason {
                println!("     ({})", reason);
            }
        }
    }

    fn on_run_finished(&mut self, summary: &RunSummary) {
        let verdict = if summary.success() {
            "ok".green().bold()
        } else {
            "failed".red().bold()
        };
        println!(
            "\n{}: {} passed, {} failed, {} skipped, {} errored in {:.2}s",
            verdict,
            summary.passed,
            summary.failed,
            summary.skipped,
            summary.errored,
            summary.duration_ns as f64 / 1e9
        );
        if self.verbose {
            for rollup in summary.slowest_files(5) {
                println!(
                    "  {:>8.2}ms {}",
                    rollup.duration_ns as f64 / 1e6,
                    rollup.file
                );
            }
        }
    }
}

/// Event hub: aggregates and dispatches to every registered formatter
#[derive(Default)]
pub struct Reporting {
    formatters: Vec<Box<dyn Formatter>>,
    summary: RunSummary,
}

impl Reporting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_formatter(&mut self, formatter: impl Formatter + 'static) {
        self.formatters.push(Box::new(formatter));
    }

    pub fn test_started(&mut self, name: &str) {
        for formatter in &mut self.formatters {
            formatter.on_test_started(name);
        }
    }

    pub fn test_finished(&mut self, record: &CaseRecord) {
        self.summary.count(record.status);
        for formatter in &mut self.formatters {
            formatter.on_test_finished(record);
        }
    }

    pub fn suite_started(&mut self, name: &str) {
        for formatter in &mut self.formatters {
            formatter.on_suite_started(name);
        }
    }

    pub fn suite_finished(&mut self, name: &str, aggregate: &SuiteAggregate) {
        for formatter in &mut self.formatters {
            formatter.on_suite_finished(name, aggregate);
        }
    }

    /// Fold one file's outcome into the summary rollups
    pub fn file_finished(&mut self, outcome: &FileOutcome) {
        self.summary.duration_ns += outcome.duration_ns;
        self.summary.files.push(FileRollup {
            file: outcome.file.clone(),
            passed: outcome.passed,
            failed: outcome.failed,
            skipped: outcome.skipped,
            errored: outcome.errored,
            duration_ns: outcome.duration_ns,
        });
    }

    /// Fold counts from a worker that already aggregated its records
    /// (parallel mode merges; events were emitted in the worker)
    pub fn merge_outcome(&mut self, outcome: &FileOutcome) {
        self.summary.passed += outcome.passed;
        self.summary.failed += outcome.failed;
        self.summary.skipped += outcome.skipped;
        self.summary.errored += outcome.errored;
        self.file_finished(outcome);
    }

    pub fn run_finished(&mut self) -> &RunSummary {
        for formatter in &mut self.formatters {
            formatter.on_run_finished(&self.summary);
        }
        &self.summary
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }
}

impl RunSummary {
    fn count(&mut self, status: Status) {
        match status {
            Status::Passed => self.passed += 1,
            Status::Failed => self.failed += 1,
            Status::Skipped => self.skipped += 1,
            Status::Errored => self.errored += 1,
        }
    }
}
