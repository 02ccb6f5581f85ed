//! Vouch: BDD test framework core with assertion-verified line coverage
//!
//! This library is the core of a BDD-style testing framework for a
//! dynamically-typed scripting host: nested suite/case declaration with
//! inheritable lifecycle hooks, a fluent path-based assertion engine, a
//! mocking substrate with scoped restoration, and a coverage engine that
//! distinguishes lines merely *executed* from lines *covered*: executed
//! and verified by a passing assertion.
//!
//! Drivers (CLI, watchers, editors) work through [`Engine`]: discover test
//! files, run them with a [`runner::FileLoader`], and read the aggregated
//! [`report::RunSummary`].

pub mod assertion;
pub mod config;
pub mod coverage;
pub mod discovery;
pub mod error;
pub mod fsys;
pub mod mock;
pub mod report;
pub mod runner;
pub mod task;
pub mod value;

pub use assertion::{expect, Expectation};
pub use error::{ErrorCategory, Result, Severity, VouchError};
pub use runner::{CaseCtx, CaseOptions, CaseRecord, FileLoader, FileOutcome, Runner, Status};
pub use value::Value;

use config::ConfigStore;
use coverage::Coverage;
use fsys::TempRegistry;
use mock::MockRegistry;
use report::Reporting;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

/// Everything the user surface usually exposes as globals
pub mod prelude {
    pub use crate::assertion::expect;
    pub use crate::error::{Result, VouchError};
    pub use crate::mock::{matchers, verify_sequence, ExhaustPolicy, SeqStep};
    pub use crate::runner::{CaseCtx, CaseOptions, FileLoader, Runner};
    pub use crate::value::Value;
    pub use crate::Engine;
}

/// The service container threaded through declaration and execution:
/// configuration, coverage, temp files, and the mocking substrate. One
/// engine per worker; workers never share one.
pub struct Engine {
    pub config: ConfigStore,
    pub coverage: Rc<RefCell<Coverage>>,
    pub temp: Rc<RefCell<TempRegistry>>,
    pub mocks: Rc<RefCell<MockRegistry>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Engine {
        let mut config = ConfigStore::new();
        Coverage::register_config(&mut config);
        discovery::register_config(&mut config);
        config.register_module(
            "runner",
            config::Schema::new()
                .field("parallel", config::FieldType::Bool)
                .ranged_field("jobs", config::FieldType::Int, 1.0, 512.0)
                .field("only_tags", config::FieldType::List)
                .field("filter", config::FieldType::Str),
            serde_json::json!({ "parallel": false, "only_tags": [] }),
        );

        Engine {
            config,
            coverage: Rc::new(RefCell::new(Coverage::new())),
            temp: Rc::new(RefCell::new(TempRegistry::new())),
            mocks: Rc::new(RefCell::new(MockRegistry::new())),
        }
    }

    /// Install the coverage tracker from the current configuration
    pub fn init_coverage(&mut self) -> Result<()> {
        self.coverage.borrow_mut().init(&self.config)
    }

    /// Between-files reset: close leaked mock scopes and temp contexts.
    /// Coverage data survives (it resets only through its explicit API),
    /// and so does the global assertion path registry.
    pub fn reset(&mut self) {
        self.mocks.borrow_mut().reset();
        let mut temp = self.temp.borrow_mut();
        while temp.depth() > 0 {
            temp.pop_context();
        }
    }

    /// Flush coverage, remove the tracker, and clean every temp file
    pub fn shutdown(&mut self) {
        self.coverage.borrow_mut().shutdown();
        self.temp.borrow_mut().cleanup_all();
        self.mocks.borrow_mut().reset();
    }

    /// Load one test file through `loader` and execute it. The runner is
    /// fresh per file; loader panics come back as RUNTIME errors.
    pub fn run_file(
        &self,
        loader: &dyn FileLoader,
        path: &Path,
        reporting: &mut Reporting,
    ) -> Result<FileOutcome> {
        let mut runner = Runner::new();
        error::try_protected(|| loader.load(path, &mut runner))?;

        // run-wide filters configured by the driver
        let tags = self.config.get_string_list("runner.only_tags");
        if !tags.is_empty() {
            let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
            runner.only_tags(&tags);
        }
        if let Some(pattern) = self.config.get_string("runner.filter") {
            if !pattern.is_empty() {
                runner.filter(&pattern)?;
            }
        }

        let label = fsys::canonical_string(path);
        let outcome = runner.run(self, reporting, &label);
        reporting.file_finished(&outcome);
        Ok(outcome)
    }

    /// Discover and run every matching test file sequentially. Returns
    /// true when nothing failed or errored.
    pub fn run_discovered(
        &self,
        loader: &dyn FileLoader,
        dir: Option<&Path>,
        pattern: Option<&str>,
        reporting: &mut Reporting,
    ) -> Result<bool> {
        let found = discovery::discover(&self.config, dir, pattern)?;
        for file in &found.files {
            if let Err(e) = self.run_file(loader, file, reporting) {
                // a file that cannot even load counts as one errored case
                let outcome = FileOutcome::load_failure(&fsys::canonical_string(file), e);
                reporting.merge_outcome(&outcome);
            }
        }
        Ok(reporting.summary().success())
    }

    /// Discover and run with one worker per file; coverage and results
    /// are merged back into this engine in discovery order.
    pub fn run_discovered_parallel<L, F>(
        &self,
        loader_factory: F,
        dir: Option<&Path>,
        pattern: Option<&str>,
        jobs: Option<usize>,
        reporting: &mut Reporting,
    ) -> Result<bool>
    where
        L: FileLoader,
        F: Fn() -> L + Sync,
    {
        let found = discovery::discover(&self.config, dir, pattern)?;
        let snapshot = self.config.snapshot();
        let records =
            runner::run_files_parallel(&found.files, loader_factory, &snapshot, jobs);
        runner::merge_worker_records(records, self, reporting)?;
        Ok(reporting.summary().success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::NullFormatter;

    struct TwoCaseLoader;

    impl FileLoader for TwoCaseLoader {
        fn load(&self, _path: &Path, runner: &mut Runner) -> Result<()> {
            runner.describe("math", |r| {
                r.it("adds", |t| {
                    t.expect(2 + 2).to().equal(4)?;
                    Ok(())
                })?;
                r.it("compares", |t| {
                    t.expect(5).to().be_greater_than(4)?;
                    Ok(())
                })
            })
        }
    }

    #[test]
    fn test_run_file_end_to_end() {
        let engine = Engine::new();
        let mut reporting = Reporting::new();
        reporting.add_formatter(NullFormatter);
        let outcome = engine
            .run_file(&TwoCaseLoader, Path::new("/virtual/math_test.lua"), &mut reporting)
            .unwrap();
        assert_eq!(outcome.passed, 2);
        assert!(outcome.success());
        assert_eq!(reporting.summary().files.len(), 1);
    }

    #[test]
    fn test_run_file_converts_loader_panic() {
        struct PanickingLoader;
        impl FileLoader for PanickingLoader {
            fn load(&self, _path: &Path, _runner: &mut Runner) -> Result<()> {
                panic!("syntax error in test file");
            }
        }
        let engine = Engine::new();
        let mut reporting = Reporting::new();
        let err = engine
            .run_file(&PanickingLoader, Path::new("/v/x_test.lua"), &mut reporting)
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Runtime);
    }

    #[test]
    fn test_engine_shutdown_cleans_up() {
        let mut engine = Engine::new();
        let temp_path = engine
            .temp
            .borrow_mut()
            .create_temp_file(Some("x"), None)
            .unwrap();
        assert!(temp_path.exists());
        engine.shutdown();
        assert!(!temp_path.exists());
        assert!(!engine.coverage.borrow().is_active());
    }
}
