//! Vouch driver CLI
//!
//! Thin consumer of the driver API: discover test files, run them, print
//! a report, and exit 0 (all passed), 1 (failures or errors), or 2
//! (aborted on a configuration or discovery problem).
//!
//! Test files are JSON fixtures describing suites, cases, and assertion
//! paths, the host-independent stand-in for scripts executed by a
//! language runtime:
//!
//! ```json
//! {
//!   "suites": [{
//!     "name": "math",
//!     "cases": [
//!       { "name": "adds", "checks": [
//!         { "value": 4, "path": "to.equal", "args": [4] }
//!       ]}
//!     ]
//!   }]
//! }
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use vouch::config::find_config_in_parents;
use vouch::report::{ConsoleFormatter, Reporting};
use vouch::runner::FileLoader;
use vouch::{Engine, Runner, Value};

/// Vouch: BDD test runner with assertion-verified coverage
#[derive(Parser, Debug)]
#[command(name = "vouch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory to discover test files in (default: current directory)
    path: Option<PathBuf>,

    /// Discovery glob for test file names (only `*` is a wildcard)
    #[arg(long, short)]
    pattern: Option<String>,

    /// Run one worker per test file
    #[arg(long)]
    parallel: bool,

    /// Number of parallel workers (default: number of CPU cores)
    #[arg(long, value_name = "N")]
    jobs: Option<usize>,

    /// Enable line coverage tracking
    #[arg(long)]
    coverage: bool,

    /// Path to config file (default: search .vouchrc.json upward)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only run cases carrying at least one of these tags
    #[arg(long = "tag", value_name = "TAG")]
    tags: Vec<String>,

    /// Only run cases whose full name matches this pattern
    #[arg(long)]
    filter: Option<String>,

    /// Print the run summary as JSON instead of the console report
    #[arg(long, short)]
    json: bool,

    /// Verbose output (every case, slowest files)
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::from(2)
        }
    }
}

fn run() -> Result<ExitCode> {
    let args = Args::parse();
    let root = args
        .path
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    let mut engine = Engine::new();
    load_configuration(&mut engine, &args, &root)?;
    apply_cli_overrides(&mut engine, &args)?;
    engine
        .init_coverage()
        .context("failed to initialize coverage")?;

    let mut reporting = Reporting::new();
    if !args.json {
        reporting.add_formatter(ConsoleFormatter::new(args.verbose));
    }

    let pattern = args.pattern.as_deref();
    let success = if args.parallel {
        engine
            .run_discovered_parallel(
                || FixtureLoader,
                Some(root.as_path()),
                pattern,
                args.jobs,
                &mut reporting,
            )
            .context("parallel run failed")?
    } else {
        engine
            .run_discovered(&FixtureLoader, Some(root.as_path()), pattern, &mut reporting)
            .context("run failed")?
    };

    let summary = reporting.run_finished().clone();
    if args.json {
        let payload = serde_json::json!({
            "summary": summary,
            "coverage": engine.coverage.borrow().summary(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    }

    engine.shutdown();
    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn load_configuration(engine: &mut Engine, args: &Args, root: &Path) -> Result<()> {
    match &args.config {
        Some(path) => engine
            .config
            .load_from_file(Some(path))
            .with_context(|| format!("could not load config {}", path.display()))?,
        None => {
            if let Some(found) = find_config_in_parents(root) {
                engine
                    .config
                    .load_from_file(Some(found.as_path()))
                    .with_context(|| format!("could not load config {}", found.display()))?;
            }
        }
    }
    Ok(())
}

fn apply_cli_overrides(engine: &mut Engine, args: &Args) -> Result<()> {
    if args.coverage {
        engine
            .config
            .set("coverage.enabled", serde_json::json!(true))
            .context("enable coverage")?;
    }
    if !args.tags.is_empty() {
        engine
            .config
            .set("runner.only_tags", serde_json::json!(args.tags))
            .context("set tag filter")?;
    }
    if let Some(filter) = &args.filter {
        engine
            .config
            .set("runner.filter", serde_json::json!(filter))
            .context("set name filter")?;
    }
    Ok(())
}

// --- fixture loader ---

#[derive(Debug, Clone, Deserialize)]
struct FixtureFile {
    #[serde(default)]
    suites: Vec<FixtureSuite>,
    #[serde(default)]
    cases: Vec<FixtureCase>,
}

#[derive(Debug, Clone, Deserialize)]
struct FixtureSuite {
    name: String,
    #[serde(default)]
    suites: Vec<FixtureSuite>,
    #[serde(default)]
    cases: Vec<FixtureCase>,
}

#[derive(Debug, Clone, Deserialize)]
struct FixtureCase {
    name: String,
    #[serde(default)]
    checks: Vec<FixtureCheck>,
    #[serde(default)]
    pending: Option<String>,
    #[serde(default)]
    expect_error: bool,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FixtureCheck {
    value: serde_json::Value,
    path: String,
    #[serde(default)]
    args: Vec<serde_json::Value>,
}

/// Loads JSON fixture files into the runner
struct FixtureLoader;

impl FileLoader for FixtureLoader {
    fn load(&self, path: &Path, runner: &mut Runner) -> vouch::Result<()> {
        let content = vouch::fsys::read_file(path)?;
        let fixture: FixtureFile = serde_json::from_str(&content).map_err(|e| {
            vouch::VouchError::parse(format!("invalid fixture {}: {}", path.display(), e))
        })?;
        for case in fixture.cases {
            declare_case(runner, case)?;
        }
        for suite in fixture.suites {
            declare_suite(runner, suite)?;
        }
        Ok(())
    }
}

fn declare_suite(runner: &mut Runner, suite: FixtureSuite) -> vouch::Result<()> {
    let FixtureSuite { name, suites, cases } = suite;
    runner.describe(&name, move |r| {
        for case in cases {
            declare_case(r, case)?;
        }
        for child in suites {
            declare_suite(r, child)?;
        }
        Ok(())
    })
}

fn declare_case(runner: &mut Runner, case: FixtureCase) -> vouch::Result<()> {
    let FixtureCase {
        name,
        checks,
        pending,
        expect_error,
        tags,
    } = case;
    let options = vouch::CaseOptions {
        tags,
        expect_error,
        ..Default::default()
    };
    runner.it_with(&name, options, move |t| {
        if let Some(reason) = &pending {
            return t.pending(reason);
        }
        for check in &checks {
            let args: Vec<Value> = check.args.iter().map(Value::from_json).collect();
            t.expect(Value::from_json(&check.value))
                .eval_path(&check.path, &args)?;
        }
        Ok(())
    })
}
