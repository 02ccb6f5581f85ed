//! Parallel file execution
//!
//! One worker per test file; within a file execution stays sequential.
//! Each worker builds its own engine from a configuration snapshot, runs
//! the file, and hands back a serialized record of its results and
//! coverage data. The caller merges coverage by summing hit counts and
//! OR-ing verified flags, keeping results in deterministic file order.

use super::{FileLoader, FileOutcome};
use crate::coverage::FileLines;
use crate::error::{Result, VouchError};
use crate::report::Reporting;
use crate::Engine;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// What a worker sends back to the main process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub outcome: FileOutcome,
    pub coverage: BTreeMap<String, FileLines>,
}

/// Run each file on a rayon worker. Results come back in input order
/// regardless of completion order.
pub fn run_files_parallel<L, F>(
    paths: &[PathBuf],
    loader_factory: F,
    config_snapshot: &serde_json::Value,
    jobs: Option<usize>,
) -> Vec<(PathBuf, Result<WorkerRecord>)>
where
    L: FileLoader,
    F: Fn() -> L + Sync,
{
    let work = || -> Vec<(PathBuf, Result<String>)> {
        paths
            .par_iter()
            .map(|path| (path.clone(), run_one(path, &loader_factory, config_snapshot)))
            .collect()
    };

    let encoded = match jobs {
        Some(n) => match rayon::ThreadPoolBuilder::new().num_threads(n.max(1)).build() {
            Ok(pool) => pool.install(work),
            Err(_) => work(),
        },
        None => work(),
    };

    // decode the wire records on the calling side
    encoded
        .into_iter()
        .map(|(path, result)| {
            let decoded = result.and_then(|payload| {
                serde_json::from_str::<WorkerRecord>(&payload).map_err(|e| {
                    VouchError::parse(format!("corrupt worker record for {}: {}", path.display(), e))
                })
            });
            (path, decoded)
        })
        .collect()
}

fn run_one<L, F>(
    path: &PathBuf,
    loader_factory: &F,
    config_snapshot: &serde_json::Value,
) -> Result<String>
where
    L: FileLoader,
    F: Fn() -> L + Sync,
{
    let mut engine = Engine::new();
    engine.config.replace_values(config_snapshot.clone());
    engine.init_coverage()?;

    let loader = loader_factory();
    let mut reporting = Reporting::new();
    let outcome = match engine.run_file(&loader, path, &mut reporting) {
        Ok(outcome) => outcome,
        // an unloadable file is one errored case, same as sequential mode
        Err(e) => FileOutcome::load_failure(&crate::fsys::canonical_string(path), e),
    };
    let record = WorkerRecord {
        outcome,
        coverage: engine.coverage.borrow().export_stats(),
    };
    serde_json::to_string(&record)
        .map_err(|e| VouchError::io(format!("serialize worker record: {}", e)))
}

/// Fold worker records into the main engine and reporting, in the order
/// given (which is the discovery order).
pub fn merge_worker_records(
    records: Vec<(PathBuf, Result<WorkerRecord>)>,
    engine: &Engine,
    reporting: &mut Reporting,
) -> Result<()> {
    let mut first_error = None;
    for (path, result) in records {
        match result {
            Ok(record) => {
                reporting.merge_outcome(&record.outcome);
                engine.coverage.borrow_mut().merge_stats(record.coverage);
            }
            Err(e) => {
                eprintln!("warning: worker for {} failed: {}", path.display(), e.message);
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
