//! Coverage engine with three-state line accounting
//!
//! Executing code reports `(file, line)` events through [`Coverage::track`]
//! (the typed stand-in for a runtime line hook). Each tracked line carries a
//! hit count plus a `verified` flag that only [`Coverage::mark_line_covered`]
//! sets, and only the assertion engine calls that, after a predicate passed.
//! That yields three mutually exclusive states per line:
//!
//! - *not executed*: no hits
//! - *executed*: hits, never verified by a passing assertion
//! - *covered*: hits and verified
//!
//! Hit counts never promote a line to covered on their own.

mod stats;

pub use stats::{FileLines, LineStat, StatsFile, STATS_VERSION};

use crate::config::ConfigStore;
use crate::error::{Result, VouchError};
use crate::fsys;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Classification of one line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    NotExecuted,
    Executed,
    Covered,
}

/// One frame of the user-code stack maintained for assertion correlation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub file: String,
    pub line: u32,
}

type FilePredicate = Rc<dyn Fn(&str) -> bool>;

#[derive(Default)]
struct PatternSet {
    globs: Vec<String>,
    compiled: Option<GlobSet>,
    predicates: Vec<FilePredicate>,
}

impl std::fmt::Debug for PatternSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternSet")
            .field("globs", &self.globs)
            .field("compiled", &self.compiled.is_some())
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

impl PatternSet {
    fn add_glob(&mut self, pattern: &str) -> Result<()> {
        Glob::new(pattern)
            .map_err(|e| VouchError::validation(format!("invalid glob '{}': {}", pattern, e)))?;
        self.globs.push(pattern.to_string());
        self.compiled = None;
        Ok(())
    }

    fn add_predicate(&mut self, predicate: FilePredicate) {
        self.predicates.push(predicate);
    }

    fn compiled(&mut self) -> &GlobSet {
        if self.compiled.is_none() {
            let mut builder = GlobSetBuilder::new();
            for pattern in &self.globs {
                if let Ok(glob) = Glob::new(pattern) {
                    builder.add(glob);
                }
            }
            self.compiled = Some(builder.build().unwrap_or_else(|_| GlobSet::empty()));
        }
        self.compiled.as_ref().unwrap()
    }

    fn is_empty(&self) -> bool {
        self.globs.is_empty() && self.predicates.is_empty()
    }

    /// Match against globs and predicates. A predicate that panics counts
    /// as a poison match so the caller can blacklist the file.
    fn matches(&mut self, file: &str) -> MatchOutcome {
        if self.compiled().is_match(file) {
            return MatchOutcome::Matched;
        }
        for predicate in &self.predicates {
            let outcome =
                std::panic::catch_unwind(AssertUnwindSafe(|| predicate(file)));
            match outcome {
                Ok(true) => return MatchOutcome::Matched,
                Ok(false) => {}
                Err(_) => return MatchOutcome::Poisoned,
            }
        }
        MatchOutcome::Unmatched
    }
}

enum MatchOutcome {
    Matched,
    Unmatched,
    Poisoned,
}

/// Line tracker and three-state store
#[derive(Debug)]
pub struct Coverage {
    initialized: bool,
    enabled: bool,
    paused: bool,
    data: BTreeMap<String, FileLines>,
    /// Per-file include/exclude decision cache; false entries are skipped
    /// without re-evaluating rules
    decision_cache: HashMap<String, bool>,
    include: PatternSet,
    exclude: PatternSet,
    statsfile: Option<PathBuf>,
    save_step_size: u64,
    buffer_count: u64,
    /// Latch set after the first failed stats write; suppresses retries
    /// until reset so the tracker never busy-loops on failing I/O
    write_failed: bool,
    /// Lines seen for the first time this session
    session_new_lines: u64,
    frames: Vec<Frame>,
    framework_prefixes: Vec<String>,
}

impl Default for Coverage {
    fn default() -> Self {
        Self::new()
    }
}

impl Coverage {
    pub fn new() -> Self {
        Self {
            initialized: false,
            enabled: false,
            paused: false,
            data: BTreeMap::new(),
            decision_cache: HashMap::new(),
            include: PatternSet::default(),
            exclude: PatternSet::default(),
            statsfile: None,
            save_step_size: 1000,
            buffer_count: 0,
            write_failed: false,
            session_new_lines: 0,
            frames: Vec::new(),
            framework_prefixes: Vec::new(),
        }
    }

    /// Config keys read from the `coverage` prefix
    pub fn register_config(config: &mut ConfigStore) {
        use crate::config::{FieldType, Schema};
        config.register_module(
            "coverage",
            Schema::new()
                .field("enabled", FieldType::Bool)
                .field("statsfile", FieldType::Str)
                .ranged_field("save_step_size", FieldType::Int, 1.0, 1_000_000.0)
                .field("include", FieldType::List)
                .field("exclude", FieldType::List)
                .field("framework_prefixes", FieldType::List),
            serde_json::json!({
                "enabled": false,
                "save_step_size": 1000,
                "include": [],
                "exclude": [],
                "framework_prefixes": [],
            }),
        );
    }

    /// Install the tracker for this engine: read configuration, load and
    /// merge a pre-existing stats file. The equivalent of attaching the
    /// host's line hook; every task dispatched by the scheduler reports
    /// into this same instance.
    pub fn init(&mut self, config: &ConfigStore) -> Result<()> {
        self.enabled = config.get_bool("coverage.enabled").unwrap_or(false);
        self.save_step_size = config.get_u64("coverage.save_step_size").unwrap_or(1000).max(1);
        self.statsfile = config
            .get_string("coverage.statsfile")
            .map(|s| fsys::normalize(Path::new(&s)));
        for pattern in config.get_string_list("coverage.include") {
            self.include.add_glob(&pattern)?;
        }
        for pattern in config.get_string_list("coverage.exclude") {
            self.exclude.add_glob(&pattern)?;
        }
        self.framework_prefixes = config.get_string_list("coverage.framework_prefixes");
        self.initialized = true;

        if let Some(path) = self.statsfile.clone() {
            self.load_stats(&path);
        }
        Ok(())
    }

    pub fn start(&mut self) {
        self.enabled = true;
    }

    pub fn stop(&mut self) {
        self.enabled = false;
    }

    /// Gate recording without uninstalling
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_active(&self) -> bool {
        self.initialized && self.enabled && !self.paused
    }

    /// Flush stats, clear the frame stack, and mark uninitialized
    pub fn shutdown(&mut self) {
        if self.initialized {
            self.flush_stats();
        }
        self.frames.clear();
        self.initialized = false;
        self.enabled = false;
        self.paused = false;
    }

    /// Drop all in-memory data and clear the write-failure latch
    pub fn reset(&mut self) {
        self.data.clear();
        self.decision_cache.clear();
        self.buffer_count = 0;
        self.write_failed = false;
        self.session_new_lines = 0;
        self.frames.clear();
    }

    pub fn add_include_pattern(&mut self, pattern: &str) -> Result<()> {
        self.include.add_glob(pattern)?;
        self.decision_cache.clear();
        Ok(())
    }

    pub fn add_exclude_pattern(&mut self, pattern: &str) -> Result<()> {
        self.exclude.add_glob(pattern)?;
        self.decision_cache.clear();
        Ok(())
    }

    pub fn add_include_predicate(&mut self, predicate: impl Fn(&str) -> bool + 'static) {
        self.include.add_predicate(Rc::new(predicate));
        self.decision_cache.clear();
    }

    pub fn add_exclude_predicate(&mut self, predicate: impl Fn(&str) -> bool + 'static) {
        self.exclude.add_predicate(Rc::new(predicate));
        self.decision_cache.clear();
    }

    /// Line-event entry point. Never fails and never panics into the
    /// caller; a rule predicate that raises blacklists the file.
    pub fn track(&mut self, file: &str, line: u32) {
        if !self.is_active() {
            return;
        }
        let key = fsys::canonical_string(Path::new(file));
        if !self.should_track(&key) {
            return;
        }

        let lines = self.data.entry(key).or_default();
        let datum = lines.entry(line).or_default();
        if datum.hits == 0 {
            self.session_new_lines += 1;
        }
        datum.hits += 1;

        self.buffer_count += 1;
        if self.statsfile.is_some() && self.buffer_count >= self.save_step_size {
            self.flush_stats();
        }
    }

    fn should_track(&mut self, key: &str) -> bool {
        if let Some(&decision) = self.decision_cache.get(key) {
            return decision;
        }
        let decision = match self.exclude.matches(key) {
            MatchOutcome::Matched | MatchOutcome::Poisoned => false,
            MatchOutcome::Unmatched => {
                if self.include.is_empty() {
                    true
                } else {
                    match self.include.matches(key) {
                        MatchOutcome::Matched => true,
                        MatchOutcome::Unmatched | MatchOutcome::Poisoned => false,
                    }
                }
            }
        };
        self.decision_cache.insert(key.to_string(), decision);
        decision
    }

    /// Set the verified flag for a line. Only the assertion engine calls
    /// this, after a predicate passed. Idempotent. A line never tracked
    /// before counts one hit, since the assertion's frame demonstrably
    /// executed it.
    pub fn mark_line_covered(&mut self, file: &str, line: u32) {
        if !self.is_active() {
            return;
        }
        let key = fsys::canonical_string(Path::new(file));
        if !self.should_track(&key) {
            return;
        }
        let datum = self.data.entry(key).or_default().entry(line).or_default();
        if datum.hits == 0 {
            datum.hits = 1;
            self.session_new_lines += 1;
        }
        datum.verified = true;
    }

    pub fn line_state(&self, file: &str, line: u32) -> LineState {
        let key = fsys::canonical_string(Path::new(file));
        match self.data.get(&key).and_then(|lines| lines.get(&line)) {
            None => LineState::NotExecuted,
            Some(datum) if datum.hits == 0 => LineState::NotExecuted,
            Some(datum) if datum.verified => LineState::Covered,
            Some(_) => LineState::Executed,
        }
    }

    pub fn get_data(&self) -> &BTreeMap<String, FileLines> {
        &self.data
    }

    /// Lines seen for the first time since init or the last reset
    pub fn session_new_lines(&self) -> u64 {
        self.session_new_lines
    }

    /// Export for worker records and merges
    pub fn export_stats(&self) -> BTreeMap<String, FileLines> {
        self.data.clone()
    }

    /// Merge foreign data in: hits sum, verified OR-s
    pub fn merge_stats(&mut self, other: BTreeMap<String, FileLines>) {
        stats::merge_into(&mut self.data, other);
    }

    /// Load and merge the stats file at `path`
    pub fn load_stats(&mut self, path: &Path) {
        if let Some(loaded) = stats::load(path) {
            stats::merge_into(&mut self.data, loaded.files);
        }
    }

    /// Persist current data. Failures are warned once and latch further
    /// writes off until [`reset`](Self::reset).
    pub fn save_stats(&mut self) -> Result<()> {
        let path = match &self.statsfile {
            Some(p) => p.clone(),
            None => return Ok(()),
        };
        if self.write_failed {
            return Ok(());
        }
        match stats::save(&path, &StatsFile::from_data(self.data.clone())) {
            Ok(()) => {
                self.buffer_count = 0;
                Ok(())
            }
            Err(e) => {
                eprintln!(
                    "warning: stats write to {} failed, disabling further writes: {}",
                    path.display(),
                    e.message
                );
                self.write_failed = true;
                Err(e)
            }
        }
    }

    fn flush_stats(&mut self) {
        let _ = self.save_stats();
    }

    // --- user-frame stack for assertion correlation ---

    pub fn push_frame(&mut self, file: &str, line: u32) {
        self.frames.push(Frame {
            file: file.to_string(),
            line,
        });
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    /// Deepest frame whose file is not under a framework module prefix
    pub fn deepest_user_frame(&self) -> Option<&Frame> {
        self.frames
            .iter()
            .rev()
            .find(|frame| !self.is_framework_file(&frame.file))
    }

    fn is_framework_file(&self, file: &str) -> bool {
        self.framework_prefixes
            .iter()
            .any(|prefix| file.starts_with(prefix.as_str()))
    }

    /// Per-file rollup for formatters
    pub fn summary(&self) -> CoverageSummary {
        let mut files = BTreeMap::new();
        for (file, lines) in &self.data {
            let total = lines.values().filter(|d| d.hits > 0).count();
            let covered = lines.values().filter(|d| d.hits > 0 && d.verified).count();
            files.insert(
                file.clone(),
                FileSummary {
                    lines_executed: total,
                    lines_covered: covered,
                },
            );
        }
        CoverageSummary { files }
    }
}

/// Per-file executed/covered rollup
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileSummary {
    pub lines_executed: usize,
    pub lines_covered: usize,
}

impl FileSummary {
    pub fn covered_pct(&self) -> f64 {
        if self.lines_executed == 0 {
            0.0
        } else {
            self.lines_covered as f64 * 100.0 / self.lines_executed as f64
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CoverageSummary {
    pub files: BTreeMap<String, FileSummary>,
}
