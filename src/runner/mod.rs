//! Test registry and scheduler
//!
//! Test files declare a tree of suites and cases through the [`Runner`]'s
//! declaration API (`describe`/`it` and their focused/excluded variants,
//! `before`/`after` hooks, tags). The tree is immutable once declaration
//! finishes; execution walks it depth-first, runs inherited hooks around
//! each case under protected execution, and aggregates records.

mod exec;
mod filter;
mod parallel;

pub use exec::CaseCtx;
pub use parallel::{merge_worker_records, run_files_parallel, WorkerRecord};

use crate::error::{Result, VouchError};
use filter::Filters;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::Path;
use std::rc::{Rc, Weak};

pub type CaseBody = Rc<dyn Fn(&mut CaseCtx) -> Result<()>>;
pub type Hook = Rc<dyn Fn(&mut CaseCtx) -> Result<()>>;
pub type NodeRef = Rc<RefCell<TestNode>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Suite,
    Case,
}

/// A node of the declared tree: a suite with children, or a case with a
/// body. Suites carry the hooks; cases carry execution flags.
pub struct TestNode {
    pub name: String,
    pub kind: NodeKind,
    pub parent: Weak<RefCell<TestNode>>,
    pub children: Vec<NodeRef>,
    pub body: Option<CaseBody>,
    /// Effective tags: inherited from the enclosing suites at declaration
    /// time, plus any pending `tags(...)` declaration
    pub tags: BTreeSet<String>,
    pub focused: bool,
    pub excluded: bool,
    pub expect_error: bool,
    pub is_async: bool,
    pub timeout_ms: Option<u64>,
    pub before_hooks: Vec<Hook>,
    pub after_hooks: Vec<Hook>,
    /// Declaration callsite, pushed as the case's user frame during
    /// execution
    pub declared_at: Option<(String, u32)>,
}

impl TestNode {
    fn suite(name: &str) -> TestNode {
        TestNode {
            name: name.to_string(),
            kind: NodeKind::Suite,
            parent: Weak::new(),
            children: Vec::new(),
            body: None,
            tags: BTreeSet::new(),
            focused: false,
            excluded: false,
            expect_error: false,
            is_async: false,
            timeout_ms: None,
            before_hooks: Vec::new(),
            after_hooks: Vec::new(),
            declared_at: None,
        }
    }
}

/// Options accepted by `it` and variants
#[derive(Debug, Clone, Default)]
pub struct CaseOptions {
    pub tags: Vec<String>,
    /// Inverts the pass condition: the case passes iff some error occurred
    pub expect_error: bool,
    pub timeout_ms: Option<u64>,
}

/// Final classification of one executed case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
    Skipped,
    Errored,
}

/// Per-case execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    /// Fully-qualified name: ancestor suite names joined by spaces
    pub name: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<VouchError>,
    pub duration_ns: u64,
    pub assertion_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hook_errors: Vec<VouchError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

/// Aggregated result of running one test file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileOutcome {
    pub file: String,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
    pub duration_ns: u64,
    pub records: Vec<CaseRecord>,
}

impl FileOutcome {
    pub fn count(&mut self, status: Status) {
        match status {
            Status::Passed => self.passed += 1,
            Status::Failed => self.failed += 1,
            Status::Skipped => self.skipped += 1,
            Status::Errored => self.errored += 1,
        }
    }

    pub fn success(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }

    /// Outcome for a file that could not even load: one errored record
    pub fn load_failure(file: &str, failure: VouchError) -> FileOutcome {
        FileOutcome {
            file: file.to_string(),
            errored: 1,
            records: vec![CaseRecord {
                name: format!("{} (load)", file),
                status: Status::Errored,
                failure: Some(failure),
                duration_ns: 0,
                assertion_count: 0,
                hook_errors: Vec::new(),
                skip_reason: None,
            }],
            ..FileOutcome::default()
        }
    }
}

/// Loads one test file by declaring its suites into a runner: the typed
/// stand-in for executing a test script.
pub trait FileLoader {
    fn load(&self, path: &Path, runner: &mut Runner) -> Result<()>;
}

/// The registry: declaration stack, filters, and focus mode
pub struct Runner {
    root: NodeRef,
    decl_stack: Vec<NodeRef>,
    focus_mode: bool,
    filters: Filters,
    pending_tags: Vec<String>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Runner {
        let root = Rc::new(RefCell::new(TestNode::suite("")));
        Runner {
            decl_stack: vec![root.clone()],
            root,
            focus_mode: false,
            filters: Filters::new(),
            pending_tags: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeRef {
        self.root.clone()
    }

    pub fn focus_mode(&self) -> bool {
        self.focus_mode
    }

    fn current(&self) -> NodeRef {
        self.decl_stack
            .last()
            .cloned()
            .unwrap_or_else(|| self.root.clone())
    }

    /// Tags inherited by a node declared right now
    fn effective_tags(&mut self, extra: &[String]) -> BTreeSet<String> {
        let mut tags: BTreeSet<String> = BTreeSet::new();
        for suite in &self.decl_stack {
            tags.extend(suite.borrow().tags.iter().cloned());
        }
        tags.extend(self.pending_tags.drain(..));
        tags.extend(extra.iter().cloned());
        tags
    }

    fn push_suite(&mut self, name: &str, focused: bool, excluded: bool) -> Result<NodeRef> {
        if name.is_empty() {
            return Err(VouchError::validation("suite name must be non-empty"));
        }
        let parent = self.current();
        let mut node = TestNode::suite(name);
        node.parent = Rc::downgrade(&parent);
        node.tags = self.effective_tags(&[]);
        // excluded always wins over focused
        node.excluded = excluded;
        node.focused = focused && !excluded;
        if node.focused {
            self.focus_mode = true;
        }
        let node = Rc::new(RefCell::new(node));
        parent.borrow_mut().children.push(node.clone());
        self.decl_stack.push(node.clone());
        Ok(node)
    }

    fn pop_suite(&mut self) {
        if self.decl_stack.len() > 1 {
            self.decl_stack.pop();
        }
    }

    /// Declare a nested suite; `f` runs immediately to collect children
    pub fn describe(&mut self, name: &str, f: impl FnOnce(&mut Runner) -> Result<()>) -> Result<()> {
        self.push_suite(name, false, false)?;
        let result = f(self);
        self.pop_suite();
        result
    }

    /// Focused suite: flips the global focus mode on
    pub fn fdescribe(&mut self, name: &str, f: impl FnOnce(&mut Runner) -> Result<()>) -> Result<()> {
        self.push_suite(name, true, false)?;
        let result = f(self);
        self.pop_suite();
        result
    }

    /// Excluded suite: descendants never run
    pub fn xdescribe(&mut self, name: &str, f: impl FnOnce(&mut Runner) -> Result<()>) -> Result<()> {
        self.push_suite(name, false, true)?;
        let result = f(self);
        self.pop_suite();
        result
    }

    #[track_caller]
    pub fn it(&mut self, name: &str, body: impl Fn(&mut CaseCtx) -> Result<()> + 'static) -> Result<()> {
        self.add_case(name, CaseOptions::default(), Some(Rc::new(body)), false, false, false)
    }

    #[track_caller]
    pub fn it_with(
        &mut self,
        name: &str,
        options: CaseOptions,
        body: impl Fn(&mut CaseCtx) -> Result<()> + 'static,
    ) -> Result<()> {
        self.add_case(name, options, Some(Rc::new(body)), false, false, false)
    }

    /// Focused case
    #[track_caller]
    pub fn fit(&mut self, name: &str, body: impl Fn(&mut CaseCtx) -> Result<()> + 'static) -> Result<()> {
        self.add_case(name, CaseOptions::default(), Some(Rc::new(body)), true, false, false)
    }

    /// Excluded case; the body is discarded and replaced with a no-op
    #[track_caller]
    pub fn xit(&mut self, name: &str, _body: impl Fn(&mut CaseCtx) -> Result<()> + 'static) -> Result<()> {
        self.add_case(name, CaseOptions::default(), None, false, true, false)
    }

    /// Case whose body may use the cooperative suspension points
    #[track_caller]
    pub fn it_async(&mut self, name: &str, body: impl Fn(&mut CaseCtx) -> Result<()> + 'static) -> Result<()> {
        self.add_case(name, CaseOptions::default(), Some(Rc::new(body)), false, false, true)
    }

    #[track_caller]
    pub fn it_async_with(
        &mut self,
        name: &str,
        options: CaseOptions,
        body: impl Fn(&mut CaseCtx) -> Result<()> + 'static,
    ) -> Result<()> {
        self.add_case(name, options, Some(Rc::new(body)), false, false, true)
    }

    #[track_caller]
    fn add_case(
        &mut self,
        name: &str,
        options: CaseOptions,
        body: Option<CaseBody>,
        focused: bool,
        excluded: bool,
        is_async: bool,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(VouchError::validation("case name must be non-empty"));
        }
        let location = std::panic::Location::caller();
        let parent = self.current();
        let mut node = TestNode::suite(name);
        node.kind = NodeKind::Case;
        node.parent = Rc::downgrade(&parent);
        node.tags = self.effective_tags(&options.tags);
        node.excluded = excluded;
        node.focused = focused && !excluded;
        node.expect_error = options.expect_error;
        node.timeout_ms = options.timeout_ms;
        node.is_async = is_async;
        node.body = if excluded {
            Some(Rc::new(|_: &mut CaseCtx| Ok(())))
        } else {
            body
        };
        node.declared_at = Some((location.file().to_string(), location.line()));
        if node.focused {
            self.focus_mode = true;
        }
        parent
            .borrow_mut()
            .children
            .push(Rc::new(RefCell::new(node)));
        Ok(())
    }

    /// Register a setup hook at the current suite depth
    pub fn before(&mut self, hook: impl Fn(&mut CaseCtx) -> Result<()> + 'static) {
        self.current().borrow_mut().before_hooks.push(Rc::new(hook));
    }

    /// Register a teardown hook at the current suite depth
    pub fn after(&mut self, hook: impl Fn(&mut CaseCtx) -> Result<()> + 'static) {
        self.current().borrow_mut().after_hooks.push(Rc::new(hook));
    }

    /// Tags applied to the next `describe`/`it` declaration
    pub fn tags(&mut self, tags: &[&str]) {
        self.pending_tags = tags.iter().map(|t| t.to_string()).collect();
    }

    /// Activate the tag filter for this run
    pub fn only_tags(&mut self, tags: &[&str]) {
        self.filters.only_tags(tags);
    }

    /// Activate the fully-qualified-name filter; VALIDATION on an invalid
    /// pattern
    pub fn filter(&mut self, pattern: &str) -> Result<()> {
        self.filters.set_name_filter(pattern)
    }

    pub(crate) fn filters(&self) -> &Filters {
        &self.filters
    }

    /// Execute the declared tree against an engine, emitting events to
    /// `reporting` and returning the aggregated outcome.
    pub fn run(
        &self,
        engine: &crate::Engine,
        reporting: &mut crate::report::Reporting,
        file_label: &str,
    ) -> FileOutcome {
        exec::execute_tree(self, engine, reporting, file_label)
    }

    /// Clear the declared tree, counters, pending tags, filters, hooks,
    /// and focus mode. The assertion path registry is global and survives.
    pub fn reset(&mut self) {
        let root = Rc::new(RefCell::new(TestNode::suite("")));
        self.decl_stack = vec![root.clone()];
        self.root = root;
        self.focus_mode = false;
        self.filters.clear();
        self.pending_tags.clear();
    }
}
