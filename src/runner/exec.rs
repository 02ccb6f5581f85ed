//! Case execution
//!
//! Depth-first, left-to-right walk of the declared tree. Around every case
//! the scheduler pushes a test context (temp files, per-case assertion
//! counter, coverage frame), runs inherited `before` hooks root-to-leaf,
//! the body, and `after` hooks leaf-to-root (reverse registration order
//! within a level), all under protected execution, then derives the final
//! status and emits events.

use super::{CaseRecord, FileOutcome, NodeKind, NodeRef, Runner, Status};
use crate::assertion::{AssertionSink, Expectation};
use crate::coverage::Coverage;
use crate::error::{try_protected, Result, VouchError};
use crate::fsys::TempRegistry;
use crate::mock::{MockObject, MockRegistry, MockScope, Spy, Stub};
use crate::report::{Reporting, SuiteAggregate};
use crate::task::{self, Deadline};
use crate::value::Value;
use crate::Engine;
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

/// The per-case execution surface handed to hooks and bodies
pub struct CaseCtx {
    coverage: Rc<RefCell<Coverage>>,
    temp: Rc<RefCell<TempRegistry>>,
    mocks: Rc<RefCell<MockRegistry>>,
    assertions: Rc<Cell<usize>>,
    deadline: Deadline,
}

impl CaseCtx {
    fn new(engine: &Engine, deadline: Deadline) -> CaseCtx {
        CaseCtx {
            coverage: engine.coverage.clone(),
            temp: engine.temp.clone(),
            mocks: engine.mocks.clone(),
            assertions: Rc::new(Cell::new(0)),
            deadline,
        }
    }

    /// Capture a value for a fluent assertion wired into this case
    #[track_caller]
    pub fn expect(&self, value: impl Into<Value>) -> Expectation {
        let location = std::panic::Location::caller();
        Expectation::new_at(
            value.into(),
            location.file(),
            location.line(),
            Some(AssertionSink {
                coverage: self.coverage.clone(),
                counter: self.assertions.clone(),
            }),
        )
    }

    /// Mark the case skipped with a reason; return this from the body
    pub fn pending(&self, reason: &str) -> Result<()> {
        Err(VouchError::pending_marker(reason))
    }

    pub fn assertion_count(&self) -> usize {
        self.assertions.get()
    }

    // --- coverage instrumentation ---

    /// Report a line-execution event
    pub fn track(&self, file: &str, line: u32) {
        self.coverage.borrow_mut().track(file, line);
    }

    /// Push a user frame for the duration of the returned guard; the
    /// assertion engine credits the deepest live frame on a pass.
    pub fn enter_frame(&self, file: &str, line: u32) -> FrameGuard {
        self.coverage.borrow_mut().push_frame(file, line);
        self.coverage.borrow_mut().track(file, line);
        FrameGuard {
            coverage: self.coverage.clone(),
        }
    }

    /// Call a host function; a source anchor on the function is tracked
    /// and becomes the live user frame while it runs, so assertions made
    /// during the call credit the function's line.
    pub fn call_tracked(&self, func: &Value, args: &[Value]) -> Result<Vec<Value>> {
        if let Value::Func(inner) = func {
            if let Some((file, line)) = inner.anchor() {
                let _frame = self.enter_frame(file, line);
                return func.call(args);
            }
        }
        func.call(args)
    }

    // --- temp files ---

    pub fn create_temp_file(&self, content: Option<&str>, suffix: Option<&str>) -> Result<PathBuf> {
        self.temp.borrow_mut().create_temp_file(content, suffix)
    }

    pub fn create_temp_dir(&self) -> Result<PathBuf> {
        self.temp.borrow_mut().create_temp_dir()
    }

    pub fn register_temp(&self, path: PathBuf) {
        self.temp.borrow_mut().register(path);
    }

    // --- mocking ---

    pub fn spy_on(&self, target: &Value, method: &str) -> Result<Spy> {
        self.mocks.borrow_mut().spy_on(target, method)
    }

    pub fn spy_new(&self, func: Option<Value>) -> Spy {
        self.mocks.borrow_mut().spy_new(func)
    }

    pub fn stub_on(&self, target: &Value, method: &str, replacement: impl Into<Value>) -> Result<Stub> {
        self.mocks.borrow_mut().stub_on(target, method, replacement)
    }

    pub fn stub_new(&self, replacement: impl Into<Value>) -> Stub {
        self.mocks.borrow_mut().stub_new(replacement)
    }

    pub fn mock(&self, target: &Value) -> Result<MockObject> {
        self.mocks.borrow_mut().mock(target)
    }

    pub fn mock_with(&self, target: &Value, verify_all: bool) -> Result<MockObject> {
        self.mocks.borrow_mut().mock_with(target, verify_all)
    }

    /// Scoped mocking: everything created inside is restored on exit
    pub fn with_mocks<R>(&self, f: impl FnOnce(&MockScope) -> Result<R>) -> Result<R> {
        crate::mock::with_mocks(&self.mocks, f)
    }

    // --- cooperative suspension points ---

    /// Suspend for at least `ms`; TIMEOUT when the case deadline expires
    pub fn await_ms(&self, ms: u64) -> Result<()> {
        self.deadline.check()?;
        match self.deadline.remaining_ms() {
            Some(remaining) if remaining < ms => {
                task::sleep_for(remaining);
                Err(VouchError::timeout("case deadline exceeded during await"))
            }
            _ => {
                task::sleep_for(ms);
                Ok(())
            }
        }
    }

    /// Poll a predicate; TIMEOUT at the earlier of the given timeout and
    /// the case deadline
    pub fn wait_until(
        &self,
        predicate: impl FnMut() -> bool,
        timeout_ms: u64,
        interval_ms: u64,
    ) -> Result<()> {
        self.deadline.check()?;
        let bounded = match self.deadline.remaining_ms() {
            Some(remaining) => timeout_ms.min(remaining),
            None => timeout_ms,
        };
        task::wait_until(predicate, bounded, interval_ms)
    }

    /// Run closures on parallel tasks and await completion of all
    pub fn parallel_async(
        &self,
        tasks: Vec<Box<dyn FnOnce() -> Result<()> + Send>>,
        timeout_ms: u64,
    ) -> Result<()> {
        self.deadline.check()?;
        let bounded = match self.deadline.remaining_ms() {
            Some(remaining) => timeout_ms.min(remaining),
            None => timeout_ms,
        };
        task::run_parallel(tasks, bounded)
    }
}

/// Pops its coverage frame on drop
pub struct FrameGuard {
    coverage: Rc<RefCell<Coverage>>,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.coverage.borrow_mut().pop_frame();
    }
}

/// Execute the declared tree and aggregate a file outcome
pub(crate) fn execute_tree(
    runner: &Runner,
    engine: &Engine,
    reporting: &mut Reporting,
    file_label: &str,
) -> FileOutcome {
    let started = Instant::now();
    let mut outcome = FileOutcome {
        file: file_label.to_string(),
        ..FileOutcome::default()
    };

    let root = runner.root();
    let mut ancestors = vec![root.clone()];
    let mut names = Vec::new();
    let children: Vec<NodeRef> = root.borrow().children.clone();
    for child in children {
        visit(
            runner, engine, reporting, &mut outcome, child, &mut ancestors, &mut names, false,
            false,
        );
    }

    outcome.duration_ns = started.elapsed().as_nanos() as u64;
    outcome
}

#[allow(clippy::too_many_arguments)]
fn visit(
    runner: &Runner,
    engine: &Engine,
    reporting: &mut Reporting,
    outcome: &mut FileOutcome,
    node: NodeRef,
    ancestors: &mut Vec<NodeRef>,
    names: &mut Vec<String>,
    inherited_excluded: bool,
    inherited_focused: bool,
) -> SuiteAggregate {
    let (kind, name, node_excluded, node_focused) = {
        let node = node.borrow();
        (node.kind, node.name.clone(), node.excluded, node.focused)
    };
    let excluded = inherited_excluded || node_excluded;
    // exclusion cuts focus: a focused node under an excluded suite stays out
    let focused = !excluded && (inherited_focused || node_focused);

    let mut aggregate = SuiteAggregate::default();
    match kind {
        NodeKind::Suite => {
            reporting.suite_started(&name);
            ancestors.push(node.clone());
            names.push(name.clone());
            let children: Vec<NodeRef> = node.borrow().children.clone();
            for child in children {
                let child_aggregate = visit(
                    runner, engine, reporting, outcome, child, ancestors, names, excluded, focused,
                );
                aggregate.passed += child_aggregate.passed;
                aggregate.failed += child_aggregate.failed;
                aggregate.skipped += child_aggregate.skipped;
                aggregate.errored += child_aggregate.errored;
            }
            names.pop();
            ancestors.pop();
            reporting.suite_finished(&name, &aggregate);
        }
        NodeKind::Case => {
            let fqn = fqn_of(names, &name);
            let record = run_case(
                runner, engine, reporting, &node, ancestors, &fqn, excluded, focused,
            );
            aggregate.count(record.status);
            outcome.count(record.status);
            outcome.records.push(record);
        }
    }
    aggregate
}

fn fqn_of(names: &[String], case_name: &str) -> String {
    if names.is_empty() {
        case_name.to_string()
    } else {
        format!("{} {}", names.join(" "), case_name)
    }
}

fn skipped_record(fqn: &str, reason: &str) -> CaseRecord {
    CaseRecord {
        name: fqn.to_string(),
        status: Status::Skipped,
        failure: None,
        duration_ns: 0,
        assertion_count: 0,
        hook_errors: Vec::new(),
        skip_reason: Some(reason.to_string()),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_case(
    runner: &Runner,
    engine: &Engine,
    reporting: &mut Reporting,
    case: &NodeRef,
    ancestors: &[NodeRef],
    fqn: &str,
    excluded: bool,
    focused: bool,
) -> CaseRecord {
    // gate order: exclusion beats focus beats filters
    if excluded {
        let record = skipped_record(fqn, "excluded");
        reporting.test_finished(&record);
        return record;
    }
    if runner.focus_mode() && !focused {
        let record = skipped_record(fqn, "not focused");
        reporting.test_finished(&record);
        return record;
    }
    let tags = case.borrow().tags.clone();
    if let Some(reason) = runner.filters().skip_reason(fqn, &tags) {
        let record = skipped_record(fqn, &reason);
        reporting.test_finished(&record);
        return record;
    }

    reporting.test_started(fqn);
    let started = Instant::now();
    let (expect_error, timeout_ms, declared_at, body) = {
        let case = case.borrow();
        (
            case.expect_error,
            case.timeout_ms,
            case.declared_at.clone(),
            case.body.clone(),
        )
    };

    // step 1: push the test context
    engine.temp.borrow_mut().push_context();
    let deadline = timeout_ms.map(Deadline::in_ms).unwrap_or_else(Deadline::none);
    let mut ctx = CaseCtx::new(engine, deadline);
    let pushed_frame = declared_at.as_ref().map(|(file, line)| {
        engine.coverage.borrow_mut().track(file, *line);
        engine.coverage.borrow_mut().push_frame(file, *line);
    });

    // step 2: before hooks, root to leaf, registration order
    let mut hook_errors = Vec::new();
    'before: for suite in ancestors {
        let hooks = suite.borrow().before_hooks.clone();
        for hook in hooks {
            if let Err(e) = try_protected(|| hook(&mut ctx)) {
                hook_errors.push(e);
                if !expect_error {
                    break 'before;
                }
            }
        }
    }

    // step 3: the body, unless a hook already doomed the case
    let mut body_failure: Option<VouchError> = None;
    let mut pending_reason: Option<String> = None;
    let hooks_failed = !hook_errors.is_empty() && !expect_error;
    if !hooks_failed {
        if let Some(body) = body {
            match try_protected(|| body(&mut ctx)) {
                Ok(()) => {
                    if deadline.expired() {
                        body_failure = Some(VouchError::timeout(format!(
                            "case exceeded its {} ms timeout",
                            timeout_ms.unwrap_or(0)
                        )));
                    }
                }
                Err(e) if e.is_pending() => pending_reason = Some(e.message.clone()),
                Err(e) => body_failure = Some(e),
            }
        }
    }

    // step 4: after hooks, leaf to root, reverse registration order
    for suite in ancestors.iter().rev() {
        let hooks = suite.borrow().after_hooks.clone();
        for hook in hooks.iter().rev() {
            if let Err(e) = try_protected(|| hook(&mut ctx)) {
                hook_errors.push(e);
            }
        }
    }

    // step 5: final status
    let any_error = body_failure.is_some() || !hook_errors.is_empty();
    let (status, failure) = if let Some(_reason) = &pending_reason {
        (Status::Skipped, None)
    } else if expect_error {
        if any_error {
            (Status::Passed, None)
        } else {
            (
                Status::Failed,
                Some(VouchError::assertion_failure(
                    "expected an error, but none occurred",
                )),
            )
        }
    } else if body_failure.is_none() && !hook_errors.is_empty() {
        (Status::Errored, Some(hook_errors[0].clone()))
    } else if let Some(failure) = body_failure {
        let status = if !hook_errors.is_empty() {
            Status::Errored
        } else {
            Status::Failed
        };
        (status, Some(failure))
    } else {
        (Status::Passed, None)
    };

    // step 6: pop the test context; leaked mock scopes close here too
    engine.mocks.borrow_mut().reset();
    if pushed_frame.is_some() {
        engine.coverage.borrow_mut().pop_frame();
    }
    engine.temp.borrow_mut().pop_context();

    let record = CaseRecord {
        name: fqn.to_string(),
        status,
        failure,
        duration_ns: started.elapsed().as_nanos() as u64,
        assertion_count: ctx.assertion_count(),
        hook_errors,
        skip_reason: pending_reason,
    };

    // step 7: emit the event
    reporting.test_finished(&record);
    record
}
