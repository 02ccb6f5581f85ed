//! Mock objects: stubs and property stubs over one target with guaranteed
//! restoration and declarative call expectations

use super::matchers::{match_args, Matcher};
use super::spy::Spy;
use super::stub::Stub;
use crate::error::{Result, VouchError};
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

struct CallExpectation {
    method: String,
    exact: Option<usize>,
    at_least: Option<usize>,
    at_most: Option<usize>,
    with_args: Option<Vec<Matcher>>,
    never: bool,
    before: Option<String>,
    after: Option<String>,
}

impl CallExpectation {
    fn bare(method: String) -> Self {
        Self {
            method,
            exact: None,
            at_least: None,
            at_most: None,
            with_args: None,
            never: false,
            before: None,
            after: None,
        }
    }

    fn has_count_constraint(&self) -> bool {
        self.exact.is_some() || self.at_least.is_some() || self.at_most.is_some() || self.never
    }
}

struct MockInner {
    target: Value,
    seq: Rc<Cell<u64>>,
    verify_all: bool,
    restored: Cell<bool>,
    /// Pre-mock member values, captured on first stub/spy per name.
    /// A nil snapshot means the member did not exist.
    original_members: RefCell<BTreeMap<String, Value>>,
    original_props: RefCell<BTreeMap<String, Value>>,
    stubs: RefCell<BTreeMap<String, Stub>>,
    /// Recording handle per method, whether stubbed or merely spied
    recorders: RefCell<BTreeMap<String, Spy>>,
    expectations: RefCell<Vec<CallExpectation>>,
}

/// Handle to a mocked target
#[derive(Clone)]
pub struct MockObject {
    inner: Rc<MockInner>,
}

impl MockObject {
    pub fn create(seq: Rc<Cell<u64>>, target: &Value, verify_all: bool) -> Result<MockObject> {
        if target.as_table().is_none() {
            return Err(VouchError::validation(format!(
                "mock.create requires a table target, got {}",
                target.type_name()
            )));
        }
        Ok(MockObject {
            inner: Rc::new(MockInner {
                target: target.clone(),
                seq,
                verify_all,
                restored: Cell::new(false),
                original_members: RefCell::new(BTreeMap::new()),
                original_props: RefCell::new(BTreeMap::new()),
                stubs: RefCell::new(BTreeMap::new()),
                recorders: RefCell::new(BTreeMap::new()),
                expectations: RefCell::new(Vec::new()),
            }),
        })
    }

    pub fn target(&self) -> &Value {
        &self.inner.target
    }

    fn snapshot_member(&self, name: &str) {
        self.inner
            .original_members
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| self.inner.target.get(name));
    }

    /// Replace a method with a stub. Restubbing the same name keeps the
    /// original pre-mock snapshot, so restore still reverts fully.
    pub fn stub(&self, name: &str, replacement: impl Into<Value>) -> Result<Stub> {
        self.snapshot_member(name);
        let stub = Stub::on(
            self.inner.seq.clone(),
            &self.inner.target,
            name,
            replacement.into(),
        )?;
        self.inner
            .recorders
            .borrow_mut()
            .insert(name.to_string(), (*stub).clone());
        self.inner
            .stubs
            .borrow_mut()
            .insert(name.to_string(), stub.clone());
        Ok(stub)
    }

    /// Replace a plain property value
    pub fn stub_property(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.inner
            .original_props
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| self.inner.target.get(name));
        self.inner.target.set(name, value.into())
    }

    /// Declare a call expectation for a method, spying on it if it is not
    /// already stubbed. Verified by [`verify`](Self::verify) or on restore
    /// when `verify_all` is set.
    pub fn expect(&self, method: &str) -> Result<ExpectBuilder> {
        if !self.inner.recorders.borrow().contains_key(method) {
            self.snapshot_member(method);
            let spy = Spy::on(self.inner.seq.clone(), &self.inner.target, method)?;
            self.inner
                .recorders
                .borrow_mut()
                .insert(method.to_string(), spy);
        }
        let index = {
            let mut expectations = self.inner.expectations.borrow_mut();
            expectations.push(CallExpectation::bare(method.to_string()));
            expectations.len() - 1
        };
        Ok(ExpectBuilder {
            inner: self.inner.clone(),
            index,
        })
    }

    fn records_for(&self, method: &str) -> Vec<super::spy::CallRecord> {
        self.inner
            .recorders
            .borrow()
            .get(method)
            .map(|spy| spy.calls())
            .unwrap_or_default()
    }

    /// Check every declared expectation against the recorded calls
    pub fn verify(&self) -> Result<()> {
        let mut problems = Vec::new();
        let expectations = self.inner.expectations.borrow();
        for expectation in expectations.iter() {
            self.verify_one(expectation, &mut problems);
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(VouchError::assertion_failure(format!(
                "mock verification failed:\n  {}",
                problems.join("\n  ")
            )))
        }
    }

    fn verify_one(&self, expectation: &CallExpectation, problems: &mut Vec<String>) {
        let records = self.records_for(&expectation.method);
        let matching: Vec<_> = records
            .iter()
            .filter(|record| match &expectation.with_args {
                Some(matchers) => match_args(matchers, &record.args),
                None => true,
            })
            .collect();
        let count = matching.len();
        let method = &expectation.method;

        if expectation.never {
            if count > 0 {
                problems.push(format!("{} expected no calls, got {}", method, count));
            }
        } else if let Some(exact) = expectation.exact {
            if count != exact {
                problems.push(format!("{} expected {} calls, got {}", method, exact, count));
            }
        } else {
            if let Some(min) = expectation.at_least {
                if count < min {
                    problems.push(format!(
                        "{} expected at least {} calls, got {}",
                        method, min, count
                    ));
                }
            }
            if let Some(max) = expectation.at_most {
                if count > max {
                    problems.push(format!(
                        "{} expected at most {} calls, got {}",
                        method, max, count
                    ));
                }
            }
            if !expectation.has_count_constraint() && count == 0 {
                problems.push(format!("{} expected to be called, got 0 calls", method));
            }
        }

        let first_seq = matching.first().map(|record| record.seq);
        if let Some(other) = &expectation.before {
            let other_first = self.records_for(other).first().map(|r| r.seq);
            match (first_seq, other_first) {
                (Some(a), Some(b)) if a < b => {}
                _ => problems.push(format!("{} expected to be called before {}", method, other)),
            }
        }
        if let Some(other) = &expectation.after {
            let other_first = self.records_for(other).first().map(|r| r.seq);
            match (first_seq, other_first) {
                (Some(a), Some(b)) if a > b => {}
                _ => problems.push(format!("{} expected to be called after {}", method, other)),
            }
        }
    }

    /// Revert the target to its exact pre-mock state, then report the
    /// verification result when `verify_all` is set. Idempotent.
    pub fn restore(&self) -> Result<()> {
        if self.inner.restored.replace(true) {
            return Ok(());
        }
        let verify_result = if self.inner.verify_all && !self.inner.expectations.borrow().is_empty()
        {
            self.verify()
        } else {
            Ok(())
        };

        for (name, original) in self.inner.original_members.borrow().iter() {
            let _ = self.inner.target.set(name, original.clone());
        }
        for (name, original) in self.inner.original_props.borrow().iter() {
            let _ = self.inner.target.set(name, original.clone());
        }
        verify_result
    }

    pub fn is_restored(&self) -> bool {
        self.inner.restored.get()
    }
}

/// Fluent builder over one declared expectation
pub struct ExpectBuilder {
    inner: Rc<MockInner>,
    index: usize,
}

impl ExpectBuilder {
    fn update(self, f: impl FnOnce(&mut CallExpectation)) -> Self {
        f(&mut self.inner.expectations.borrow_mut()[self.index]);
        self
    }

    /// Exactly `n` calls
    pub fn called(self, n: usize) -> Self {
        self.update(|e| e.exact = Some(n))
    }

    /// Alias for [`called`](Self::called)
    pub fn times(self, n: usize) -> Self {
        self.called(n)
    }

    pub fn at_least(self, n: usize) -> Self {
        self.update(|e| e.at_least = Some(n))
    }

    pub fn at_most(self, n: usize) -> Self {
        self.update(|e| e.at_most = Some(n))
    }

    /// Only calls whose arguments match count toward this expectation
    pub fn with_args(self, matchers: Vec<Matcher>) -> Self {
        self.update(|e| e.with_args = Some(matchers))
    }

    /// The method must never be called
    pub fn never(self) -> Self {
        self.update(|e| e.never = true)
    }

    /// First matching call must precede the first call of `other`
    pub fn before(self, other: &str) -> Self {
        let other = other.to_string();
        self.update(|e| e.before = Some(other))
    }

    pub fn after(self, other: &str) -> Self {
        let other = other.to_string();
        self.update(|e| e.after = Some(other))
    }
}
