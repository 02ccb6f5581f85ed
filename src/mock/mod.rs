//! Mocking substrate
//!
//! Spies record calls and forward; stubs record and return programmed
//! values; mock objects own stubs and property stubs on a target with
//! guaranteed restoration; matchers qualify arguments in verification.
//! One sequence counter orders every call across the substrate, and
//! [`with_mocks`] scopes restoration so nothing mocked leaks past the
//! scope, panic or not.

pub mod matchers;
mod mock_object;
mod spy;
mod stub;

pub use mock_object::{ExpectBuilder, MockObject};
pub use spy::{CallRecord, Spy};
pub use stub::{ExhaustPolicy, Stub};

use crate::error::{try_protected, Result, VouchError};
use crate::value::Value;
use matchers::{match_args, Matcher};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

enum Restorable {
    Spy(Spy),
    Stub(Stub),
    Mock(MockObject),
}

/// Substrate state: the global sequence counter and the scope stack
pub struct MockRegistry {
    seq: Rc<Cell<u64>>,
    scopes: Vec<Vec<Restorable>>,
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRegistry {
    pub fn new() -> Self {
        Self {
            seq: Rc::new(Cell::new(0)),
            scopes: Vec::new(),
        }
    }

    pub fn seq_counter(&self) -> Rc<Cell<u64>> {
        self.seq.clone()
    }

    fn track(&mut self, item: Restorable) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(item);
        }
    }

    /// Wrap `target[method]` with a recording spy. Registered for scoped
    /// restoration when a [`with_mocks`] scope is open.
    pub fn spy_on(&mut self, target: &Value, method: &str) -> Result<Spy> {
        let spy = Spy::on(self.seq.clone(), target, method)?;
        self.track(Restorable::Spy(spy.clone()));
        Ok(spy)
    }

    pub fn spy_new(&mut self, func: Option<Value>) -> Spy {
        let spy = Spy::new(self.seq.clone(), func);
        self.track(Restorable::Spy(spy.clone()));
        spy
    }

    pub fn stub_on(&mut self, target: &Value, method: &str, replacement: impl Into<Value>) -> Result<Stub> {
        let stub = Stub::on(self.seq.clone(), target, method, replacement.into())?;
        self.track(Restorable::Stub(stub.clone()));
        Ok(stub)
    }

    pub fn stub_new(&mut self, replacement: impl Into<Value>) -> Stub {
        let stub = Stub::new(self.seq.clone(), replacement.into());
        self.track(Restorable::Stub(stub.clone()));
        stub
    }

    pub fn mock(&mut self, target: &Value) -> Result<MockObject> {
        self.mock_with(target, true)
    }

    pub fn mock_with(&mut self, target: &Value, verify_all: bool) -> Result<MockObject> {
        let mock = MockObject::create(self.seq.clone(), target, verify_all)?;
        self.track(Restorable::Mock(mock.clone()));
        Ok(mock)
    }

    fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Restore everything in the top scope, LIFO. The first verification
    /// failure is reported after all restorations ran.
    fn pop_scope(&mut self) -> Result<()> {
        let Some(scope) = self.scopes.pop() else {
            return Ok(());
        };
        let mut first_error = None;
        for item in scope.into_iter().rev() {
            let outcome = match item {
                Restorable::Spy(spy) => {
                    spy.restore();
                    Ok(())
                }
                Restorable::Stub(stub) => {
                    stub.restore();
                    Ok(())
                }
                Restorable::Mock(mock) => mock.restore(),
            };
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Tear down any scopes still open (end-of-case safety net). The
    /// sequence counter keeps running; it is monotonic per worker.
    pub fn reset(&mut self) {
        while !self.scopes.is_empty() {
            let _ = self.pop_scope();
        }
    }

    pub fn open_scopes(&self) -> usize {
        self.scopes.len()
    }
}

/// Creation surface handed to a [`with_mocks`] body; everything created
/// through it restores when the scope exits.
pub struct MockScope {
    registry: Rc<RefCell<MockRegistry>>,
}

impl MockScope {
    pub fn spy_on(&self, target: &Value, method: &str) -> Result<Spy> {
        self.registry.borrow_mut().spy_on(target, method)
    }

    pub fn spy_new(&self, func: Option<Value>) -> Spy {
        self.registry.borrow_mut().spy_new(func)
    }

    pub fn stub_on(&self, target: &Value, method: &str, replacement: impl Into<Value>) -> Result<Stub> {
        self.registry.borrow_mut().stub_on(target, method, replacement)
    }

    pub fn stub_new(&self, replacement: impl Into<Value>) -> Stub {
        self.registry.borrow_mut().stub_new(replacement)
    }

    pub fn mock(&self, target: &Value) -> Result<MockObject> {
        self.registry.borrow_mut().mock(target)
    }

    pub fn mock_with(&self, target: &Value, verify_all: bool) -> Result<MockObject> {
        self.registry.borrow_mut().mock_with(target, verify_all)
    }
}

/// Run `f` under a fresh mock scope. On any exit (normal return, error,
/// or panic) every spy, stub, and mock created in the scope is restored
/// in LIFO order. Body errors win over restoration errors.
pub fn with_mocks<R>(
    registry: &Rc<RefCell<MockRegistry>>,
    f: impl FnOnce(&MockScope) -> Result<R>,
) -> Result<R> {
    registry.borrow_mut().push_scope();
    let scope = MockScope {
        registry: registry.clone(),
    };
    let body = try_protected(|| f(&scope));
    let restore = registry.borrow_mut().pop_scope();
    match body {
        Err(e) => Err(e),
        Ok(value) => restore.map(|_| value),
    }
}

/// One step of an expected call sequence
pub struct SeqStep {
    pub spy: Spy,
    pub args: Option<Vec<Matcher>>,
}

impl SeqStep {
    pub fn of(spy: &Spy) -> Self {
        Self {
            spy: spy.clone(),
            args: None,
        }
    }

    pub fn with_args(spy: &Spy, args: Vec<Matcher>) -> Self {
        Self {
            spy: spy.clone(),
            args: Some(args),
        }
    }
}

/// Check that the given calls occurred in sequence-number order. They need
/// not be adjacent unless `strict` is set.
pub fn verify_sequence(steps: &[SeqStep], strict: bool) -> Result<()> {
    let mut last_seq: Option<u64> = None;
    for (index, step) in steps.iter().enumerate() {
        let calls = step.spy.calls();
        let found = calls.iter().find(|record| {
            last_seq.map_or(true, |last| record.seq > last)
                && step
                    .args
                    .as_ref()
                    .map_or(true, |matchers| match_args(matchers, &record.args))
        });
        let record = found.ok_or_else(|| {
            VouchError::assertion_failure(format!(
                "sequence verification failed at step {}: no matching call after sequence {}",
                index + 1,
                last_seq.unwrap_or(0)
            ))
        })?;
        if strict {
            if let Some(last) = last_seq {
                if record.seq != last + 1 {
                    return Err(VouchError::assertion_failure(format!(
                        "sequence verification failed at step {}: expected sequence {} to directly follow {}, got {}",
                        index + 1,
                        last + 1,
                        last,
                        record.seq
                    )));
                }
            }
        }
        last_seq = Some(record.seq);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Rc<RefCell<MockRegistry>> {
        Rc::new(RefCell::new(MockRegistry::new()))
    }

    fn service() -> Value {
        Value::table(vec![
            ("m", Value::func(|_| Ok(vec![Value::str("real")]))),
            ("n", Value::func(|_| Ok(vec![Value::num(1)]))),
        ])
    }

    #[test]
    fn test_with_mocks_restores_on_normal_exit() {
        let reg = registry();
        let target = service();
        let original = target.get("m");

        with_mocks(&reg, |scope| {
            let mock = scope.mock_with(&target, false)?;
            mock.stub("m", Value::num(7))?;
            let out = target.get("m").call(&[])?;
            assert_eq!(out[0].as_num(), Some(7.0));
            Ok(())
        })
        .unwrap();

        assert!(target.get("m").ref_eq(&original));
        assert_eq!(reg.borrow().open_scopes(), 0);
    }

    #[test]
    fn test_with_mocks_restores_on_error() {
        let reg = registry();
        let target = service();
        let original = target.get("m");

        let result: Result<()> = with_mocks(&reg, |scope| {
            scope.stub_on(&target, "m", Value::num(7))?;
            Err(VouchError::runtime("body failed"))
        });
        assert!(result.is_err());
        assert!(target.get("m").ref_eq(&original));
    }

    #[test]
    fn test_with_mocks_restores_on_panic() {
        let reg = registry();
        let target = service();
        let original = target.get("m");

        let result: Result<()> = with_mocks(&reg, |scope| {
            scope.stub_on(&target, "m", Value::num(7))?;
            panic!("user code exploded");
        });
        let err = result.unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::Runtime);
        assert!(target.get("m").ref_eq(&original));
    }

    #[test]
    fn test_with_mocks_lifo_restoration() {
        let reg = registry();
        let target = service();
        let original = target.get("m");

        with_mocks(&reg, |scope| {
            scope.stub_on(&target, "m", Value::num(1))?;
            scope.stub_on(&target, "m", Value::num(2))?;
            Ok(())
        })
        .unwrap();

        // LIFO: the second stub restores to the first wrapper, then the
        // first stub restores to the true original
        assert!(target.get("m").ref_eq(&original));
    }

    #[test]
    fn test_with_mocks_surfaces_verification_failure() {
        let reg = registry();
        let target = service();
        let result: Result<()> = with_mocks(&reg, |scope| {
            let mock = scope.mock(&target)?;
            mock.expect("m")?.called(1);
            Ok(())
        });
        let err = result.unwrap_err();
        assert!(err.is_assertion_failure());
    }

    #[test]
    fn test_nested_scopes() {
        let reg = registry();
        let target = service();
        let original = target.get("m");

        with_mocks(&reg, |outer| {
            outer.stub_on(&target, "m", Value::num(1))?;
            with_mocks(&reg, |inner| {
                inner.stub_on(&target, "m", Value::num(2))?;
                assert_eq!(target.get("m").call(&[])?[0].as_num(), Some(2.0));
                Ok(())
            })?;
            // inner scope gone, outer stub visible again
            assert_eq!(target.get("m").call(&[])?[0].as_num(), Some(1.0));
            Ok(())
        })
        .unwrap();
        assert!(target.get("m").ref_eq(&original));
    }

    #[test]
    fn test_verify_sequence_in_order() {
        let reg = registry();
        let mut reg_mut = reg.borrow_mut();
        let a = reg_mut.spy_new(None);
        let b = reg_mut.spy_new(None);
        drop(reg_mut);

        a.callable().call(&[Value::num(1)]).unwrap();
        b.callable().call(&[]).unwrap();
        a.callable().call(&[Value::num(2)]).unwrap();

        verify_sequence(&[SeqStep::of(&a), SeqStep::of(&b), SeqStep::of(&a)], false).unwrap();
        assert!(verify_sequence(&[SeqStep::of(&b), SeqStep::of(&b)], false).is_err());
    }

    #[test]
    fn test_verify_sequence_with_args() {
        let reg = registry();
        let a = reg.borrow_mut().spy_new(None);
        a.callable().call(&[Value::num(1)]).unwrap();
        a.callable().call(&[Value::num(2)]).unwrap();

        verify_sequence(
            &[
                SeqStep::with_args(&a, vec![matchers::deep_eq(1)]),
                SeqStep::with_args(&a, vec![matchers::deep_eq(2)]),
            ],
            false,
        )
        .unwrap();
        assert!(verify_sequence(
            &[
                SeqStep::with_args(&a, vec![matchers::deep_eq(2)]),
                SeqStep::with_args(&a, vec![matchers::deep_eq(1)]),
            ],
            false,
        )
        .is_err());
    }

    #[test]
    fn test_verify_sequence_strict_requires_adjacency() {
        let reg = registry();
        let mut reg_mut = reg.borrow_mut();
        let a = reg_mut.spy_new(None);
        let b = reg_mut.spy_new(None);
        let c = reg_mut.spy_new(None);
        drop(reg_mut);

        a.callable().call(&[]).unwrap(); // seq 1
        c.callable().call(&[]).unwrap(); // seq 2
        b.callable().call(&[]).unwrap(); // seq 3

        verify_sequence(&[SeqStep::of(&a), SeqStep::of(&b)], false).unwrap();
        assert!(
            verify_sequence(&[SeqStep::of(&a), SeqStep::of(&b)], true).is_err(),
            "c's call sits between a and b"
        );
        verify_sequence(&[SeqStep::of(&a), SeqStep::of(&c), SeqStep::of(&b)], true).unwrap();
    }

    #[test]
    fn test_reset_closes_open_scopes() {
        let reg = registry();
        let target = service();
        let original = target.get("m");
        reg.borrow_mut().push_scope();
        reg.borrow_mut().stub_on(&target, "m", Value::num(9)).unwrap();
        reg.borrow_mut().reset();
        assert!(target.get("m").ref_eq(&original));
        assert_eq!(reg.borrow().open_scopes(), 0);
    }
}
