//! Spies: callable wrappers that record calls and forward to the original
//!
//! Every call through any spy draws from one monotonic sequence counter,
//! giving a total order of calls across the whole substrate. Records carry
//! arguments, return values, the sequence number, and a timestamp.

use super::matchers::{match_args, Matcher};
use crate::error::{Result, VouchError};
use crate::value::{TableRef, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// One recorded invocation
#[derive(Clone)]
pub struct CallRecord {
    pub args: Vec<Value>,
    pub returns: Vec<Value>,
    /// Monotonic across all spies in the substrate
    pub seq: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

pub(crate) struct SpyInner {
    pub(crate) calls: RefCell<Vec<CallRecord>>,
    /// Target table and method name when wrapping a member
    target: Option<(TableRef, String)>,
    /// The wrapped function (or the pre-spy member value)
    pub(crate) original: Option<Value>,
    restored: Cell<bool>,
    seq: Rc<Cell<u64>>,
}

/// Handle to a spy; clones share the same record store
#[derive(Clone)]
pub struct Spy {
    pub(crate) inner: Rc<SpyInner>,
    /// The callable wrapper installed on the target (or handed out for
    /// standalone spies)
    wrapper: Value,
}

impl Spy {
    /// Replace `target[method]` with a recording wrapper that forwards to
    /// the original and returns whatever it returned.
    pub fn on(seq: Rc<Cell<u64>>, target: &Value, method: &str) -> Result<Spy> {
        let table = target
            .as_table()
            .ok_or_else(|| {
                VouchError::validation(format!(
                    "spy.on requires a table target, got {}",
                    target.type_name()
                ))
            })?
            .clone();
        let original = target.get(method);
        if !original.is_callable() {
            return Err(VouchError::validation(format!(
                "spy.on requires a callable member, '{}' is {}",
                method,
                original.type_name()
            )));
        }

        let inner = Rc::new(SpyInner {
            calls: RefCell::new(Vec::new()),
            target: Some((table, method.to_string())),
            original: Some(original.clone()),
            restored: Cell::new(false),
            seq,
        });
        let wrapper = make_forwarding_wrapper(inner.clone(), original);
        target.set(method, wrapper.clone())?;
        Ok(Spy { inner, wrapper })
    }

    /// Standalone spy around an optional function; calls return what the
    /// function returns, or nothing.
    pub fn new(seq: Rc<Cell<u64>>, func: Option<Value>) -> Spy {
        let inner = Rc::new(SpyInner {
            calls: RefCell::new(Vec::new()),
            target: None,
            original: func.clone(),
            restored: Cell::new(false),
            seq,
        });
        let wrapper = match func {
            Some(f) => make_forwarding_wrapper(inner.clone(), f),
            None => make_recording_wrapper(inner.clone(), |_| Ok(vec![])),
        };
        Spy { inner, wrapper }
    }

    pub(crate) fn from_parts(inner: Rc<SpyInner>, wrapper: Value) -> Spy {
        Spy { inner, wrapper }
    }

    pub(crate) fn make_inner(
        seq: Rc<Cell<u64>>,
        target: Option<(TableRef, String)>,
        original: Option<Value>,
    ) -> Rc<SpyInner> {
        Rc::new(SpyInner {
            calls: RefCell::new(Vec::new()),
            target,
            original,
            restored: Cell::new(false),
            seq,
        })
    }

    /// The recording callable; invoke it or install it somewhere
    pub fn callable(&self) -> Value {
        self.wrapper.clone()
    }

    pub fn call_count(&self) -> usize {
        self.inner.calls.borrow().len()
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.inner.calls.borrow().clone()
    }

    pub fn last_call(&self) -> Option<CallRecord> {
        self.inner.calls.borrow().last().cloned()
    }

    pub fn nth_call(&self, index: usize) -> Option<CallRecord> {
        self.inner.calls.borrow().get(index).cloned()
    }

    /// Called at all, or exactly `n` times
    pub fn was_called(&self, times: Option<usize>) -> bool {
        match times {
            Some(n) => self.call_count() == n,
            None => self.call_count() > 0,
        }
    }

    pub fn was_called_times(&self, times: usize) -> bool {
        self.was_called(Some(times))
    }

    /// Any recorded call matches the matcher sequence
    pub fn was_called_with(&self, matchers: &[Matcher]) -> bool {
        self.inner
            .calls
            .borrow()
            .iter()
            .any(|record| match_args(matchers, &record.args))
    }

    /// First call of self precedes first call of `other`
    pub fn was_called_before(&self, other: &Spy) -> bool {
        match (self.first_seq(), other.first_seq()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }

    pub fn was_called_after(&self, other: &Spy) -> bool {
        other.was_called_before(self)
    }

    pub(crate) fn first_seq(&self) -> Option<u64> {
        self.inner.calls.borrow().first().map(|r| r.seq)
    }

    /// Put the original member back. Idempotent; standalone spies only
    /// flip their flag.
    pub fn restore(&self) {
        if self.inner.restored.replace(true) {
            return;
        }
        if let (Some((table, method)), Some(original)) =
            (&self.inner.target, &self.inner.original)
        {
            table
                .borrow_mut()
                .insert(method.clone(), original.clone());
        }
    }

    pub fn is_restored(&self) -> bool {
        self.inner.restored.get()
    }
}

/// Record the call, then forward to `body` for the return values. Errors
/// from the body are recorded with empty returns and propagated.
pub(crate) fn make_recording_wrapper(
    inner: Rc<SpyInner>,
    body: impl Fn(&[Value]) -> Result<Vec<Value>> + 'static,
) -> Value {
    Value::func(move |args| {
        let seq = inner.seq.get() + 1;
        inner.seq.set(seq);
        let outcome = body(args);
        let returns = match &outcome {
            Ok(values) => values.clone(),
            Err(_) => Vec::new(),
        };
        inner.calls.borrow_mut().push(CallRecord {
            args: args.to_vec(),
            returns,
            seq,
            timestamp: chrono::Utc::now(),
        });
        outcome
    })
}

fn make_forwarding_wrapper(inner: Rc<SpyInner>, original: Value) -> Value {
    make_recording_wrapper(inner, move |args| original.call(args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::matchers;

    fn counter() -> Rc<Cell<u64>> {
        Rc::new(Cell::new(0))
    }

    fn adder_target() -> Value {
        Value::table(vec![(
            "add",
            Value::func(|args| {
                let a = args.first().and_then(Value::as_num).unwrap_or(0.0);
                let b = args.get(1).and_then(Value::as_num).unwrap_or(0.0);
                Ok(vec![Value::num(a + b), Value::str("ok")])
            }),
        )])
    }

    #[test]
    fn test_spy_on_forwards_multi_value() {
        let target = adder_target();
        let spy = Spy::on(counter(), &target, "add").unwrap();
        let out = target.get("add").call(&[Value::num(2), Value::num(3)]).unwrap();
        assert_eq!(out[0].as_num(), Some(5.0));
        assert_eq!(out[1].as_str(), Some("ok"));
        assert_eq!(spy.call_count(), 1);
        let record = spy.last_call().unwrap();
        assert_eq!(record.args.len(), 2);
        assert_eq!(record.returns[0].as_num(), Some(5.0));
    }

    #[test]
    fn test_spy_on_non_callable_member_fails() {
        let target = Value::table(vec![("n", Value::num(1))]);
        assert!(Spy::on(counter(), &target, "n").is_err());
        assert!(Spy::on(counter(), &Value::num(1), "x").is_err());
    }

    #[test]
    fn test_standalone_spy_records() {
        let spy = Spy::new(counter(), None);
        spy.callable().call(&[Value::str("a")]).unwrap();
        spy.callable().call(&[]).unwrap();
        assert!(spy.was_called(Some(2)));
        assert_eq!(spy.nth_call(0).unwrap().args[0].as_str(), Some("a"));
    }

    #[test]
    fn test_was_called_with_matchers() {
        let spy = Spy::new(counter(), None);
        spy.callable()
            .call(&[Value::num(1), Value::str("x")])
            .unwrap();
        assert!(spy.was_called_with(&[matchers::number(), matchers::string()]));
        assert!(!spy.was_called_with(&[matchers::string(), matchers::string()]));
    }

    #[test]
    fn test_sequence_numbers_total_order() {
        let seq = counter();
        let a = Spy::new(seq.clone(), None);
        let b = Spy::new(seq.clone(), None);
        a.callable().call(&[]).unwrap();
        b.callable().call(&[]).unwrap();
        a.callable().call(&[]).unwrap();

        assert_eq!(a.nth_call(0).unwrap().seq, 1);
        assert_eq!(b.nth_call(0).unwrap().seq, 2);
        assert_eq!(a.nth_call(1).unwrap().seq, 3);
        assert!(a.was_called_before(&b));
        assert!(b.was_called_after(&a));
    }

    #[test]
    fn test_restore_puts_original_back() {
        let target = adder_target();
        let original = target.get("add");
        let spy = Spy::on(counter(), &target, "add").unwrap();
        assert!(!target.get("add").ref_eq(&original));
        spy.restore();
        assert!(target.get("add").ref_eq(&original));
        // idempotent
        spy.restore();
        assert!(target.get("add").ref_eq(&original));
    }

    #[test]
    fn test_error_from_original_recorded_and_propagated() {
        let target = Value::table(vec![(
            "boom",
            Value::func(|_| Err(VouchError::runtime("no"))),
        )]);
        let spy = Spy::on(counter(), &target, "boom").unwrap();
        assert!(target.get("boom").call(&[]).is_err());
        assert_eq!(spy.call_count(), 1);
        assert!(spy.last_call().unwrap().returns.is_empty());
    }
}
