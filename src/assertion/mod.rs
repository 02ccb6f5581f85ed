//! Fluent assertion engine
//!
//! [`expect`] captures a value together with its callsite; chained words
//! walk the global path registry and the terminal word evaluates a
//! predicate. A passing assertion bumps the case's assertion counter and
//! signals the coverage engine to mark the deepest user frame verified.
//! A failing one raises a structured diagnostic with the callsite and the
//! rendered expected/actual pair.

pub mod compare;
mod registry;

pub use registry::{registry, PredOutcome, Predicate, Registry};

use crate::coverage::Coverage;
use crate::error::{Result, VouchError};
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Where an expectation was constructed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callsite {
    pub file: String,
    pub line: u32,
}

/// Hooks the assertion engine back into the running case: the assertion
/// counter and the coverage engine for verified-line signaling.
#[derive(Clone, Debug)]
pub struct AssertionSink {
    pub coverage: Rc<RefCell<Coverage>>,
    pub counter: Rc<Cell<usize>>,
}

/// A captured expectation: value, polarity, path cursor, callsite
#[derive(Debug)]
pub struct Expectation {
    value: Value,
    negated: bool,
    callsite: Callsite,
    sink: Option<AssertionSink>,
    custom_message: Option<String>,
}

/// Capture a value for assertion. The callsite is the caller's location.
#[track_caller]
pub fn expect(value: impl Into<Value>) -> Expectation {
    let location = std::panic::Location::caller();
    Expectation::new_at(value.into(), location.file(), location.line(), None)
}

impl Expectation {
    pub fn new_at(value: Value, file: &str, line: u32, sink: Option<AssertionSink>) -> Self {
        Self {
            value,
            negated: false,
            callsite: Callsite {
                file: file.to_string(),
                line,
            },
            sink,
            custom_message: None,
        }
    }

    pub fn attach(mut self, sink: AssertionSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Prefix for the failure diagnostic
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.custom_message = Some(message.into());
        self
    }

    pub fn callsite(&self) -> &Callsite {
        &self.callsite
    }

    /// Explicit positive polarity; reads as `expect(v).to().equal(x)`
    pub fn to(self) -> Self {
        self
    }

    /// The `to_not` word: toggles the negation flag
    pub fn to_not(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// Evaluate a dotted path like `to.equal` or `to_not.be.a` against
    /// the registry; the leading word picks the polarity.
    pub fn eval_path(self, dotted: &str, args: &[Value]) -> Result<Self> {
        let words: Vec<&str> = dotted.split('.').collect();
        if words.len() < 2 {
            return Err(VouchError::validation(format!(
                "assertion path must start with to/to_not and name a terminal: '{}'",
                dotted
            )));
        }
        let expectation = match words[0] {
            "to" => self,
            "to_not" => self.to_not(),
            other => {
                return Err(VouchError::validation(format!(
                    "assertion path must start with to/to_not, got '{}'",
                    other
                )))
            }
        };
        let terminal = words[words.len() - 1];
        let middle = &words[1..words.len() - 1];
        expectation.check(middle, terminal, args)
    }

    /// Walk the registry for `to.<rest...>.<terminal>` and evaluate.
    /// Unknown paths are VALIDATION errors; failed predicates are
    /// assertion diagnostics.
    pub fn check(mut self, rest: &[&str], terminal: &str, args: &[Value]) -> Result<Self> {
        let mut path: Vec<&str> = Vec::with_capacity(rest.len() + 2);
        path.push("to");
        path.extend_from_slice(rest);
        path.push(terminal);

        let predicate = registry().lookup(&path).ok_or_else(|| {
            VouchError::validation(format!("unknown assertion path '{}'", path.join(".")))
        })?;
        let outcome = predicate(&self.value, args)?;
        let pass = outcome.ok != self.negated;

        if pass {
            self.record_pass();
            if let Some(chained) = outcome.chain {
                self.value = chained;
            }
            self.negated = false;
            Ok(self)
        } else {
            let mut message = if self.negated {
                outcome.negative
            } else {
                outcome.positive
            };
            if let Some(prefix) = &self.custom_message {
                message = format!("{}: {}", prefix, message);
            }
            Err(VouchError::assertion_failure(format!(
                "{}:{}: {}",
                self.callsite.file, self.callsite.line, message
            ))
            .with_context("file", self.callsite.file.clone())
            .with_context("line", self.callsite.line.to_string()))
        }
    }

    fn record_pass(&self) {
        let Some(sink) = &self.sink else { return };
        sink.counter.set(sink.counter.get() + 1);
        let mut coverage = sink.coverage.borrow_mut();
        if coverage.is_active() {
            let (file, line) = match coverage.deepest_user_frame() {
                Some(frame) => (frame.file.clone(), frame.line),
                None => (self.callsite.file.clone(), self.callsite.line),
            };
            coverage.mark_line_covered(&file, line);
        }
    }

    // --- terminal words ---

    pub fn equal(self, expected: impl Into<Value>) -> Result<Self> {
        let expected = expected.into();
        self.check(&[], "equal", &[expected])
    }

    /// Numeric equality within a tolerance
    pub fn equal_within(self, expected: impl Into<Value>, epsilon: f64) -> Result<Self> {
        let expected = expected.into();
        self.check(&[], "deep_equal", &[expected, Value::num(epsilon)])
    }

    /// Reference equality
    pub fn be(self, expected: impl Into<Value>) -> Result<Self> {
        let expected = expected.into();
        self.check(&[], "be", &[expected])
    }

    /// Type (or prototype-shape) check: `expect(v).to().be().a("string")`
    /// collapses to the `to.be.a` path
    pub fn a(self, type_or_proto: impl Into<Value>) -> Result<Self> {
        let spec = type_or_proto.into();
        self.check(&["be"], "a", &[spec])
    }

    pub fn an(self, type_or_proto: impl Into<Value>) -> Result<Self> {
        let spec = type_or_proto.into();
        self.check(&["be"], "an", &[spec])
    }

    pub fn empty(self) -> Result<Self> {
        self.check(&["be"], "empty", &[])
    }

    pub fn exist(self) -> Result<Self> {
        self.check(&[], "exist", &[])
    }

    pub fn be_truthy(self) -> Result<Self> {
        self.check(&[], "be_truthy", &[])
    }

    pub fn be_falsy(self) -> Result<Self> {
        self.check(&[], "be_falsy", &[])
    }

    /// Substring or `*`-glob match
    pub fn matches(self, pattern: impl Into<String>) -> Result<Self> {
        self.check(&[], "match", &[Value::str(pattern.into())])
    }

    pub fn match_regex(self, pattern: impl Into<String>, case_insensitive: bool) -> Result<Self> {
        let options = Value::table(vec![("case_insensitive", Value::Bool(case_insensitive))]);
        self.check(&[], "match_regex", &[Value::str(pattern.into()), options])
    }

    pub fn start_with(self, prefix: impl Into<String>) -> Result<Self> {
        self.check(&[], "start_with", &[Value::str(prefix.into())])
    }

    pub fn end_with(self, suffix: impl Into<String>) -> Result<Self> {
        self.check(&[], "end_with", &[Value::str(suffix.into())])
    }

    pub fn contain(self, needle: impl Into<Value>) -> Result<Self> {
        let needle = needle.into();
        self.check(&[], "contain", &[needle])
    }

    pub fn have_key(self, key: impl Into<String>) -> Result<Self> {
        self.check(&[], "have_key", &[Value::str(key.into())])
    }

    pub fn have_keys(self, keys: &[&str]) -> Result<Self> {
        let keys = Value::seq(keys.iter().map(|k| Value::str(*k)).collect());
        self.check(&[], "have_keys", &[keys])
    }

    /// Chains: on success the captured value becomes the property value
    pub fn have_property(self, key: impl Into<String>) -> Result<Self> {
        self.check(&[], "have_property", &[Value::str(key.into())])
    }

    pub fn have_property_eq(self, key: impl Into<String>, expected: impl Into<Value>) -> Result<Self> {
        let expected = expected.into();
        self.check(&[], "have_property", &[Value::str(key.into()), expected])
    }

    pub fn have_length(self, length: usize) -> Result<Self> {
        self.check(&[], "have_length", &[Value::num(length as f64)])
    }

    pub fn match_schema(self, shape: impl Into<Value>) -> Result<Self> {
        let shape = shape.into();
        self.check(&[], "match_schema", &[shape])
    }

    pub fn be_greater_than(self, bound: impl Into<Value>) -> Result<Self> {
        let bound = bound.into();
        self.check(&[], "be_greater_than", &[bound])
    }

    pub fn be_less_than(self, bound: impl Into<Value>) -> Result<Self> {
        let bound = bound.into();
        self.check(&[], "be_less_than", &[bound])
    }

    pub fn be_at_least(self, bound: impl Into<Value>) -> Result<Self> {
        let bound = bound.into();
        self.check(&[], "be_at_least", &[bound])
    }

    pub fn be_at_most(self, bound: impl Into<Value>) -> Result<Self> {
        let bound = bound.into();
        self.check(&[], "be_at_most", &[bound])
    }

    pub fn be_between(self, low: impl Into<Value>, high: impl Into<Value>) -> Result<Self> {
        let (low, high) = (low.into(), high.into());
        self.check(&[], "be_between", &[low, high])
    }

    pub fn be_positive(self) -> Result<Self> {
        self.check(&[], "be_positive", &[])
    }

    pub fn be_negative(self) -> Result<Self> {
        self.check(&[], "be_negative", &[])
    }

    pub fn be_integer(self) -> Result<Self> {
        self.check(&[], "be_integer", &[])
    }

    pub fn be_uppercase(self) -> Result<Self> {
        self.check(&[], "be_uppercase", &[])
    }

    pub fn be_lowercase(self) -> Result<Self> {
        self.check(&[], "be_lowercase", &[])
    }

    /// The captured callable errors when invoked
    pub fn fail(self) -> Result<Self> {
        self.check(&[], "fail", &[])
    }

    pub fn fail_with(self, pattern: impl Into<String>) -> Result<Self> {
        self.check(&[], "fail_with", &[Value::str(pattern.into())])
    }

    pub fn throw_error_matching(self, pattern: impl Into<String>) -> Result<Self> {
        self.check(&[], "throw_error_matching", &[Value::str(pattern.into())])
    }

    /// Probe snapshots before and after invoking the captured callable
    pub fn change(self, probe: Value) -> Result<Self> {
        self.check(&[], "change", &[probe])
    }

    pub fn increase(self, probe: Value) -> Result<Self> {
        self.check(&[], "increase", &[probe])
    }

    pub fn decrease(self, probe: Value) -> Result<Self> {
        self.check(&[], "decrease", &[probe])
    }

    pub fn satisfy(self, predicate: Value) -> Result<Self> {
        self.check(&[], "satisfy", &[predicate])
    }

    /// Convenience wrapper turning a Rust closure into a predicate value
    pub fn satisfy_fn(self, predicate: impl Fn(&Value) -> bool + 'static) -> Result<Self> {
        let wrapped = Value::func(move |args| {
            let subject = args.first().cloned().unwrap_or(Value::Nil);
            Ok(vec![Value::Bool(predicate(&subject))])
        });
        self.satisfy(wrapped)
    }

    pub fn implement_interface(self, shape: impl Into<Value>) -> Result<Self> {
        let shape = shape.into();
        self.check(&[], "implement_interface", &[shape])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use serde_json::json;

    fn sink() -> (AssertionSink, Rc<RefCell<Coverage>>, Rc<Cell<usize>>) {
        let mut config = ConfigStore::new();
        Coverage::register_config(&mut config);
        config.set("coverage.enabled", json!(true)).unwrap();
        let mut coverage = Coverage::new();
        coverage.init(&config).unwrap();
        let coverage = Rc::new(RefCell::new(coverage));
        let counter = Rc::new(Cell::new(0));
        (
            AssertionSink {
                coverage: coverage.clone(),
                counter: counter.clone(),
            },
            coverage,
            counter,
        )
    }

    #[test]
    fn test_equal_passes() {
        expect(4).to().equal(4).unwrap();
    }

    #[test]
    fn test_equal_failure_has_callsite_and_values() {
        let err = expect(5).to().equal(4).unwrap_err();
        assert!(err.is_assertion_failure());
        assert!(err.message.contains("expected 4 got 5"));
        assert!(err.message.contains("mod.rs:"), "callsite in message");
        assert!(err.context.contains_key("line"));
    }

    #[test]
    fn test_negation() {
        expect(5).to_not().equal(4).unwrap();
        let err = expect(4).to_not().equal(4).unwrap_err();
        assert!(err.message.contains("to not equal"));
    }

    #[test]
    fn test_double_negation_is_positive() {
        expect(4).to_not().to_not().equal(4).unwrap();
    }

    #[test]
    fn test_be_reference_equality() {
        let t = Value::empty_table();
        expect(t.clone()).to().be(t.clone()).unwrap();
        let other = Value::empty_table();
        assert!(expect(t).to().be(other).is_err());
    }

    #[test]
    fn test_a_type_check() {
        expect("hi").to().a("string").unwrap();
        let err = expect(3).to().a("string").unwrap_err();
        assert!(err.message.contains("to be a string, got number"));
    }

    #[test]
    fn test_table_diff_in_diagnostic() {
        let actual = Value::table(vec![("a", Value::num(1)), ("b", Value::num(2))]);
        let expected = Value::table(vec![("a", Value::num(1))]);
        let err = expect(actual).to().equal(expected).unwrap_err();
        assert!(err.message.contains("extra key: b"));

        let actual = Value::table(vec![("a", Value::num(1))]);
        let expected = Value::table(vec![("a", Value::num(1)), ("b", Value::num(2))]);
        let err = expect(actual).to().equal(expected).unwrap_err();
        assert!(err.message.contains("missing key: b"));
    }

    #[test]
    fn test_chain_through_have_property() {
        let user = Value::table(vec![("name", Value::str("ada")), ("age", Value::num(36))]);
        expect(user)
            .to()
            .have_property("name")
            .unwrap()
            .to()
            .equal("ada")
            .unwrap();
    }

    #[test]
    fn test_counter_increments_on_pass_only() {
        let (sink, _cov, counter) = sink();
        let _ = expect(1).attach(sink.clone()).to().equal(1);
        let _ = expect(1).attach(sink.clone()).to().equal(2);
        let _ = expect(2).attach(sink).to().equal(2);
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_passing_assertion_marks_callsite_covered() {
        let (sink, coverage, _counter) = sink();
        expect(1).attach(sink.clone()).to().equal(1).unwrap();
        let data = coverage.borrow();
        let marked: usize = data
            .get_data()
            .values()
            .map(|lines| lines.values().filter(|d| d.verified).count())
            .sum();
        assert_eq!(marked, 1, "one verified line from the passing assertion");
    }

    #[test]
    fn test_failing_assertion_marks_nothing() {
        let (sink, coverage, _counter) = sink();
        let _ = expect(1).attach(sink).to().equal(2);
        let data = coverage.borrow();
        let marked: usize = data
            .get_data()
            .values()
            .map(|lines| lines.values().filter(|d| d.verified).count())
            .sum();
        assert_eq!(marked, 0);
    }

    #[test]
    fn test_deepest_user_frame_wins_over_callsite() {
        let (sink, coverage, _counter) = sink();
        coverage.borrow_mut().push_frame("/proj/helper.lua", 77);
        expect(1).attach(sink).to().equal(1).unwrap();
        let state = coverage
            .borrow()
            .line_state("/proj/helper.lua", 77);
        assert_eq!(state, crate::coverage::LineState::Covered);
    }

    #[test]
    fn test_unknown_path_is_validation() {
        let err = expect(1).check(&[], "frobnicate", &[]).unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::Validation);
        assert!(!err.is_assertion_failure());
        assert!(err.message.contains("to.frobnicate"));
    }

    #[test]
    fn test_custom_message_prefix() {
        let err = expect(1)
            .message("user id")
            .to()
            .equal(2)
            .unwrap_err();
        assert!(err.message.contains("user id: "));
    }

    #[test]
    fn test_fail_assertions() {
        let failing = Value::func(|_| Err(VouchError::runtime("out of cheese")));
        expect(failing.clone()).to().fail().unwrap();
        expect(failing.clone()).to().fail_with("cheese").unwrap();
        expect(failing).to().throw_error_matching("out of .*").unwrap();

        let fine = Value::func(|_| Ok(vec![]));
        assert!(expect(fine.clone()).to().fail().is_err());
        expect(fine).to_not().fail().unwrap();
    }

    #[test]
    fn test_numeric_comparisons() {
        expect(5).to().be_greater_than(4).unwrap();
        expect(5).to().be_at_least(5).unwrap();
        expect(5).to().be_between(1, 10).unwrap();
        expect(5).to().be_positive().unwrap();
        expect(-2).to().be_negative().unwrap();
        expect(5).to().be_integer().unwrap();
        assert!(expect(5.5).to().be_integer().is_err());
    }

    #[test]
    fn test_string_assertions() {
        expect("HELLO").to().be_uppercase().unwrap();
        expect("hello").to().be_lowercase().unwrap();
        expect("hello world").to().start_with("hello").unwrap();
        expect("hello world").to().end_with("world").unwrap();
        expect("hello world").to().matches("hello*").unwrap();
        expect("Hello").to().match_regex("^hello$", true).unwrap();
    }

    #[test]
    fn test_container_assertions() {
        let seq = Value::seq(vec![Value::num(1), Value::num(2)]);
        expect(seq.clone()).to().contain(2).unwrap();
        expect(seq.clone()).to().have_length(2).unwrap();
        expect(seq).to_not().empty().unwrap();

        let table = Value::table(vec![("a", Value::num(1)), ("b", Value::num(2))]);
        expect(table.clone()).to().have_key("a").unwrap();
        expect(table).to().have_keys(&["a", "b"]).unwrap();
    }

    #[test]
    fn test_match_schema() {
        let user = Value::table(vec![("name", Value::str("ada")), ("age", Value::num(36))]);
        let schema = Value::table(vec![("name", Value::str("string")), ("age", Value::str("number"))]);
        expect(user.clone()).to().match_schema(schema).unwrap();

        let bad_schema = Value::table(vec![("name", Value::str("number"))]);
        let err = expect(user).to().match_schema(bad_schema).unwrap_err();
        assert!(err.message.contains("name: expected number, got string"));
    }

    #[test]
    fn test_satisfy_fn() {
        expect(10).to().satisfy_fn(|v| v.as_num().unwrap_or(0.0) > 5.0).unwrap();
        assert!(expect(1)
            .to()
            .satisfy_fn(|v| v.as_num().unwrap_or(0.0) > 5.0)
            .is_err());
    }

    #[test]
    fn test_epsilon_equal() {
        expect(1.0).to().equal_within(1.0005, 0.001).unwrap();
        assert!(expect(1.0).to().equal_within(1.5, 0.001).is_err());
    }

    #[test]
    fn test_eval_path_dynamic_traversal() {
        expect(4).eval_path("to.equal", &[Value::num(4)]).unwrap();
        expect(4).eval_path("to_not.equal", &[Value::num(5)]).unwrap();
        expect("hi")
            .eval_path("to.be.a", &[Value::str("string")])
            .unwrap();
        let err = expect(4)
            .eval_path("sideways.equal", &[Value::num(4)])
            .unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::Validation);
        let err = expect(4).eval_path("to", &[]).unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::Validation);
    }

    #[test]
    fn test_exist() {
        expect("x").to().exist().unwrap();
        assert!(expect(Value::Nil).to().exist().is_err());
        expect(Value::Nil).to_not().exist().unwrap();
    }
}
