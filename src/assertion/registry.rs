//! Assertion path registry
//!
//! A tree of words mapping fluent chains (`to.equal`, `to.be.a`,
//! `to.have_property`) to terminal predicates. The registry is built once,
//! is immutable afterwards, and survives framework resets between test
//! files. Negation is not stored in the tree: the `to_not` word toggles
//! the expectation's flag and continues down the `to` subtree.

use super::compare::{deep_equal, diff_tables};
use crate::error::{Result, VouchError};
use crate::fsys::glob_to_regex;
use crate::value::{render, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Raw predicate verdict plus the messages for either polarity
#[derive(Debug)]
pub struct PredOutcome {
    pub ok: bool,
    /// Failure message when the assertion is not negated
    pub positive: String,
    /// Failure message when the assertion is negated
    pub negative: String,
    /// Transformed captured value for continued chains
    pub chain: Option<Value>,
}

impl PredOutcome {
    fn new(ok: bool, positive: String, negative: String) -> Self {
        Self {
            ok,
            positive,
            negative,
            chain: None,
        }
    }

    fn with_chain(mut self, chain: Value) -> Self {
        self.chain = Some(chain);
        self
    }
}

/// A terminal entry: `(captured value, invocation args) -> verdict`
pub type Predicate = fn(&Value, &[Value]) -> Result<PredOutcome>;

#[derive(Default)]
pub struct Node {
    children: BTreeMap<&'static str, Node>,
    terminal: Option<Predicate>,
}

/// The immutable word tree
pub struct Registry {
    root: Node,
}

impl Registry {
    fn insert(&mut self, path: &[&'static str], predicate: Predicate) {
        let mut node = &mut self.root;
        for word in path {
            node = node.children.entry(word).or_default();
        }
        node.terminal = Some(predicate);
    }

    /// Full-path lookup including the terminal word
    pub fn lookup(&self, path: &[&str]) -> Option<Predicate> {
        let mut node = &self.root;
        for word in path {
            node = node.children.get(word)?;
        }
        node.terminal
    }

    /// True if `path` names an intermediate or terminal word
    pub fn valid_prefix(&self, path: &[&str]) -> bool {
        let mut node = &self.root;
        for word in path {
            match node.children.get(word) {
                Some(next) => node = next,
                None => return false,
            }
        }
        true
    }
}

/// Process-global registry; immutable after first use and deliberately
/// unaffected by `reset()`.
pub fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(build)
}

fn build() -> Registry {
    let mut reg = Registry {
        root: Node::default(),
    };

    reg.insert(&["to", "equal"], pred_equal);
    reg.insert(&["to", "deep_equal"], pred_equal);
    reg.insert(&["to", "be"], pred_be);
    reg.insert(&["to", "be", "a"], pred_be_a);
    reg.insert(&["to", "be", "an"], pred_be_a);
    reg.insert(&["to", "be", "empty"], pred_be_empty);
    reg.insert(&["to", "exist"], pred_exist);
    reg.insert(&["to", "be_truthy"], pred_be_truthy);
    reg.insert(&["to", "be_falsy"], pred_be_falsy);
    reg.insert(&["to", "match"], pred_match);
    reg.insert(&["to", "match_regex"], pred_match_regex);
    reg.insert(&["to", "start_with"], pred_start_with);
    reg.insert(&["to", "end_with"], pred_end_with);
    reg.insert(&["to", "contain"], pred_contain);
    reg.insert(&["to", "have_key"], pred_have_key);
    reg.insert(&["to", "have_keys"], pred_have_keys);
    reg.insert(&["to", "have_property"], pred_have_property);
    reg.insert(&["to", "have_length"], pred_have_length);
    reg.insert(&["to", "match_schema"], pred_match_schema);
    reg.insert(&["to", "be_greater_than"], pred_greater_than);
    reg.insert(&["to", "be_less_than"], pred_less_than);
    reg.insert(&["to", "be_at_least"], pred_at_least);
    reg.insert(&["to", "be_at_most"], pred_at_most);
    reg.insert(&["to", "be_between"], pred_between);
    reg.insert(&["to", "be_positive"], pred_positive);
    reg.insert(&["to", "be_negative"], pred_negative);
    reg.insert(&["to", "be_integer"], pred_integer);
    reg.insert(&["to", "be_uppercase"], pred_uppercase);
    reg.insert(&["to", "be_lowercase"], pred_lowercase);
    reg.insert(&["to", "fail"], pred_fail);
    reg.insert(&["to", "fail_with"], pred_fail_with);
    reg.insert(&["to", "throw_error_matching"], pred_throw_matching);
    reg.insert(&["to", "change"], pred_change);
    reg.insert(&["to", "increase"], pred_increase);
    reg.insert(&["to", "decrease"], pred_decrease);
    reg.insert(&["to", "satisfy"], pred_satisfy);
    reg.insert(&["to", "implement_interface"], pred_implement_interface);

    reg
}

// --- argument helpers ---

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Nil)
}

fn num_arg(args: &[Value], index: usize, what: &str) -> Result<f64> {
    args.get(index).and_then(Value::as_num).ok_or_else(|| {
        VouchError::validation(format!("{} requires a number argument", what))
    })
}

fn str_arg(args: &[Value], index: usize, what: &str) -> Result<String> {
    args.get(index)
        .and_then(|v| v.as_str().map(String::from))
        .ok_or_else(|| VouchError::validation(format!("{} requires a string argument", what)))
}

fn callable_arg(args: &[Value], index: usize, what: &str) -> Result<Value> {
    let value = arg(args, index);
    if value.is_callable() {
        Ok(value)
    } else {
        Err(VouchError::validation(format!(
            "{} requires a callable argument, got {}",
            what,
            value.type_name()
        )))
    }
}

fn need_callable(value: &Value, what: &str) -> Result<()> {
    if value.is_callable() {
        Ok(())
    } else {
        Err(VouchError::validation(format!(
            "{} requires a callable captured value, got {}",
            what,
            value.type_name()
        )))
    }
}

/// `*`-glob when the pattern contains a star, substring otherwise
fn loose_match(text: &str, pattern: &str) -> Result<bool> {
    if pattern.contains('*') {
        Ok(glob_to_regex(pattern)?.is_match(text))
    } else {
        Ok(text.contains(pattern))
    }
}

// --- predicates ---

fn pred_equal(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let expected = arg(args, 0);
    let epsilon = args.get(1).and_then(Value::as_num).unwrap_or(0.0);
    let ok = deep_equal(value, &expected, epsilon);

    let mut positive = format!("expected {} got {}", render(&expected), render(value));
    let report = diff_tables(value, &expected, epsilon);
    if !report.is_empty() {
        positive.push('\n');
        positive.push_str(&report.render());
    }
    let negative = format!("expected value to not equal {}", render(&expected));
    Ok(PredOutcome::new(ok, positive, negative))
}

fn pred_be(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let expected = arg(args, 0);
    let ok = value.ref_eq(&expected);
    Ok(PredOutcome::new(
        ok,
        format!(
            "expected {} to be {} (reference equality)",
            render(value),
            render(&expected)
        ),
        format!("expected value to not be {}", render(&expected)),
    ))
}

fn pred_be_a(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let spec = arg(args, 0);
    match &spec {
        Value::Str(type_name) => {
            let ok = value.type_name() == type_name.as_str()
                || (type_name == "callable" && value.is_callable());
            Ok(PredOutcome::new(
                ok,
                format!(
                    "expected {} to be a {}, got {}",
                    render(value),
                    type_name,
                    value.type_name()
                ),
                format!("expected value to not be a {}", type_name),
            ))
        }
        Value::Table(shape) => {
            // class check: the value carries every key of the prototype
            let ok = match value.as_table() {
                Some(table) => {
                    let table = table.borrow();
                    shape.borrow().keys().all(|key| table.contains_key(key))
                }
                None => false,
            };
            Ok(PredOutcome::new(
                ok,
                format!(
                    "expected {} to be an instance of {}",
                    render(value),
                    render(&spec)
                ),
                format!("expected value to not be an instance of {}", render(&spec)),
            ))
        }
        other => Err(VouchError::validation(format!(
            "be_a requires a type name or prototype table, got {}",
            other.type_name()
        ))),
    }
}

fn pred_be_empty(value: &Value, _args: &[Value]) -> Result<PredOutcome> {
    let ok = value.length() == Some(0);
    Ok(PredOutcome::new(
        ok,
        format!("expected {} to be empty", render(value)),
        "expected value to not be empty".to_string(),
    ))
}

fn pred_exist(value: &Value, _args: &[Value]) -> Result<PredOutcome> {
    Ok(PredOutcome::new(
        !value.is_nil(),
        "expected value to exist, got nil".to_string(),
        format!("expected value to not exist, got {}", render(value)),
    ))
}

fn pred_be_truthy(value: &Value, _args: &[Value]) -> Result<PredOutcome> {
    Ok(PredOutcome::new(
        value.is_truthy(),
        format!("expected {} to be truthy", render(value)),
        format!("expected {} to be falsy", render(value)),
    ))
}

fn pred_be_falsy(value: &Value, _args: &[Value]) -> Result<PredOutcome> {
    Ok(PredOutcome::new(
        !value.is_truthy(),
        format!("expected {} to be falsy", render(value)),
        format!("expected {} to be truthy", render(value)),
    ))
}

fn pred_match(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let pattern = str_arg(args, 0, "match")?;
    let text = match value.as_str() {
        Some(s) => s,
        None => {
            return Ok(PredOutcome::new(
                false,
                format!("expected a string to match, got {}", value.type_name()),
                format!("expected a string, got {}", value.type_name()),
            ))
        }
    };
    let ok = loose_match(text, &pattern)?;
    Ok(PredOutcome::new(
        ok,
        format!("string '{}' did not match pattern '{}'", text, pattern),
        format!("string '{}' matched pattern '{}'", text, pattern),
    ))
}

fn pred_match_regex(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let pattern = str_arg(args, 0, "match_regex")?;
    let case_insensitive = args
        .get(1)
        .map(|opts| opts.get("case_insensitive").is_truthy())
        .unwrap_or(false);
    let source = if case_insensitive {
        format!("(?i){}", pattern)
    } else {
        pattern.clone()
    };
    let re = regex::Regex::new(&source)
        .map_err(|e| VouchError::validation(format!("invalid regex '{}': {}", pattern, e)))?;
    let text = match value.as_str() {
        Some(s) => s,
        None => {
            return Ok(PredOutcome::new(
                false,
                format!("expected a string to match, got {}", value.type_name()),
                format!("expected a string, got {}", value.type_name()),
            ))
        }
    };
    let ok = re.is_match(text);
    Ok(PredOutcome::new(
        ok,
        format!("string '{}' did not match pattern '{}'", text, pattern),
        format!("string '{}' matched pattern '{}'", text, pattern),
    ))
}

fn pred_start_with(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let prefix = str_arg(args, 0, "start_with")?;
    let ok = value.as_str().map(|s| s.starts_with(&prefix)).unwrap_or(false);
    Ok(PredOutcome::new(
        ok,
        format!("expected {} to start with '{}'", render(value), prefix),
        format!("expected {} to not start with '{}'", render(value), prefix),
    ))
}

fn pred_end_with(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let suffix = str_arg(args, 0, "end_with")?;
    let ok = value.as_str().map(|s| s.ends_with(&suffix)).unwrap_or(false);
    Ok(PredOutcome::new(
        ok,
        format!("expected {} to end with '{}'", render(value), suffix),
        format!("expected {} to not end with '{}'", render(value), suffix),
    ))
}

fn pred_contain(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let needle = arg(args, 0);
    let ok = match value {
        Value::Str(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
        Value::Seq(items) => items
            .borrow()
            .iter()
            .any(|item| deep_equal(item, &needle, 0.0)),
        Value::Table(map) => map
            .borrow()
            .values()
            .any(|item| deep_equal(item, &needle, 0.0)),
        _ => false,
    };
    Ok(PredOutcome::new(
        ok,
        format!("expected {} to contain {}", render(value), render(&needle)),
        format!("expected {} to not contain {}", render(value), render(&needle)),
    ))
}

fn pred_have_key(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let key = str_arg(args, 0, "have_key")?;
    let ok = value
        .as_table()
        .map(|t| t.borrow().contains_key(&key))
        .unwrap_or(false);
    Ok(PredOutcome::new(
        ok,
        format!("expected {} to have key '{}'", render(value), key),
        format!("expected {} to not have key '{}'", render(value), key),
    ))
}

fn pred_have_keys(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let keys_value = arg(args, 0);
    let keys = keys_value
        .as_seq()
        .ok_or_else(|| VouchError::validation("have_keys requires a sequence of keys"))?;
    let mut missing = Vec::new();
    {
        let keys = keys.borrow();
        for key in keys.iter() {
            let key = key
                .as_str()
                .ok_or_else(|| VouchError::validation("have_keys requires string keys"))?;
            let present = value
                .as_table()
                .map(|t| t.borrow().contains_key(key))
                .unwrap_or(false);
            if !present {
                missing.push(key.to_string());
            }
        }
    }
    Ok(PredOutcome::new(
        missing.is_empty(),
        format!(
            "expected {} to have keys {}; missing: {}",
            render(value),
            render(&keys_value),
            missing.join(", ")
        ),
        format!("expected {} to not have all keys {}", render(value), render(&keys_value)),
    ))
}

fn pred_have_property(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let key = str_arg(args, 0, "have_property")?;
    let present = value
        .as_table()
        .map(|t| t.borrow().contains_key(&key))
        .unwrap_or(false);
    let actual = value.get(&key);

    let (ok, positive) = match args.get(1) {
        Some(expected) if present => {
            let equal = deep_equal(&actual, expected, 0.0);
            (
                equal,
                format!(
                    "expected property '{}' to equal {}, got {}",
                    key,
                    render(expected),
                    render(&actual)
                ),
            )
        }
        Some(expected) => (
            false,
            format!(
                "expected {} to have property '{}' equal to {}",
                render(value),
                key,
                render(expected)
            ),
        ),
        None => (
            present,
            format!("expected {} to have property '{}'", render(value), key),
        ),
    };

    let negative = format!("expected {} to not have property '{}'", render(value), key);
    Ok(PredOutcome::new(ok, positive, negative).with_chain(actual))
}

fn pred_have_length(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let expected = num_arg(args, 0, "have_length")? as usize;
    match value.length() {
        Some(actual) => Ok(PredOutcome::new(
            actual == expected,
            format!(
                "expected {} to have length {}, got {}",
                render(value),
                expected,
                actual
            ),
            format!("expected {} to not have length {}", render(value), expected),
        )),
        None => Ok(PredOutcome::new(
            false,
            format!(
                "expected a string or container to have length, got {}",
                value.type_name()
            ),
            format!("expected a value without length, got {}", value.type_name()),
        )),
    }
}

fn pred_match_schema(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let shape = arg(args, 0);
    let shape_table = shape
        .as_table()
        .ok_or_else(|| VouchError::validation("match_schema requires a shape table"))?;

    let mut problems = Vec::new();
    match value.as_table() {
        Some(_) => {
            for (key, spec) in shape_table.borrow().iter() {
                let actual = value.get(key);
                match spec {
                    Value::Str(type_name) => {
                        if actual.type_name() != type_name.as_str() {
                            problems.push(format!(
                                "{}: expected {}, got {}",
                                key,
                                type_name,
                                actual.type_name()
                            ));
                        }
                    }
                    exact => {
                        if !deep_equal(&actual, exact, 0.0) {
                            problems.push(format!(
                                "{}: expected {}, got {}",
                                key,
                                render(exact),
                                render(&actual)
                            ));
                        }
                    }
                }
            }
        }
        None => problems.push(format!("expected a table, got {}", value.type_name())),
    }

    Ok(PredOutcome::new(
        problems.is_empty(),
        format!(
            "value did not match schema:\n  {}",
            problems.join("\n  ")
        ),
        "value matched schema".to_string(),
    ))
}

fn numeric(value: &Value, what: &str) -> std::result::Result<f64, PredOutcome> {
    value.as_num().ok_or_else(|| {
        PredOutcome::new(
            false,
            format!("{} expected a number, got {}", what, value.type_name()),
            format!("{} expected a number, got {}", what, value.type_name()),
        )
    })
}

fn pred_greater_than(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let bound = num_arg(args, 0, "be_greater_than")?;
    let n = match numeric(value, "be_greater_than") {
        Ok(n) => n,
        Err(outcome) => return Ok(outcome),
    };
    Ok(PredOutcome::new(
        n > bound,
        format!("expected {} to be greater than {}", n, bound),
        format!("expected {} to not be greater than {}", n, bound),
    ))
}

fn pred_less_than(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let bound = num_arg(args, 0, "be_less_than")?;
    let n = match numeric(value, "be_less_than") {
        Ok(n) => n,
        Err(outcome) => return Ok(outcome),
    };
    Ok(PredOutcome::new(
        n < bound,
        format!("expected {} to be less than {}", n, bound),
        format!("expected {} to not be less than {}", n, bound),
    ))
}

fn pred_at_least(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let bound = num_arg(args, 0, "be_at_least")?;
    let n = match numeric(value, "be_at_least") {
        Ok(n) => n,
        Err(outcome) => return Ok(outcome),
    };
    Ok(PredOutcome::new(
        n >= bound,
        format!("expected {} to be at least {}", n, bound),
        format!("expected {} to not be at least {}", n, bound),
    ))
}

fn pred_at_most(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let bound = num_arg(args, 0, "be_at_most")?;
    let n = match numeric(value, "be_at_most") {
        Ok(n) => n,
        Err(outcome) => return Ok(outcome),
    };
    Ok(PredOutcome::new(
        n <= bound,
        format!("expected {} to be at most {}", n, bound),
        format!("expected {} to not be at most {}", n, bound),
    ))
}

fn pred_between(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let low = num_arg(args, 0, "be_between")?;
    let high = num_arg(args, 1, "be_between")?;
    if low > high {
        return Err(VouchError::validation(format!(
            "be_between bounds are inverted: {} > {}",
            low, high
        )));
    }
    let n = match numeric(value, "be_between") {
        Ok(n) => n,
        Err(outcome) => return Ok(outcome),
    };
    Ok(PredOutcome::new(
        n >= low && n <= high,
        format!("expected {} to be between {} and {}", n, low, high),
        format!("expected {} to not be between {} and {}", n, low, high),
    ))
}

fn pred_positive(value: &Value, _args: &[Value]) -> Result<PredOutcome> {
    let n = match numeric(value, "be_positive") {
        Ok(n) => n,
        Err(outcome) => return Ok(outcome),
    };
    Ok(PredOutcome::new(
        n > 0.0,
        format!("expected {} to be positive", n),
        format!("expected {} to not be positive", n),
    ))
}

fn pred_negative(value: &Value, _args: &[Value]) -> Result<PredOutcome> {
    let n = match numeric(value, "be_negative") {
        Ok(n) => n,
        Err(outcome) => return Ok(outcome),
    };
    Ok(PredOutcome::new(
        n < 0.0,
        format!("expected {} to be negative", n),
        format!("expected {} to not be negative", n),
    ))
}

fn pred_integer(value: &Value, _args: &[Value]) -> Result<PredOutcome> {
    let n = match numeric(value, "be_integer") {
        Ok(n) => n,
        Err(outcome) => return Ok(outcome),
    };
    Ok(PredOutcome::new(
        n.fract() == 0.0,
        format!("expected {} to be an integer", n),
        format!("expected {} to not be an integer", n),
    ))
}

fn pred_uppercase(value: &Value, _args: &[Value]) -> Result<PredOutcome> {
    let ok = value
        .as_str()
        .map(|s| s == s.to_uppercase())
        .unwrap_or(false);
    Ok(PredOutcome::new(
        ok,
        format!("expected {} to be uppercase", render(value)),
        format!("expected {} to not be uppercase", render(value)),
    ))
}

fn pred_lowercase(value: &Value, _args: &[Value]) -> Result<PredOutcome> {
    let ok = value
        .as_str()
        .map(|s| s == s.to_lowercase())
        .unwrap_or(false);
    Ok(PredOutcome::new(
        ok,
        format!("expected {} to be lowercase", render(value)),
        format!("expected {} to not be lowercase", render(value)),
    ))
}

fn pred_fail(value: &Value, _args: &[Value]) -> Result<PredOutcome> {
    need_callable(value, "fail")?;
    match value.call(&[]) {
        Ok(_) => Ok(PredOutcome::new(
            false,
            "expected function to fail, but it succeeded".to_string(),
            String::new(),
        )),
        Err(e) => Ok(PredOutcome::new(
            true,
            String::new(),
            format!("expected function to not fail, but it failed with: {}", e.message),
        )),
    }
}

fn pred_fail_with(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    need_callable(value, "fail_with")?;
    let pattern = str_arg(args, 0, "fail_with")?;
    match value.call(&[]) {
        Ok(_) => Ok(PredOutcome::new(
            false,
            format!(
                "expected function to fail with '{}', but it succeeded",
                pattern
            ),
            String::new(),
        )),
        Err(e) => {
            let ok = loose_match(&e.message, &pattern)?;
            Ok(PredOutcome::new(
                ok,
                format!(
                    "expected failure matching '{}', got '{}'",
                    pattern, e.message
                ),
                format!("expected failure to not match '{}', got '{}'", pattern, e.message),
            ))
        }
    }
}

fn pred_throw_matching(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    need_callable(value, "throw_error_matching")?;
    let pattern = str_arg(args, 0, "throw_error_matching")?;
    let re = regex::Regex::new(&pattern)
        .map_err(|e| VouchError::validation(format!("invalid regex '{}': {}", pattern, e)))?;
    match value.call(&[]) {
        Ok(_) => Ok(PredOutcome::new(
            false,
            format!(
                "expected function to throw an error matching '{}', but it succeeded",
                pattern
            ),
            String::new(),
        )),
        Err(e) => Ok(PredOutcome::new(
            re.is_match(&e.message),
            format!("error '{}' did not match pattern '{}'", e.message, pattern),
            format!("error '{}' matched pattern '{}'", e.message, pattern),
        )),
    }
}

/// Snapshot a probe, run the captured callable, snapshot again
fn probe_around(value: &Value, args: &[Value], what: &str) -> Result<(Value, Value)> {
    need_callable(value, what)?;
    let probe = callable_arg(args, 0, what)?;
    let before = probe.call(&[])?.into_iter().next().unwrap_or(Value::Nil);
    value.call(&[])?;
    let after = probe.call(&[])?.into_iter().next().unwrap_or(Value::Nil);
    Ok((before, after))
}

fn pred_change(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let (before, after) = probe_around(value, args, "change")?;
    let changed = !deep_equal(&before, &after, 0.0);
    Ok(PredOutcome::new(
        changed,
        format!(
            "expected value to change, but it stayed {}",
            render(&before)
        ),
        format!(
            "expected value to not change, but it went from {} to {}",
            render(&before),
            render(&after)
        ),
    ))
}

fn pred_increase(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let (before, after) = probe_around(value, args, "increase")?;
    let (b, a) = match (before.as_num(), after.as_num()) {
        (Some(b), Some(a)) => (b, a),
        _ => {
            return Err(VouchError::validation(
                "increase requires a numeric probe result",
            ))
        }
    };
    Ok(PredOutcome::new(
        a > b,
        format!("expected value to increase from {}, got {}", b, a),
        format!("expected value to not increase, but it went from {} to {}", b, a),
    ))
}

fn pred_decrease(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let (before, after) = probe_around(value, args, "decrease")?;
    let (b, a) = match (before.as_num(), after.as_num()) {
        (Some(b), Some(a)) => (b, a),
        _ => {
            return Err(VouchError::validation(
                "decrease requires a numeric probe result",
            ))
        }
    };
    Ok(PredOutcome::new(
        a < b,
        format!("expected value to decrease from {}, got {}", b, a),
        format!("expected value to not decrease, but it went from {} to {}", b, a),
    ))
}

fn pred_satisfy(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let predicate = callable_arg(args, 0, "satisfy")?;
    let verdict = predicate.call(&[value.clone()])?;
    let ok = verdict.first().map(Value::is_truthy).unwrap_or(false);
    Ok(PredOutcome::new(
        ok,
        format!("{} did not satisfy the predicate", render(value)),
        format!("{} satisfied the predicate", render(value)),
    ))
}

fn pred_implement_interface(value: &Value, args: &[Value]) -> Result<PredOutcome> {
    let shape = arg(args, 0);
    let shape_table = shape
        .as_table()
        .ok_or_else(|| VouchError::validation("implement_interface requires a shape table"))?;

    let mut problems = Vec::new();
    for (key, spec) in shape_table.borrow().iter() {
        let member = value.get(key);
        let wanted = spec.as_str().unwrap_or("function");
        if member.is_nil() {
            problems.push(format!("missing member '{}'", key));
        } else if member.type_name() != wanted {
            problems.push(format!(
                "member '{}' should be a {}, got {}",
                key,
                wanted,
                member.type_name()
            ));
        }
    }
    Ok(PredOutcome::new(
        problems.is_empty(),
        format!(
            "value does not implement interface:\n  {}",
            problems.join("\n  ")
        ),
        "value implements interface".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_terminal_paths() {
        let reg = registry();
        assert!(reg.lookup(&["to", "equal"]).is_some());
        assert!(reg.lookup(&["to", "be", "a"]).is_some());
        assert!(reg.lookup(&["to", "have_length"]).is_some());
        assert!(reg.lookup(&["to", "nonsense"]).is_none());
    }

    #[test]
    fn test_be_is_both_terminal_and_intermediate() {
        let reg = registry();
        assert!(reg.lookup(&["to", "be"]).is_some());
        assert!(reg.lookup(&["to", "be", "empty"]).is_some());
        assert!(reg.valid_prefix(&["to", "be"]));
    }

    #[test]
    fn test_valid_prefix() {
        let reg = registry();
        assert!(reg.valid_prefix(&["to"]));
        assert!(!reg.valid_prefix(&["frobnicate"]));
    }

    #[test]
    fn test_pred_equal_diff_in_message() {
        let actual = Value::table(vec![("a", Value::num(1)), ("b", Value::num(2))]);
        let expected = Value::table(vec![("a", Value::num(1))]);
        let outcome = pred_equal(&actual, &[expected]).unwrap();
        assert!(!outcome.ok);
        assert!(outcome.positive.contains("extra key: b"));
    }

    #[test]
    fn test_pred_match_message_shape() {
        let outcome = pred_match(&Value::str("abc"), &[Value::str("x*")]).unwrap();
        assert!(!outcome.ok);
        assert_eq!(
            outcome.positive,
            "string 'abc' did not match pattern 'x*'"
        );
    }

    #[test]
    fn test_pred_match_substring() {
        let outcome = pred_match(&Value::str("hello world"), &[Value::str("world")]).unwrap();
        assert!(outcome.ok);
    }

    #[test]
    fn test_pred_have_property_chains_to_value() {
        let table = Value::table(vec![("name", Value::str("ada"))]);
        let outcome = pred_have_property(&table, &[Value::str("name")]).unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.chain.unwrap().as_str(), Some("ada"));
    }

    #[test]
    fn test_pred_between_inverted_bounds_is_validation() {
        let err = pred_between(&Value::num(1), &[Value::num(5), Value::num(2)]).unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::Validation);
    }

    #[test]
    fn test_pred_fail_catches_error() {
        let failing = Value::func(|_| Err(VouchError::runtime("kaboom")));
        assert!(pred_fail(&failing, &[]).unwrap().ok);
        let fine = Value::func(|_| Ok(vec![]));
        assert!(!pred_fail(&fine, &[]).unwrap().ok);
    }

    #[test]
    fn test_pred_fail_with_pattern() {
        let failing = Value::func(|_| Err(VouchError::runtime("file not found: x.txt")));
        let outcome = pred_fail_with(&failing, &[Value::str("not found")]).unwrap();
        assert!(outcome.ok);
        let outcome = pred_fail_with(&failing, &[Value::str("permission")]).unwrap();
        assert!(!outcome.ok);
    }

    #[test]
    fn test_pred_change_detects_mutation() {
        let counter = Value::table(vec![("n", Value::num(0))]);
        let target = counter.clone();
        let mutator = Value::func(move |_| {
            let n = target.get("n").as_num().unwrap_or(0.0);
            target.set("n", Value::num(n + 1.0))?;
            Ok(vec![])
        });
        let probe_source = counter.clone();
        let probe = Value::func(move |_| Ok(vec![probe_source.get("n")]));

        let outcome = pred_change(&mutator, &[probe.clone()]).unwrap();
        assert!(outcome.ok);

        let noop = Value::func(|_| Ok(vec![]));
        let outcome = pred_change(&noop, &[probe]).unwrap();
        assert!(!outcome.ok);
    }

    #[test]
    fn test_pred_implement_interface() {
        let obj = Value::table(vec![
            ("read", Value::func(|_| Ok(vec![]))),
            ("size", Value::num(10)),
        ]);
        let shape = Value::table(vec![
            ("read", Value::str("function")),
            ("size", Value::str("number")),
        ]);
        assert!(pred_implement_interface(&obj, &[shape]).unwrap().ok);

        let incomplete = Value::table(vec![("read", Value::func(|_| Ok(vec![])))]);
        let shape = Value::table(vec![
            ("read", Value::str("function")),
            ("write", Value::str("function")),
        ]);
        let outcome = pred_implement_interface(&incomplete, &[shape]).unwrap();
        assert!(!outcome.ok);
        assert!(outcome.positive.contains("missing member 'write'"));
    }
}
