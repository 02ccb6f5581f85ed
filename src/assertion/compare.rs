//! Deep value comparison and structural diffs
//!
//! Two values are deep-equal iff they are equal scalars (numbers within an
//! optional epsilon), ordered containers of equal length with pointwise
//! equal elements, keyed containers with identical key sets and equal
//! values at every key, or a custom `__eq` comparator on either table
//! reports equal. An identity-pair visit set keeps cyclic structures from
//! recursing forever.

use crate::value::{render, Value};
use std::collections::HashSet;

/// Reserved table key holding a custom equality comparator
pub const CUSTOM_EQ_KEY: &str = "__eq";

pub fn deep_equal(a: &Value, b: &Value, epsilon: f64) -> bool {
    let mut visited = HashSet::new();
    equal_inner(a, b, epsilon, &mut visited)
}

fn equal_inner(a: &Value, b: &Value, epsilon: f64, visited: &mut HashSet<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Num(x), Value::Num(y)) => (x - y).abs() <= epsilon,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Func(_), Value::Func(_)) => a.ref_eq(b),
        (Value::Seq(x), Value::Seq(y)) => {
            if a.ref_eq(b) {
                return true;
            }
            let pair = (a.identity(), b.identity());
            if !visited.insert(pair) {
                // already comparing this pair further up the stack
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            let eq = x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|(va, vb)| equal_inner(va, vb, epsilon, visited));
            visited.remove(&pair);
            eq
        }
        (Value::Table(x), Value::Table(y)) => {
            if a.ref_eq(b) {
                return true;
            }
            if let Some(result) = custom_compare(a, b) {
                return result;
            }
            let pair = (a.identity(), b.identity());
            if !visited.insert(pair) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            let eq = x.len() == y.len()
                && x.iter().all(|(key, va)| match y.get(key) {
                    Some(vb) => equal_inner(va, vb, epsilon, visited),
                    None => false,
                });
            visited.remove(&pair);
            eq
        }
        _ => false,
    }
}

/// Run a `__eq` comparator if either table defines one. A comparator that
/// errors reports not-equal.
fn custom_compare(a: &Value, b: &Value) -> Option<bool> {
    let comparator = match (a.get(CUSTOM_EQ_KEY), b.get(CUSTOM_EQ_KEY)) {
        (f @ Value::Func(_), _) => f,
        (_, f @ Value::Func(_)) => f,
        _ => return None,
    };
    match comparator.call(&[a.clone(), b.clone()]) {
        Ok(returned) => Some(returned.first().map(Value::is_truthy).unwrap_or(false)),
        Err(_) => Some(false),
    }
}

/// Structural difference between an actual and an expected table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffReport {
    /// Keys present in expected but absent from actual
    pub missing: Vec<String>,
    /// Keys present in actual but absent from expected
    pub extra: Vec<String>,
    /// Keys present in both with unequal values, rendered `actual vs expected`
    pub changed: Vec<(String, String)>,
}

impl DiffReport {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.changed.is_empty()
    }

    /// Indented tree of differences for diagnostics
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        for key in &self.missing {
            lines.push(format!("  missing key: {}", key));
        }
        for key in &self.extra {
            lines.push(format!("  extra key: {}", key));
        }
        for (key, detail) in &self.changed {
            lines.push(format!("  key {}: {}", key, detail));
        }
        lines.join("\n")
    }
}

/// Diff of `actual` against `expected`; empty unless both are tables
pub fn diff_tables(actual: &Value, expected: &Value, epsilon: f64) -> DiffReport {
    let (actual_map, expected_map) = match (actual.as_table(), expected.as_table()) {
        (Some(a), Some(e)) => (a.borrow(), e.borrow()),
        _ => return DiffReport::default(),
    };

    let mut report = DiffReport::default();
    for key in expected_map.keys() {
        if !actual_map.contains_key(key) {
            report.missing.push(key.clone());
        }
    }
    for (key, actual_value) in actual_map.iter() {
        match expected_map.get(key) {
            None => report.extra.push(key.clone()),
            Some(expected_value) => {
                if !deep_equal(actual_value, expected_value, epsilon) {
                    report.changed.push((
                        key.clone(),
                        format!("{} vs {}", render(actual_value), render(expected_value)),
                    ));
                }
            }
        }
    }
    report
}
