//! Argument matchers for call verification
//!
//! A matcher qualifies a single argument. When a call's arguments are
//! compared against a matcher sequence, missing trailing arguments compare
//! as nil, and extra arguments fail the match unless the sequence ends in
//! [`any_rest`].

use crate::assertion::compare::deep_equal;
use crate::value::Value;
use std::rc::Rc;

#[derive(Clone)]
pub enum Matcher {
    /// Accepts any single value
    Any,
    /// Terminal only: accepts all remaining arguments
    AnyRest,
    /// Host type name: "string", "number", "table", "boolean", "function"
    TypeIs(&'static str),
    /// Anything callable
    Callable,
    /// A table containing at least the given key/value pairs
    TableContaining(Value),
    /// Deep structural equality
    DeepEqual(Value),
    /// Exact scalar / reference equality
    Exact(Value),
    Custom(Rc<dyn Fn(&Value) -> bool>),
}

impl Matcher {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Matcher::Any | Matcher::AnyRest => true,
            Matcher::TypeIs(name) => value.type_name() == *name,
            Matcher::Callable => value.is_callable(),
            Matcher::TableContaining(partial) => {
                let (Some(partial), Some(table)) = (partial.as_table(), value.as_table()) else {
                    return false;
                };
                let table = table.borrow();
                partial.borrow().iter().all(|(key, expected)| {
                    table
                        .get(key)
                        .map(|actual| deep_equal(actual, expected, 0.0))
                        .unwrap_or(false)
                })
            }
            Matcher::DeepEqual(expected) => deep_equal(value, expected, 0.0),
            Matcher::Exact(expected) => value.ref_eq(expected),
            Matcher::Custom(predicate) => predicate(value),
        }
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Matcher::Any => write!(f, "any()"),
            Matcher::AnyRest => write!(f, "any_rest()"),
            Matcher::TypeIs(name) => write!(f, "type({})", name),
            Matcher::Callable => write!(f, "callable()"),
            Matcher::TableContaining(v) => write!(f, "table_containing({})", v),
            Matcher::DeepEqual(v) => write!(f, "deep_equal({})", v),
            Matcher::Exact(v) => write!(f, "exact({})", v),
            Matcher::Custom(_) => write!(f, "custom(..)"),
        }
    }
}

pub fn any() -> Matcher {
    Matcher::Any
}

/// Terminal matcher allowing arbitrary trailing arguments
pub fn any_rest() -> Matcher {
    Matcher::AnyRest
}

pub fn string() -> Matcher {
    Matcher::TypeIs("string")
}

pub fn number() -> Matcher {
    Matcher::TypeIs("number")
}

pub fn table() -> Matcher {
    Matcher::TypeIs("table")
}

pub fn boolean() -> Matcher {
    Matcher::TypeIs("boolean")
}

pub fn function() -> Matcher {
    Matcher::TypeIs("function")
}

pub fn callable() -> Matcher {
    Matcher::Callable
}

pub fn table_containing(partial: Value) -> Matcher {
    Matcher::TableContaining(partial)
}

pub fn deep_eq(expected: impl Into<Value>) -> Matcher {
    Matcher::DeepEqual(expected.into())
}

pub fn eq(expected: impl Into<Value>) -> Matcher {
    Matcher::Exact(expected.into())
}

pub fn custom(predicate: impl Fn(&Value) -> bool + 'static) -> Matcher {
    Matcher::Custom(Rc::new(predicate))
}

/// Compare a call's argument list against a matcher sequence
pub fn match_args(matchers: &[Matcher], args: &[Value]) -> bool {
    let rest_open = matches!(matchers.last(), Some(Matcher::AnyRest));
    let positional = if rest_open {
        &matchers[..matchers.len() - 1]
    } else {
        matchers
    };

    if !rest_open && args.len() > positional.len() {
        return false;
    }
    positional.iter().enumerate().all(|(i, matcher)| {
        let arg = args.get(i).cloned().unwrap_or(Value::Nil);
        matcher.matches(&arg)
    })
}
