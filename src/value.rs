//! Dynamic host value model
//!
//! The framework observes a dynamically-typed scripting host; [`Value`] is
//! the typed rendition of a host value. Containers and functions have
//! shared-reference semantics (`Rc`), so two bindings can alias the same
//! table the way host code would, and reference equality is pointer
//! identity. Scalars compare by value.

use crate::error::{Result, VouchError};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Shared ordered container
pub type SeqRef = Rc<RefCell<Vec<Value>>>;
/// Shared keyed container
pub type TableRef = Rc<RefCell<BTreeMap<String, Value>>>;

/// A callable host function: takes arguments, returns zero or more values.
pub struct FuncInner {
    body: Box<dyn Fn(&[Value]) -> Result<Vec<Value>>>,
    /// Source anchor `(file, line)` reported to the coverage tracker on call
    anchor: Option<(String, u32)>,
    name: Option<String>,
}

impl FuncInner {
    pub fn anchor(&self) -> Option<(&str, u32)> {
        self.anchor.as_ref().map(|(f, l)| (f.as_str(), *l))
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// A dynamically-typed host value
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Num(f64),
    Str(String),
    Seq(SeqRef),
    Table(TableRef),
    Func(Rc<FuncInner>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn num(n: impl Into<f64>) -> Self {
        Value::Num(n.into())
    }

    pub fn seq(items: Vec<Value>) -> Self {
        Value::Seq(Rc::new(RefCell::new(items)))
    }

    pub fn table(pairs: Vec<(&str, Value)>) -> Self {
        let map: BTreeMap<String, Value> = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Value::Table(Rc::new(RefCell::new(map)))
    }

    pub fn empty_table() -> Self {
        Value::Table(Rc::new(RefCell::new(BTreeMap::new())))
    }

    pub fn func(f: impl Fn(&[Value]) -> Result<Vec<Value>> + 'static) -> Self {
        Value::Func(Rc::new(FuncInner {
            body: Box::new(f),
            anchor: None,
            name: None,
        }))
    }

    /// A function with a source anchor; the anchor is reported to the
    /// coverage tracker each time the function is called through a spy or
    /// the scheduler.
    pub fn func_at(
        file: impl Into<String>,
        line: u32,
        f: impl Fn(&[Value]) -> Result<Vec<Value>> + 'static,
    ) -> Self {
        Value::Func(Rc::new(FuncInner {
            body: Box::new(f),
            anchor: Some((file.into(), line)),
            name: None,
        }))
    }

    pub fn named_func(
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> Result<Vec<Value>> + 'static,
    ) -> Self {
        Value::Func(Rc::new(FuncInner {
            body: Box::new(f),
            anchor: None,
            name: Some(name.into()),
        }))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::Seq(_) => "sequence",
            Value::Table(_) => "table",
            Value::Func(_) => "function",
        }
    }

    /// Host truthiness: only `nil` and `false` are falsy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Func(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&SeqRef> {
        match self {
            Value::Seq(s) => Some(s),
            _ => None,
        }
    }

    /// Length of a string (bytes), sequence, or table (key count)
    pub fn length(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.len()),
            Value::Seq(s) => Some(s.borrow().len()),
            Value::Table(t) => Some(t.borrow().len()),
            _ => None,
        }
    }

    /// Reference equality: pointer identity for containers and functions,
    /// value equality for scalars.
    pub fn ref_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Seq(a), Value::Seq(b)) => Rc::ptr_eq(a, b),
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Func(a), Value::Func(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Stable identity for cycle detection; 0 for scalars
    pub fn identity(&self) -> usize {
        match self {
            Value::Seq(s) => Rc::as_ptr(s) as *const () as usize,
            Value::Table(t) => Rc::as_ptr(t) as *const () as usize,
            Value::Func(f) => Rc::as_ptr(f) as *const () as usize,
            _ => 0,
        }
    }

    /// Call a function value. Non-callables fail with VALIDATION.
    pub fn call(&self, args: &[Value]) -> Result<Vec<Value>> {
        match self {
            Value::Func(f) => (f.body)(args),
            other => Err(VouchError::validation(format!(
                "attempt to call a {} value",
                other.type_name()
            ))),
        }
    }

    /// Table member lookup; nil for missing keys and non-tables
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Table(t) => t.borrow().get(key).cloned().unwrap_or(Value::Nil),
            _ => Value::Nil,
        }
    }

    /// Table member store. Fails with VALIDATION on non-tables.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        match self {
            Value::Table(t) => {
                if value.is_nil() {
                    t.borrow_mut().remove(key);
                } else {
                    t.borrow_mut().insert(key.to_string(), value);
                }
                Ok(())
            }
            other => Err(VouchError::validation(format!(
                "attempt to index a {} value",
                other.type_name()
            ))),
        }
    }

    /// Data-only JSON projection for diagnostics and worker records.
    /// Functions render as a placeholder string; cycles render as `"<cycle>"`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut seen = Vec::new();
        self.to_json_inner(&mut seen)
    }

    fn to_json_inner(&self, seen: &mut Vec<usize>) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Num(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Func(f) => serde_json::Value::String(match f.name() {
                Some(name) => format!("<function {}>", name),
                None => "<function>".to_string(),
            }),
            Value::Seq(s) => {
                let id = self.identity();
                if seen.contains(&id) {
                    return serde_json::Value::String("<cycle>".to_string());
                }
                seen.push(id);
                let items = s.borrow().iter().map(|v| v.to_json_inner(seen)).collect();
                seen.pop();
                serde_json::Value::Array(items)
            }
            Value::Table(t) => {
                let id = self.identity();
                if seen.contains(&id) {
                    return serde_json::Value::String("<cycle>".to_string());
                }
                seen.push(id);
                let map = t
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json_inner(seen)))
                    .collect();
                seen.pop();
                serde_json::Value::Object(map)
            }
        }
    }

    /// Construct a value from data-only JSON
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Num(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::seq(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Table(Rc::new(RefCell::new(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ))),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", render(self))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", render(self))
    }
}

/// Render a value for diagnostics: strings quoted, containers inline,
/// cycles marked.
pub fn render(value: &Value) -> String {
    let mut seen = Vec::new();
    render_inner(value, &mut seen)
}

fn render_inner(value: &Value, seen: &mut Vec<usize>) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Num(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Value::Str(s) => format!("'{}'", s),
        Value::Func(f) => match f.name() {
            Some(name) => format!("<function {}>", name),
            None => "<function>".to_string(),
        },
        Value::Seq(s) => {
            let id = value.identity();
            if seen.contains(&id) {
                return "<cycle>".to_string();
            }
            seen.push(id);
            let items: Vec<String> = s
                .borrow()
                .iter()
                .map(|v| render_inner(v, seen))
                .collect();
            seen.pop();
            format!("[{}]", items.join(", "))
        }
        Value::Table(t) => {
            let id = value.identity();
            if seen.contains(&id) {
                return "<cycle>".to_string();
            }
            seen.push(id);
            let pairs: Vec<String> = t
                .borrow()
                .iter()
                .map(|(k, v)| format!("{} = {}", k, render_inner(v, seen)))
                .collect();
            seen.pop();
            format!("{{{}}}", pairs.join(", "))
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Num(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Num(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Num(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}
