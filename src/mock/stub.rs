//! Stubs: spies with a programmable replacement body

use super::spy::{make_recording_wrapper, Spy};
use crate::error::{Result, VouchError};
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// What a sequence stub returns once its programmed values run out
#[derive(Clone)]
pub enum ExhaustPolicy {
    /// Return nil forever
    Nil,
    /// Return a fixed fallback value
    Fallback(Value),
    /// Fall through to the original function (nil when there is none)
    Original,
    /// Start over from the first value
    Cycle,
}

enum Program {
    Constant(Vec<Value>),
    Closure(Value),
    Sequence {
        values: Vec<Value>,
        index: usize,
        policy: ExhaustPolicy,
    },
}

/// A spy whose body is programmed rather than forwarded
#[derive(Clone)]
pub struct Stub {
    spy: Spy,
    program: Rc<RefCell<Program>>,
}

impl Stub {
    /// Replace `target[method]`, remembering whatever was there (including
    /// nothing) for restore. The member does not need to be callable.
    pub fn on(seq: Rc<Cell<u64>>, target: &Value, method: &str, replacement: Value) -> Result<Stub> {
        let table = target
            .as_table()
            .ok_or_else(|| {
                VouchError::validation(format!(
                    "stub requires a table target, got {}",
                    target.type_name()
                ))
            })?
            .clone();
        let original = target.get(method);
        let program = Rc::new(RefCell::new(program_for(replacement)));
        let inner = Spy::make_inner(
            seq,
            Some((table, method.to_string())),
            Some(original.clone()),
        );
        let wrapper = make_recording_wrapper(
            inner.clone(),
            program_body(program.clone(), Some(original)),
        );
        target.set(method, wrapper.clone())?;
        Ok(Stub {
            spy: Spy::from_parts(inner, wrapper),
            program,
        })
    }

    /// Standalone stub; obtain the callable with [`Spy::callable`]
    pub fn new(seq: Rc<Cell<u64>>, replacement: Value) -> Stub {
        let program = Rc::new(RefCell::new(program_for(replacement)));
        let inner = Spy::make_inner(seq, None, None);
        let wrapper = make_recording_wrapper(inner.clone(), program_body(program.clone(), None));
        Stub {
            spy: Spy::from_parts(inner, wrapper),
            program,
        }
    }

    /// Program a constant single return value
    pub fn returns(&self, value: impl Into<Value>) -> &Self {
        *self.program.borrow_mut() = Program::Constant(vec![value.into()]);
        self
    }

    /// Program a constant multi-value return
    pub fn returns_many(&self, values: Vec<Value>) -> &Self {
        *self.program.borrow_mut() = Program::Constant(values);
        self
    }

    /// Program a closure body
    pub fn returns_with(&self, body: Value) -> Result<&Self> {
        if !body.is_callable() {
            return Err(VouchError::validation(
                "returns_with requires a callable value",
            ));
        }
        *self.program.borrow_mut() = Program::Closure(body);
        Ok(self)
    }

    /// Program one value per call, with the given exhaustion policy
    pub fn returns_in_sequence(&self, values: Vec<Value>, policy: ExhaustPolicy) -> &Self {
        *self.program.borrow_mut() = Program::Sequence {
            values,
            index: 0,
            policy,
        };
        self
    }

    /// Rewind a sequence program to its first value
    pub fn reset_sequence(&self) {
        if let Program::Sequence { index, .. } = &mut *self.program.borrow_mut() {
            *index = 0;
        }
    }
}

impl std::ops::Deref for Stub {
    type Target = Spy;

    fn deref(&self) -> &Spy {
        &self.spy
    }
}

fn program_for(replacement: Value) -> Program {
    if replacement.is_callable() {
        Program::Closure(replacement)
    } else {
        Program::Constant(vec![replacement])
    }
}

fn program_body(
    program: Rc<RefCell<Program>>,
    original: Option<Value>,
) -> impl Fn(&[Value]) -> Result<Vec<Value>> {
    move |args| {
        // Resolve under a short borrow; closures and originals are called
        // after it is released so a body can reprogram the stub.
        enum Step {
            Values(Vec<Value>),
            Call(Value),
        }
        let step = {
            let mut program = program.borrow_mut();
            match &mut *program {
                Program::Constant(values) => Step::Values(values.clone()),
                Program::Closure(f) => Step::Call(f.clone()),
                Program::Sequence {
                    values,
                    index,
                    policy,
                } => {
                    if *index < values.len() {
                        let value = values[*index].clone();
                        *index += 1;
                        Step::Values(vec![value])
                    } else {
                        match policy {
                            ExhaustPolicy::Nil => Step::Values(vec![Value::Nil]),
                            ExhaustPolicy::Fallback(v) => Step::Values(vec![v.clone()]),
                            ExhaustPolicy::Original => match &original {
                                Some(f) if f.is_callable() => Step::Call(f.clone()),
                                _ => Step::Values(vec![Value::Nil]),
                            },
                            ExhaustPolicy::Cycle => {
                                if values.is_empty() {
                                    Step::Values(vec![Value::Nil])
                                } else {
                                    let value = values[*index % values.len()].clone();
                                    *index += 1;
                                    Step::Values(vec![value])
                                }
                            }
                        }
                    }
                }
            }
        };
        match step {
            Step::Values(values) => Ok(values),
            Step::Call(f) => f.call(args),
        }
    }
}
