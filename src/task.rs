//! Cooperative scheduling helpers
//!
//! The host framework suspends only at explicit points: `sleep_for`,
//! `wait_until`, and parallel waits. Tasks run on their own threads with a
//! channel carrying the outcome back; a panic inside a task comes back as
//! a RUNTIME error, a missed deadline as TIMEOUT.

use crate::error::{try_protected, Result, VouchError};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Suspend the current context for at least `ms` milliseconds
pub fn sleep_for(ms: u64) {
    std::thread::sleep(Duration::from_millis(ms));
}

/// Poll `predicate` every `interval_ms` until it is truthy; TIMEOUT once
/// `timeout_ms` have elapsed without success.
pub fn wait_until(
    mut predicate: impl FnMut() -> bool,
    timeout_ms: u64,
    interval_ms: u64,
) -> Result<()> {
    let started = Instant::now();
    let timeout = Duration::from_millis(timeout_ms);
    loop {
        if predicate() {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(VouchError::timeout(format!(
                "condition not met within {} ms",
                timeout_ms
            )));
        }
        std::thread::sleep(Duration::from_millis(interval_ms.max(1)));
    }
}

/// Handle to a spawned task
pub struct TaskHandle<R> {
    receiver: mpsc::Receiver<Result<R>>,
}

/// Run `f` on its own thread. Panics inside the task are converted to
/// RUNTIME errors when joined.
pub fn spawn<R: Send + 'static>(f: impl FnOnce() -> Result<R> + Send + 'static) -> TaskHandle<R> {
    let (sender, receiver) = mpsc::channel();
    std::thread::spawn(move || {
        let outcome = try_protected(f);
        let _ = sender.send(outcome);
    });
    TaskHandle { receiver }
}

impl<R> TaskHandle<R> {
    /// Wait for completion; TIMEOUT when a deadline is given and missed.
    pub fn join(self, timeout_ms: Option<u64>) -> Result<R> {
        match timeout_ms {
            None => self
                .receiver
                .recv()
                .unwrap_or_else(|_| Err(VouchError::runtime("task dropped without result"))),
            Some(ms) => match self.receiver.recv_timeout(Duration::from_millis(ms)) {
                Ok(outcome) => outcome,
                Err(mpsc::RecvTimeoutError::Timeout) => Err(VouchError::timeout(format!(
                    "task did not complete within {} ms",
                    ms
                ))),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    Err(VouchError::runtime("task dropped without result"))
                }
            },
        }
    }
}

/// Run every closure on its own task and await completion of all within
/// `timeout_ms`. The first task error is reported; a missed deadline is
/// TIMEOUT.
pub fn run_parallel(
    tasks: Vec<Box<dyn FnOnce() -> Result<()> + Send>>,
    timeout_ms: u64,
) -> Result<()> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let handles: Vec<TaskHandle<()>> = tasks.into_iter().map(spawn).collect();

    let mut first_error = None;
    for handle in handles {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        match handle.join(Some(remaining)) {
            Ok(()) => {}
            Err(e) if e.category == crate::error::ErrorCategory::Timeout => {
                return Err(VouchError::timeout(format!(
                    "parallel tasks did not complete within {} ms",
                    timeout_ms
                )));
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Absolute deadline used for case-level timeouts. Checked at suspension
/// points; expiry raises TIMEOUT into the running frame.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn in_ms(ms: u64) -> Self {
        Self {
            at: Some(Instant::now() + Duration::from_millis(ms)),
        }
    }

    pub fn expired(&self) -> bool {
        self.at.map(|at| Instant::now() >= at).unwrap_or(false)
    }

    pub fn check(&self) -> Result<()> {
        if self.expired() {
            Err(VouchError::timeout("case deadline exceeded"))
        } else {
            Ok(())
        }
    }

    /// Milliseconds left, clamped at zero; `None` when unbounded
    pub fn remaining_ms(&self) -> Option<u64> {
        self.at.map(|at| {
            at.checked_duration_since(Instant::now())
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0)
        })
    }
}
