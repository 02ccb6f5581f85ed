//! Structured error model
//!
//! Every failure that crosses a public API boundary is a [`VouchError`]:
//! a category, a severity, a message, free-form context, an optional cause
//! chain, and a traceback captured at creation. User closures (case bodies,
//! hooks, predicates) run under [`try_protected`], which converts panics
//! into RUNTIME errors instead of unwinding into the scheduler.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::Path;

/// Error category, determining recovery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Bad arguments to API functions
    Validation,
    /// Filesystem and persistence failures
    Io,
    /// Configuration file parsing
    Parse,
    /// User code throwing during a body or hook
    Runtime,
    /// Async deadlines and case timeouts
    Timeout,
    /// Missing required modules or invalid setup at init
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Io => "IO",
            ErrorCategory::Parse => "PARSE",
            ErrorCategory::Runtime => "RUNTIME",
            ErrorCategory::Timeout => "TIMEOUT",
            ErrorCategory::Configuration => "CONFIGURATION",
        };
        write!(f, "{}", s)
    }
}

/// Severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fatal,
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Fatal => "FATAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        };
        write!(f, "{}", s)
    }
}

/// Structured error carried by every fallible public operation
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}/{severity}] {message}")]
pub struct VouchError {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    /// Free-form key/value context
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
    /// Chained cause, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<VouchError>>,
    /// Backtrace string captured at creation
    #[serde(default)]
    pub traceback: String,
}

pub type Result<T> = std::result::Result<T, VouchError>;

/// Context key that tags assertion-failure diagnostics
pub const CTX_KIND: &str = "kind";
/// `kind` value for assertion diagnostics raised by the assertion engine
pub const KIND_ASSERTION: &str = "assertion";
/// `kind` value for the pending-case marker
pub const KIND_PENDING: &str = "pending";

impl VouchError {
    pub fn new(message: impl Into<String>, category: ErrorCategory, severity: Severity) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
            context: BTreeMap::new(),
            cause: None,
            traceback: capture_traceback(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Validation, Severity::Error)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Io, Severity::Error)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Parse, Severity::Error)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Runtime, Severity::Error)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Timeout, Severity::Error)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Configuration, Severity::Fatal)
    }

    /// Diagnostic raised when a terminal assertion predicate fails
    pub fn assertion_failure(message: impl Into<String>) -> Self {
        Self::validation(message).with_context(CTX_KIND, KIND_ASSERTION)
    }

    /// Marker returned by `pending()`; the scheduler turns it into a skip
    pub fn pending_marker(reason: impl Into<String>) -> Self {
        Self::new(reason, ErrorCategory::Runtime, Severity::Info)
            .with_context(CTX_KIND, KIND_PENDING)
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn caused_by(mut self, cause: VouchError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_assertion_failure(&self) -> bool {
        self.context.get(CTX_KIND).map(String::as_str) == Some(KIND_ASSERTION)
    }

    pub fn is_pending(&self) -> bool {
        self.context.get(CTX_KIND).map(String::as_str) == Some(KIND_PENDING)
    }

    /// Multi-line rendering: message, context pairs, and the cause chain
    pub fn format_full(&self) -> String {
        let mut out = format!("[{}/{}] {}", self.category, self.severity, self.message);
        if !self.context.is_empty() {
            let pairs: Vec<String> = self
                .context
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            out.push_str(&format!(" ({})", pairs.join(", ")));
        }
        let mut cause = self.cause.as_deref();
        while let Some(c) = cause {
            out.push_str(&format!(
                "\n  caused by: [{}/{}] {}",
                c.category, c.severity, c.message
            ));
            cause = c.cause.as_deref();
        }
        out
    }
}

fn capture_traceback() -> String {
    std::backtrace::Backtrace::force_capture().to_string()
}

/// Run a fallible closure, converting panics into RUNTIME errors.
///
/// Never unwinds into the caller: a panic from user code comes back as
/// `Err` with the panic payload as the message.
pub fn try_protected<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(VouchError::runtime(panic_message(&payload))),
    }
}

/// Extract a printable message from a panic payload
pub fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Run an I/O closure, converting `io::Error` into an IO-category error
/// carrying the path and operation in its context.
pub fn safe_io<T>(
    op: &str,
    path: &Path,
    f: impl FnOnce() -> std::io::Result<T>,
) -> Result<T> {
    f().map_err(|e| {
        VouchError::io(format!("{} failed for {}: {}", op, path.display(), e))
            .with_context("op", op)
            .with_context("path", path.display().to_string())
    })
}
