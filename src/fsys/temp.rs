//! Temp-file lifecycle tied to test contexts
//!
//! The scheduler pushes a context on case entry and pops it on exit; every
//! temp path created or registered while a context is open is deleted when
//! that context pops. Paths registered in a suite-level `before` hook live
//! in the enclosing context and survive inner pops.

use crate::error::{Result, VouchError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stacked registry of temp paths
pub struct TempRegistry {
    /// contexts[0] is the root context, cleaned on drop
    contexts: Vec<Vec<PathBuf>>,
    cleanup_failures: usize,
}

impl Default for TempRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TempRegistry {
    pub fn new() -> Self {
        Self {
            contexts: vec![Vec::new()],
            cleanup_failures: 0,
        }
    }

    /// Open a new context. Paths created until the matching
    /// [`pop_context`](Self::pop_context) belong to it.
    pub fn push_context(&mut self) {
        self.contexts.push(Vec::new());
    }

    /// Close the top context and delete everything registered in it.
    /// The root context cannot be popped.
    pub fn pop_context(&mut self) {
        if self.contexts.len() <= 1 {
            return;
        }
        let paths = self.contexts.pop().unwrap_or_default();
        self.delete_paths(paths);
    }

    /// Current context nesting depth (root excluded)
    pub fn depth(&self) -> usize {
        self.contexts.len() - 1
    }

    /// Create a temp file with optional content and suffix, registered in
    /// the current context.
    pub fn create_temp_file(&mut self, content: Option<&str>, suffix: Option<&str>) -> Result<PathBuf> {
        let path = unique_path(suffix.unwrap_or(".tmp"));
        fs::write(&path, content.unwrap_or("")).map_err(|e| {
            VouchError::io(format!("create_temp_file failed: {}", e))
                .with_context("path", path.display().to_string())
        })?;
        self.register(path.clone());
        Ok(path)
    }

    /// Create a temp directory registered in the current context
    pub fn create_temp_dir(&mut self) -> Result<PathBuf> {
        let path = unique_path("");
        fs::create_dir_all(&path).map_err(|e| {
            VouchError::io(format!("create_temp_dir failed: {}", e))
                .with_context("path", path.display().to_string())
        })?;
        self.register(path.clone());
        Ok(path)
    }

    /// Bring an externally created path under management of the current
    /// context.
    pub fn register(&mut self, path: PathBuf) {
        if let Some(top) = self.contexts.last_mut() {
            top.push(path);
        }
    }

    /// Delete everything in every context, including the root context.
    pub fn cleanup_all(&mut self) {
        let contexts = std::mem::take(&mut self.contexts);
        for paths in contexts.into_iter().rev() {
            self.delete_paths(paths);
        }
        self.contexts.push(Vec::new());
    }

    fn delete_paths(&mut self, paths: Vec<PathBuf>) {
        // LIFO so files created inside a registered temp dir go first
        for path in paths.into_iter().rev() {
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else if path.exists() {
                fs::remove_file(&path)
            } else {
                Ok(())
            };
            if result.is_err() {
                if self.cleanup_failures == 0 {
                    eprintln!("warning: failed to clean temp path {}", path.display());
                }
                self.cleanup_failures += 1;
            }
        }
    }
}

impl Drop for TempRegistry {
    fn drop(&mut self) {
        self.cleanup_all();
    }
}

fn unique_path(suffix: &str) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("vouch-{}-{}{}", std::process::id(), n, suffix))
}

/// True if the path is under the system temp directory; used by tests
pub fn in_temp_dir(path: &Path) -> bool {
    path.starts_with(std::env::temp_dir())
}
