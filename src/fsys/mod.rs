//! Filesystem abstraction
//!
//! Path normalization, atomic writes (sibling temp + rename), recursive
//! discovery with `*`-only globs, and the temp-file facility used by the
//! scheduler's test contexts.

pub mod temp;

pub use temp::TempRegistry;

use crate::error::{safe_io, Result, VouchError};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use walkdir::WalkDir;

static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Absolute, lexically collapsed form of a path. Does not touch the
/// filesystem, so nonexistent paths normalize too.
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Forward-slash canonical string form, used as a map key by the coverage
/// engine so the same file never appears twice under different spellings.
pub fn canonical_string(path: &Path) -> String {
    normalize(path).to_string_lossy().replace('\\', "/")
}

/// Join path segments onto a base
pub fn join(base: &Path, parts: &[&str]) -> PathBuf {
    let mut out = base.to_path_buf();
    for part in parts {
        out.push(part);
    }
    out
}

pub fn exists(path: &Path) -> bool {
    path.exists()
}

pub fn is_directory(path: &Path) -> bool {
    path.is_dir()
}

pub fn read_file(path: &Path) -> Result<String> {
    safe_io("read_file", path, || fs::read_to_string(path))
}

/// Atomic write: write to a sibling temp file, then rename over the target.
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    let tmp = sibling_temp_path(path);
    safe_io("write_file", path, || {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&tmp, content)?;
        match fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(e)
            }
        }
    })
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let n = WRITE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "out".to_string());
    path.with_file_name(format!(".{}.tmp-{}-{}", name, std::process::id(), n))
}

pub fn append_file(path: &Path, content: &str) -> Result<()> {
    use std::io::Write;
    safe_io("append_file", path, || {
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(content.as_bytes())
    })
}

pub fn delete_file(path: &Path) -> Result<()> {
    safe_io("delete_file", path, || fs::remove_file(path))
}

pub fn delete_directory(path: &Path) -> Result<()> {
    safe_io("delete_directory", path, || fs::remove_dir_all(path))
}

pub fn create_directory(path: &Path) -> Result<()> {
    safe_io("create_directory", path, || fs::create_dir_all(path))
}

pub fn get_modified_time(path: &Path) -> Result<SystemTime> {
    safe_io("get_modified_time", path, || {
        fs::metadata(path).and_then(|m| m.modified())
    })
}

/// Compile a `*`-only glob into an anchored regex. `*` is the sole
/// wildcard and matches any run of characters, including separators.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    if pattern.is_empty() {
        return Err(VouchError::validation("empty glob pattern"));
    }
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for ch in pattern.chars() {
        if ch == '*' {
            source.push_str(".*");
        } else {
            source.push_str(&regex::escape(&ch.to_string()));
        }
    }
    source.push('$');
    Regex::new(&source)
        .map_err(|e| VouchError::validation(format!("invalid glob pattern '{}': {}", pattern, e)))
}

/// Options for [`discover_files`]
#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    pub recursive: bool,
    /// Extension allow-list (without dots); empty means no extension filter
    pub extensions: BTreeSet<String>,
    /// Directory names skipped wholesale
    pub ignore_directories: BTreeSet<String>,
    /// Second glob applied to file names after the primary pattern
    pub extra_filter: Option<String>,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            extensions: BTreeSet::new(),
            ignore_directories: BTreeSet::new(),
            extra_filter: None,
        }
    }
}

/// Walk `root` and return the absolute paths of files whose name matches
/// the glob `pattern`, lexicographically sorted (case-sensitive).
pub fn discover_files(
    root: &Path,
    pattern: &str,
    options: &DiscoverOptions,
) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(
            VouchError::io(format!("discovery root does not exist: {}", root.display()))
                .with_context("path", root.display().to_string()),
        );
    }

    let name_re = glob_to_regex(pattern)?;
    let extra_re = match &options.extra_filter {
        Some(p) => Some(glob_to_regex(p)?),
        None => None,
    };

    let max_depth = if options.recursive { usize::MAX } else { 1 };
    let ignored = options.ignore_directories.clone();

    let mut found = Vec::new();
    let walker = WalkDir::new(root)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(move |entry| {
            if entry.file_type().is_dir() {
                let name = entry.file_name().to_string_lossy();
                !ignored.contains(name.as_ref())
            } else {
                true
            }
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name_re.is_match(&name) {
            continue;
        }
        if !options.extensions.is_empty() {
            let ext = entry
                .path()
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default();
            if !options.extensions.contains(&ext) {
                continue;
            }
        }
        if let Some(re) = &extra_re {
            if !re.is_match(&name) {
                continue;
            }
        }
        found.push(normalize(entry.path()));
    }

    found.sort_by(|a, b| canonical_string(a).cmp(&canonical_string(b)));
    Ok(found)
}
