//! Test file discovery
//!
//! Thin wrapper over [`fsys::discover_files`] applying project defaults:
//! a `*_test*` include pattern, `node_modules` and `.git` ignored, and
//! recursive traversal. Everything is overridable through the `discovery`
//! configuration prefix.

use crate::config::{ConfigStore, FieldType, Schema};
use crate::error::Result;
use crate::fsys::{self, DiscoverOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_PATTERN: &str = "*_test*";

/// Result of a discovery run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveredFiles {
    pub files: Vec<PathBuf>,
}

/// Config keys read from the `discovery` prefix
pub fn register_config(config: &mut ConfigStore) {
    config.register_module(
        "discovery",
        Schema::new()
            .field("pattern", FieldType::Str)
            .field("extensions", FieldType::List)
            .field("ignore_directories", FieldType::List)
            .field("recursive", FieldType::Bool),
        serde_json::json!({
            "pattern": DEFAULT_PATTERN,
            "extensions": [],
            "ignore_directories": ["node_modules", ".git"],
            "recursive": true,
        }),
    );
}

/// Find test files under `dir` (default: current directory) matching
/// `pattern` (default: the configured include pattern). Deterministic
/// lexicographic order; a missing root is an IO error.
pub fn discover(
    config: &ConfigStore,
    dir: Option<&Path>,
    pattern: Option<&str>,
) -> Result<DiscoveredFiles> {
    let root = dir
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let pattern = pattern
        .map(String::from)
        .or_else(|| config.get_string("discovery.pattern"))
        .unwrap_or_else(|| DEFAULT_PATTERN.to_string());

    let extensions: BTreeSet<String> = config
        .get_string_list("discovery.extensions")
        .into_iter()
        .collect();
    let ignore_directories: BTreeSet<String> = config
        .get_string_list("discovery.ignore_directories")
        .into_iter()
        .collect();
    let recursive = config.get_bool("discovery.recursive").unwrap_or(true);

    let options = DiscoverOptions {
        recursive,
        extensions,
        ignore_directories,
        extra_filter: None,
    };
    let files = fsys::discover_files(&root, &pattern, &options)?;
    Ok(DiscoveredFiles { files })
}
