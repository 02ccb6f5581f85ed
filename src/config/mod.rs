//! Central configuration store
//!
//! A single tree of values addressed by dotted paths. Modules register a
//! schema and defaults under a prefix; `set` type-checks against the
//! schema and notifies change listeners; file load/save is atomic.

mod schema;

pub use schema::{FieldSpec, FieldType, Schema};

use crate::error::{Result, VouchError};
use crate::fsys;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = ".vouchrc.json";

type ChangeCallback = Box<dyn Fn(&str, &Json, &Json)>;

struct Listener {
    prefix: String,
    callback: ChangeCallback,
}

/// Process-wide configuration tree (one per engine)
pub struct ConfigStore {
    values: Json,
    defaults: Json,
    schemas: BTreeMap<String, Schema>,
    listeners: Vec<Listener>,
    /// Default file path for load/save when none is given explicitly
    file_path: Option<PathBuf>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            values: Json::Object(Default::default()),
            defaults: Json::Object(Default::default()),
            schemas: BTreeMap::new(),
            listeners: Vec::new(),
            file_path: None,
        }
    }

    pub fn with_file_path(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    /// Declare the shape under `prefix`. Idempotent: re-registration merges
    /// schemas and defaults without clobbering what is already there.
    pub fn register_module(&mut self, prefix: &str, schema: Schema, defaults: Json) {
        match self.schemas.get_mut(prefix) {
            Some(existing) => existing.merge(schema),
            None => {
                self.schemas.insert(prefix.to_string(), schema);
            }
        }
        for (rel, value) in flatten(&defaults) {
            let path = join_path(prefix, &rel);
            if get_path(&self.defaults, &path).is_none() {
                set_path(&mut self.defaults, &path, value);
            }
        }
    }

    /// Current value at `path`, falling back to registered defaults
    pub fn get(&self, path: &str) -> Option<Json> {
        get_path(&self.values, path)
            .or_else(|| get_path(&self.defaults, path))
            .cloned()
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(|v| v.as_bool())
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(|v| v.as_u64())
    }

    pub fn get_string(&self, path: &str) -> Option<String> {
        self.get(path).and_then(|v| v.as_str().map(String::from))
    }

    pub fn get_string_list(&self, path: &str) -> Vec<String> {
        self.get(path)
            .and_then(|v| v.as_array().cloned())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Merged view of defaults and explicit values
    pub fn get_all(&self) -> Json {
        let mut merged = self.defaults.clone();
        deep_merge(&mut merged, &self.values);
        merged
    }

    /// Type-checked write. Fails with VALIDATION on schema mismatch; on
    /// success, listeners registered under any prefix of `path` run
    /// synchronously. A listener panic is caught and warned, never aborting
    /// the write.
    pub fn set(&mut self, path: &str, value: Json) -> Result<()> {
        self.validate_against_schema(path, &value)?;
        let old = self.get(path).unwrap_or(Json::Null);
        set_path(&mut self.values, path, value.clone());
        self.notify(path, &old, &value);
        Ok(())
    }

    fn validate_against_schema(&self, path: &str, value: &Json) -> Result<()> {
        if let Some((prefix, schema)) = self.schema_for(path) {
            let rel = &path[prefix.len() + 1..];
            schema.validate(rel, value)?;
        }
        Ok(())
    }

    /// Longest registered prefix that strictly contains `path`
    fn schema_for(&self, path: &str) -> Option<(&str, &Schema)> {
        self.schemas
            .iter()
            .filter(|(prefix, _)| is_path_prefix(prefix, path) && path.len() > prefix.len())
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, schema)| (prefix.as_str(), schema))
    }

    /// Register a change listener for every write under `prefix`
    pub fn on_change(&mut self, prefix: &str, callback: impl Fn(&str, &Json, &Json) + 'static) {
        self.listeners.push(Listener {
            prefix: prefix.to_string(),
            callback: Box::new(callback),
        });
    }

    fn notify(&self, path: &str, old: &Json, new: &Json) {
        for listener in &self.listeners {
            if listener.prefix.is_empty() || is_path_prefix(&listener.prefix, path) {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    (listener.callback)(path, old, new)
                }));
                if outcome.is_err() {
                    eprintln!(
                        "warning: config change listener for '{}' panicked on {}",
                        listener.prefix, path
                    );
                }
            }
        }
    }

    /// Atomically replace values from a configuration file. A missing file
    /// is only an error when `path` was given explicitly. Parse failures
    /// are PARSE; schema violations are VALIDATION and leave the store
    /// untouched.
    pub fn load_from_file(&mut self, path: Option<&Path>) -> Result<()> {
        let (resolved, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match &self.file_path {
                Some(p) => (p.clone(), false),
                None => (PathBuf::from(CONFIG_FILENAME), false),
            },
        };

        if !resolved.exists() {
            if explicit {
                return Err(VouchError::io(format!(
                    "config file not found: {}",
                    resolved.display()
                )));
            }
            return Ok(());
        }

        let content = fsys::read_file(&resolved)?;
        let incoming: Json = serde_json::from_str(&content).map_err(|e| {
            VouchError::parse(format!("invalid JSON in {}: {}", resolved.display(), e))
        })?;
        if !incoming.is_object() {
            return Err(VouchError::parse(format!(
                "config root must be an object: {}",
                resolved.display()
            )));
        }

        let flat = flatten(&incoming);
        for (key, value) in &flat {
            self.validate_against_schema(key, value)?;
        }

        let old_values = std::mem::replace(&mut self.values, incoming);
        for (key, new_value) in &flat {
            let old = get_path(&old_values, key).cloned().unwrap_or(Json::Null);
            if &old != new_value {
                self.notify(key, &old, new_value);
            }
        }
        Ok(())
    }

    /// Serialize the merged view and write it atomically
    pub fn save_to_file(&self, path: Option<&Path>) -> Result<()> {
        let resolved = match path {
            Some(p) => p.to_path_buf(),
            None => self
                .file_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME)),
        };
        let content = serde_json::to_string_pretty(&self.get_all())
            .map_err(|e| VouchError::io(format!("serialize config: {}", e)))?;
        fsys::write_file(&resolved, &content)
    }

    /// Merged snapshot suitable for rebuilding a store in a worker
    pub fn snapshot(&self) -> Json {
        self.get_all()
    }

    /// Replace the value tree wholesale; used when bootstrapping a worker
    /// from a snapshot that already passed validation.
    pub fn replace_values(&mut self, values: Json) {
        if values.is_object() {
            self.values = values;
        }
    }

    /// Restore defaults for the subtree under `prefix`, or everything
    pub fn reset(&mut self, prefix: Option<&str>) {
        match prefix {
            None => self.values = Json::Object(Default::default()),
            Some(p) => remove_path(&mut self.values, p),
        }
    }
}

/// Search `dir` and its parents for the project config file
pub fn find_config_in_parents(start: &Path) -> Option<PathBuf> {
    let mut dir = start;
    loop {
        let candidate = dir.join(CONFIG_FILENAME);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
}

fn join_path(prefix: &str, rel: &str) -> String {
    if prefix.is_empty() {
        rel.to_string()
    } else {
        format!("{}.{}", prefix, rel)
    }
}

/// Segment-aligned prefix test: `a.b` is a prefix of `a.b.c` but not `a.bc`
fn is_path_prefix(prefix: &str, path: &str) -> bool {
    path == prefix || path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'.')
}

fn get_path<'a>(tree: &'a Json, path: &str) -> Option<&'a Json> {
    let mut node = tree;
    for segment in path.split('.') {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

fn set_path(tree: &mut Json, path: &str, value: Json) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut node = tree;
    for segment in &segments[..segments.len() - 1] {
        if !node.is_object() {
            *node = Json::Object(Default::default());
        }
        let map = node.as_object_mut().unwrap();
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Json::Object(Default::default()));
    }
    if !node.is_object() {
        *node = Json::Object(Default::default());
    }
    node.as_object_mut()
        .unwrap()
        .insert(segments[segments.len() - 1].to_string(), value);
}

fn remove_path(tree: &mut Json, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut node = tree;
    for segment in &segments[..segments.len() - 1] {
        match node.as_object_mut().and_then(|m| m.get_mut(*segment)) {
            Some(next) => node = next,
            None => return,
        }
    }
    if let Some(map) = node.as_object_mut() {
        map.remove(segments[segments.len() - 1]);
    }
}

/// Flatten a JSON object tree into dotted leaf paths
fn flatten(tree: &Json) -> Vec<(String, Json)> {
    let mut out = Vec::new();
    flatten_into(tree, String::new(), &mut out);
    out
}

fn flatten_into(node: &Json, path: String, out: &mut Vec<(String, Json)>) {
    match node.as_object() {
        Some(map) if !map.is_empty() => {
            for (key, value) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                flatten_into(value, child, out);
            }
        }
        _ => {
            if !path.is_empty() {
                out.push((path, node.clone()));
            }
        }
    }
}

fn deep_merge(base: &mut Json, overlay: &Json) {
    match (base.as_object_mut(), overlay.as_object()) {
        (Some(base_map), Some(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value)
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        _ => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn store() -> ConfigStore {
        let mut store = ConfigStore::new();
        store.register_module(
            "coverage",
            Schema::new()
                .field("enabled", FieldType::Bool)
                .ranged_field("save_step_size", FieldType::Int, 1.0, 100000.0)
                .field("statsfile", FieldType::Str),
            json!({"enabled": false, "save_step_size": 1000}),
        );
        store
    }

    #[test]
    fn test_get_returns_defaults_when_unset() {
        let store = store();
        assert_eq!(store.get("coverage.enabled"), Some(json!(false)));
        assert_eq!(store.get("coverage.save_step_size"), Some(json!(1000)));
        assert_eq!(store.get("coverage.missing"), None);
    }

    #[test]
    fn test_set_and_get() {
        let mut store = store();
        store.set("coverage.enabled", json!(true)).unwrap();
        assert_eq!(store.get("coverage.enabled"), Some(json!(true)));
    }

    #[test]
    fn test_set_type_mismatch_is_validation() {
        let mut store = store();
        let err = store.set("coverage.enabled", json!("yes")).unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::Validation);
        // value unchanged
        assert_eq!(store.get("coverage.enabled"), Some(json!(false)));
    }

    #[test]
    fn test_set_range_violation() {
        let mut store = store();
        assert!(store.set("coverage.save_step_size", json!(0)).is_err());
    }

    #[test]
    fn test_set_unknown_key_under_registered_prefix() {
        let mut store = store();
        assert!(store.set("coverage.bogus", json!(1)).is_err());
    }

    #[test]
    fn test_set_outside_registered_prefixes_is_unchecked() {
        let mut store = store();
        store.set("custom.anything", json!(42)).unwrap();
        assert_eq!(store.get("custom.anything"), Some(json!(42)));
    }

    #[test]
    fn test_register_module_idempotent_merge() {
        let mut store = store();
        store.register_module(
            "coverage",
            Schema::new().field("paused", FieldType::Bool),
            json!({"enabled": true, "paused": false}),
        );
        // original default survives; new default lands
        assert_eq!(store.get("coverage.enabled"), Some(json!(false)));
        assert_eq!(store.get("coverage.paused"), Some(json!(false)));
        assert!(store.set("coverage.paused", json!(true)).is_ok());
    }

    #[test]
    fn test_listener_fires_on_matching_prefix() {
        let mut store = store();
        let seen: Rc<RefCell<Vec<(String, Json, Json)>>> = Rc::new(RefCell::new(vec![]));
        let sink = seen.clone();
        store.on_change("coverage", move |path, old, new| {
            sink.borrow_mut()
                .push((path.to_string(), old.clone(), new.clone()));
        });
        store.set("coverage.enabled", json!(true)).unwrap();
        store.set("other.key", json!(1)).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "coverage.enabled");
        assert_eq!(seen[0].1, json!(false));
        assert_eq!(seen[0].2, json!(true));
    }

    #[test]
    fn test_listener_panic_does_not_abort_write() {
        let mut store = store();
        store.on_change("coverage", |_, _, _| panic!("listener bug"));
        store.set("coverage.enabled", json!(true)).unwrap();
        assert_eq!(store.get("coverage.enabled"), Some(json!(true)));
    }

    #[test]
    fn test_reset_subtree() {
        let mut store = store();
        store.set("coverage.enabled", json!(true)).unwrap();
        store.set("custom.key", json!(1)).unwrap();
        store.reset(Some("coverage"));
        assert_eq!(store.get("coverage.enabled"), Some(json!(false)));
        assert_eq!(store.get("custom.key"), Some(json!(1)));
        store.reset(None);
        assert_eq!(store.get("custom.key"), None);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vouch.json");
        let mut saved = store();
        saved.set("coverage.enabled", json!(true)).unwrap();
        saved.save_to_file(Some(path.as_path())).unwrap();

        let mut fresh = store();
        fresh.load_from_file(Some(path.as_path())).unwrap();
        assert_eq!(fresh.get("coverage.enabled"), Some(json!(true)));
    }

    #[test]
    fn test_load_missing_implicit_is_ok() {
        let mut store = store();
        assert!(store.load_from_file(None).is_ok());
    }

    #[test]
    fn test_load_missing_explicit_is_io_error() {
        let mut store = store();
        let err = store
            .load_from_file(Some(Path::new("/no/such/config.json")))
            .unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::Io);
    }

    #[test]
    fn test_load_invalid_json_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{nope").unwrap();
        let mut store = store();
        let err = store.load_from_file(Some(path.as_path())).unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::Parse);
    }

    #[test]
    fn test_load_schema_violation_leaves_store_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad-types.json");
        std::fs::write(&path, r#"{"coverage": {"enabled": "yes"}}"#).unwrap();
        let mut store = store();
        store.set("coverage.enabled", json!(true)).unwrap();
        assert!(store.load_from_file(Some(path.as_path())).is_err());
        assert_eq!(store.get("coverage.enabled"), Some(json!(true)));
    }

    #[test]
    fn test_load_fires_listeners_for_changed_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{"coverage": {"enabled": true}}"#).unwrap();

        let mut store = store();
        let count = Rc::new(RefCell::new(0usize));
        let sink = count.clone();
        store.on_change("coverage", move |_, _, _| *sink.borrow_mut() += 1);
        store.load_from_file(Some(path.as_path())).unwrap();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_find_config_in_parents() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), "{}").unwrap();
        let found = find_config_in_parents(&nested).unwrap();
        assert_eq!(found, dir.path().join(CONFIG_FILENAME));
    }

    #[test]
    fn test_is_path_prefix_segment_aligned() {
        assert!(is_path_prefix("a.b", "a.b.c"));
        assert!(is_path_prefix("a.b", "a.b"));
        assert!(!is_path_prefix("a.b", "a.bc"));
    }

    #[test]
    fn test_get_all_merges_defaults_and_values() {
        let mut store = store();
        store.set("coverage.enabled", json!(true)).unwrap();
        let all = store.get_all();
        assert_eq!(all["coverage"]["enabled"], json!(true));
        assert_eq!(all["coverage"]["save_step_size"], json!(1000));
    }
}
