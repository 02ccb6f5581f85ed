//! Tag and name filtering for case selection

use crate::error::{Result, VouchError};
use crate::fsys::glob_to_regex;
use regex::Regex;
use std::collections::BTreeSet;

struct NameFilter {
    pattern: String,
    regex: Option<Regex>,
}

/// Active run filters. Tag and name filters combine with AND.
#[derive(Default)]
pub struct Filters {
    tags: Option<BTreeSet<String>>,
    name: Option<NameFilter>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// A case runs only if it carries at least one of these tags
    pub fn only_tags(&mut self, tags: &[&str]) {
        self.tags = Some(tags.iter().map(|t| t.to_string()).collect());
    }

    /// A case runs only if its fully-qualified name matches. A pattern
    /// containing `*` is an anchored glob; otherwise a substring match.
    /// Invalid patterns fail with VALIDATION.
    pub fn set_name_filter(&mut self, pattern: &str) -> Result<()> {
        if pattern.is_empty() {
            return Err(VouchError::validation("empty name filter pattern"));
        }
        let regex = if pattern.contains('*') {
            Some(glob_to_regex(pattern)?)
        } else {
            None
        };
        self.name = Some(NameFilter {
            pattern: pattern.to_string(),
            regex,
        });
        Ok(())
    }

    pub fn clear(&mut self) {
        self.tags = None;
        self.name = None;
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_none() && self.name.is_none()
    }

    /// `None` when the case passes all filters, otherwise the skip reason
    pub fn skip_reason(&self, fqn: &str, tags: &BTreeSet<String>) -> Option<String> {
        if let Some(wanted) = &self.tags {
            if !tags.iter().any(|tag| wanted.contains(tag)) {
                return Some("tag filter".to_string());
            }
        }
        if let Some(filter) = &self.name {
            let matched = match &filter.regex {
                Some(regex) => regex.is_match(fqn),
                None => fqn.contains(&filter.pattern),
            };
            if !matched {
                return Some(format!("name filter '{}'", filter.pattern));
            }
        }
        None
    }
}
