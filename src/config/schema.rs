//! Config schemas: per-key types and range constraints

use crate::error::{Result, VouchError};
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// Declared type of a configuration field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Str,
    List,
    Table,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Bool => "boolean",
            FieldType::Int => "integer",
            FieldType::Float => "float",
            FieldType::Str => "string",
            FieldType::List => "list",
            FieldType::Table => "table",
        }
    }

    fn matches(self, value: &Json) -> bool {
        match self {
            FieldType::Bool => value.is_boolean(),
            FieldType::Int => value.as_f64().map(|n| n.fract() == 0.0).unwrap_or(false),
            FieldType::Float => value.is_number(),
            FieldType::Str => value.is_string(),
            FieldType::List => value.is_array(),
            FieldType::Table => value.is_object(),
        }
    }
}

/// Type and optional numeric range for one field
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub field_type: FieldType,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl FieldSpec {
    pub fn of(field_type: FieldType) -> Self {
        Self {
            field_type,
            min: None,
            max: None,
        }
    }

    pub fn ranged(field_type: FieldType, min: f64, max: f64) -> Self {
        Self {
            field_type,
            min: Some(min),
            max: Some(max),
        }
    }
}

/// Shape of the keys under one registered prefix
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: BTreeMap<String, FieldSpec>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: &str, field_type: FieldType) -> Self {
        self.fields.insert(key.to_string(), FieldSpec::of(field_type));
        self
    }

    pub fn ranged_field(mut self, key: &str, field_type: FieldType, min: f64, max: f64) -> Self {
        self.fields
            .insert(key.to_string(), FieldSpec::ranged(field_type, min, max));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Merge another schema in; existing fields win
    pub fn merge(&mut self, other: Schema) {
        for (key, spec) in other.fields {
            self.fields.entry(key).or_insert(spec);
        }
    }

    /// Validate a value for the given relative key. Unknown keys and type
    /// or range mismatches fail with VALIDATION.
    pub fn validate(&self, key: &str, value: &Json) -> Result<()> {
        let spec = self.fields.get(key).ok_or_else(|| {
            VouchError::validation(format!("unknown configuration key '{}'", key))
        })?;
        if !spec.field_type.matches(value) {
            return Err(VouchError::validation(format!(
                "configuration key '{}' expects {}, got {}",
                key,
                spec.field_type.name(),
                json_type_name(value)
            )));
        }
        if let Some(n) = value.as_f64() {
            if let Some(min) = spec.min {
                if n < min {
                    return Err(VouchError::validation(format!(
                        "configuration key '{}' below minimum {} (got {})",
                        key, min, n
                    )));
                }
            }
            if let Some(max) = spec.max {
                if n > max {
                    return Err(VouchError::validation(format!(
                        "configuration key '{}' above maximum {} (got {})",
                        key, max, n
                    )));
                }
            }
        }
        Ok(())
    }
}

fn json_type_name(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "list",
        Json::Object(_) => "table",
    }
}
