// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed configuration schema declared by a plugin manifest.
//!
//! [`ConfigSchema::resolve`] is the single point where a tenant's raw
//! configuration block is checked and turned into a [`ResolvedConfig`].
//! Unknown keys, missing required keys and type mismatches are rejected with
//! a [`ValidationError`] naming the field.

use std::collections::BTreeMap;

use orchestrall_core::{ConfigValue, ResolvedConfig, ValidationError};
use secrecy::SecretString;
use serde_json::Value;

/// Type names accepted in a manifest's `config.<field>.type`.
pub const SUPPORTED_TYPES: &[&str] = &["string", "number", "boolean", "secret-string", "enum"];

/// The declared type of a configuration field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigFieldType {
    String,
    Number,
    Boolean,
    SecretString,
    Enum { values: Vec<String> },
}

impl ConfigFieldType {
    /// The manifest spelling of this type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::SecretString => "secret-string",
            Self::Enum { .. } => "enum",
        }
    }
}

/// A single field of a plugin's configuration schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigField {
    pub field_type: ConfigFieldType,
    pub required: bool,
    /// Values are held as [`ConfigValue::Secret`]. Always true for
    /// `secret-string` fields.
    pub secret: bool,
    pub default: Option<ConfigValue>,
    pub description: Option<String>,
}

impl ConfigField {
    pub fn new(field_type: ConfigFieldType) -> Self {
        let secret = field_type == ConfigFieldType::SecretString;
        Self {
            field_type,
            required: false,
            secret,
            default: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: ConfigValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Coerce a raw value into this field's declared type.
    pub fn coerce(&self, value: &Value) -> Result<ConfigValue, String> {
        match (&self.field_type, value) {
            (ConfigFieldType::String, Value::String(s)) if self.secret => {
                Ok(ConfigValue::Secret(SecretString::from(s.clone())))
            }
            (ConfigFieldType::String, Value::String(s)) => Ok(ConfigValue::String(s.clone())),
            (ConfigFieldType::SecretString, Value::String(s)) => {
                Ok(ConfigValue::Secret(SecretString::from(s.clone())))
            }
            (ConfigFieldType::Number, Value::Number(n)) => n
                .as_f64()
                .map(ConfigValue::Number)
                .ok_or_else(|| format!("`{n}` is not representable as a number")),
            (ConfigFieldType::Boolean, Value::Bool(b)) => Ok(ConfigValue::Boolean(*b)),
            (ConfigFieldType::Enum { values }, Value::String(s)) => {
                if values.iter().any(|v| v == s) {
                    Ok(ConfigValue::Enum(s.clone()))
                } else {
                    Err(format!("`{s}` is not one of: {}", values.join(", ")))
                }
            }
            (declared, other) => Err(format!(
                "expected {}, found {}",
                declared.name(),
                json_kind(other)
            )),
        }
    }
}

/// The configuration schema of a plugin, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSchema {
    fields: BTreeMap<String, ConfigField>,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, field: ConfigField) {
        self.fields.insert(name.into(), field);
    }

    pub fn get(&self, name: &str) -> Option<&ConfigField> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &ConfigField)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolve a tenant's raw configuration block against this schema.
    ///
    /// `null` is treated as an empty block. Defaults are applied for absent
    /// fields; absent optional fields without a default are left unset.
    pub fn resolve(&self, raw: &Value) -> Result<ResolvedConfig, ValidationError> {
        let empty = serde_json::Map::new();
        let object = match raw {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(ValidationError::new(
                    "config",
                    format!("expected a table of values, found {}", json_kind(other)),
                ));
            }
        };

        if let Some(unknown) = object.keys().find(|k| !self.fields.contains_key(*k)) {
            return Err(ValidationError::new(
                unknown.clone(),
                "is not declared in the plugin's config schema",
            ));
        }

        let mut resolved = ResolvedConfig::new();
        for (name, field) in &self.fields {
            match (object.get(name), &field.default) {
                (Some(value), _) => {
                    let value = field
                        .coerce(value)
                        .map_err(|reason| ValidationError::new(name.clone(), reason))?;
                    resolved.insert(name.clone(), value);
                }
                (None, Some(default)) => resolved.insert(name.clone(), default.clone()),
                (None, None) if field.required => {
                    return Err(ValidationError::new(name.clone(), "is required"));
                }
                (None, None) => {}
            }
        }
        Ok(resolved)
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "table",
    }
}
