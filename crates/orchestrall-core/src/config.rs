// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed plugin configuration values.
//!
//! Raw tenant configuration blocks are resolved against a plugin's declared
//! schema exactly once, into the closed set of [`ConfigValue`] variants. After
//! that point nothing downstream handles loosely typed values.

use std::collections::BTreeMap;
use std::fmt;

use secrecy::{ExposeSecret, SecretString};

/// A single resolved configuration value.
#[derive(Clone)]
pub enum ConfigValue {
    String(String),
    Number(f64),
    Boolean(bool),
    /// Secret material; redacted from `Debug` output.
    Secret(SecretString),
    /// One of the schema's declared enum values.
    Enum(String),
}

impl ConfigValue {
    /// Name of the schema type this value satisfies.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Number(_) => "number",
            Self::Boolean(_) => "boolean",
            Self::Secret(_) => "secret-string",
            Self::Enum(_) => "enum",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn expose_secret(&self) -> Option<&str> {
        match self {
            Self::Secret(s) => Some(s.expose_secret()),
            _ => None,
        }
    }
}

impl PartialEq for ConfigValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) | (Self::Enum(a), Self::Enum(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Secret(a), Self::Secret(b)) => a.expose_secret() == b.expose_secret(),
            _ => false,
        }
    }
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.debug_tuple("String").field(s).finish(),
            Self::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Self::Boolean(b) => f.debug_tuple("Boolean").field(b).finish(),
            Self::Secret(_) => f.write_str("Secret([REDACTED])"),
            Self::Enum(s) => f.debug_tuple("Enum").field(s).finish(),
        }
    }
}

/// Configuration values of one plugin installation, keyed by schema field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedConfig {
    values: BTreeMap<String, ConfigValue>,
}

impl ResolvedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: ConfigValue) {
        self.values.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&ConfigValue> {
        self.values.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_redacted_in_debug() {
        let value = ConfigValue::Secret(SecretString::from("sk-live-123".to_string()));
        let rendered = format!("{value:?}");
        assert!(!rendered.contains("sk-live-123"));
        assert!(rendered.contains("REDACTED"));
        assert_eq!(value.expose_secret(), Some("sk-live-123"));
    }

    #[test]
    fn values_compare_by_variant_and_content() {
        assert_eq!(ConfigValue::Enum("live".into()), ConfigValue::Enum("live".into()));
        assert_ne!(ConfigValue::Enum("live".into()), ConfigValue::String("live".into()));
        assert_eq!(
            ConfigValue::Secret(SecretString::from("a".to_string())),
            ConfigValue::Secret(SecretString::from("a".to_string()))
        );
    }

    #[test]
    fn resolved_config_accessors() {
        let mut config = ResolvedConfig::new();
        config.insert("retries", ConfigValue::Number(3.0));
        config.insert("verbose", ConfigValue::Boolean(true));
        assert_eq!(config.len(), 2);
        assert_eq!(config.get("retries").and_then(ConfigValue::as_f64), Some(3.0));
        assert_eq!(config.get("verbose").and_then(ConfigValue::as_bool), Some(true));
        assert!(config.get("missing").is_none());
        let keys: Vec<&str> = config.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["retries", "verbose"]);
    }
}
