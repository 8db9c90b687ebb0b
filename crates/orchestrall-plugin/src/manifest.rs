// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin manifest parsing and validation.
//!
//! A manifest is read into a [`ManifestDocument`] (the on-disk shape, every
//! field optional so a missing one can be reported by name), then checked by
//! [`ManifestValidator`] into an immutable [`PluginManifest`]. Validation fails
//! fast with a [`ValidationError`] naming the offending field.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::str::FromStr;
use std::time::Duration;

use orchestrall_core::{is_url_safe_token, ConfigValue, ValidationError};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::format::DocumentFormat;
use crate::schema::{ConfigField, ConfigFieldType, ConfigSchema, SUPPORTED_TYPES};

/// Manifest as written on disk. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ManifestDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,
    /// Exposed operations. Opaque to the core.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<Value>,
    #[serde(default, skip_serializing_if = "RequiresDocument::is_empty")]
    pub requires: RequiresDocument,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, ConfigFieldDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequiresDocument {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

impl RequiresDocument {
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty() && self.permissions.is_empty()
    }
}

/// A dependency is either a bare plugin ID or `{ id, version }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyDocument {
    Id(String),
    Constrained {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFieldDocument {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub secret: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct HealthCheckDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<i64>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ManifestDocument {
    /// Serialize the document in the given format.
    pub fn render(&self, format: DocumentFormat) -> Result<String, String> {
        match format {
            DocumentFormat::Toml => toml::to_string(self).map_err(|e| e.to_string()),
            DocumentFormat::Yaml => serde_yaml::to_string(self).map_err(|e| e.to_string()),
            DocumentFormat::Json => serde_json::to_string_pretty(self).map_err(|e| e.to_string()),
        }
    }
}

/// Probe protocol of a health-check descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum HealthProtocol {
    Http,
    Https,
    Tcp,
    /// Delegates to the registered implementation's `health_check` hook.
    Internal,
}

impl HealthProtocol {
    fn requires_endpoint(self) -> bool {
        !matches!(self, Self::Internal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckDescriptor {
    pub protocol: HealthProtocol,
    /// URL for http/https, `host:port` for tcp.
    pub endpoint: Option<String>,
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub id: String,
    pub version_req: Option<VersionReq>,
}

impl Dependency {
    pub fn is_satisfied_by(&self, version: &Version) -> bool {
        self.version_req
            .as_ref()
            .is_none_or(|req| req.matches(version))
    }
}

/// A validated plugin manifest. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginManifest {
    pub id: String,
    pub version: Version,
    pub category: String,
    pub description: Option<String>,
    pub provides: BTreeSet<String>,
    pub dependencies: Vec<Dependency>,
    pub permissions: Vec<String>,
    pub config_schema: ConfigSchema,
    pub health_check: Option<HealthCheckDescriptor>,
    pub endpoints: Vec<Value>,
}

impl PluginManifest {
    pub fn dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.id.as_str())
    }

    /// Convert back to document form. Validating the result yields a manifest
    /// equal to `self`.
    pub fn to_document(&self) -> ManifestDocument {
        ManifestDocument {
            id: Some(self.id.clone()),
            version: Some(self.version.to_string()),
            category: Some(self.category.clone()),
            description: self.description.clone(),
            provides: self.provides.iter().cloned().collect(),
            endpoints: self.endpoints.clone(),
            requires: RequiresDocument {
                dependencies: self
                    .dependencies
                    .iter()
                    .map(|dep| match &dep.version_req {
                        Some(req) => DependencyDocument::Constrained {
                            id: dep.id.clone(),
                            version: Some(req.to_string()),
                        },
                        None => DependencyDocument::Id(dep.id.clone()),
                    })
                    .collect(),
                permissions: self.permissions.clone(),
            },
            config: self
                .config_schema
                .fields()
                .map(|(name, field)| (name.to_string(), field_to_document(field)))
                .collect(),
            health_check: self.health_check.as_ref().map(|hc| HealthCheckDocument {
                protocol: Some(hc.protocol.to_string()),
                endpoint: hc.endpoint.clone(),
                interval_seconds: Some(hc.interval.as_secs() as i64),
            }),
        }
    }
}

fn field_to_document(field: &ConfigField) -> ConfigFieldDocument {
    let values = match &field.field_type {
        ConfigFieldType::Enum { values } => values.clone(),
        _ => Vec::new(),
    };
    ConfigFieldDocument {
        field_type: Some(field.field_type.name().to_string()),
        required: field.required,
        secret: field.secret && field.field_type == ConfigFieldType::String,
        default: field.default.as_ref().map(value_to_json),
        values,
        description: field.description.clone(),
    }
}

fn value_to_json(value: &ConfigValue) -> Value {
    match value {
        ConfigValue::String(s) | ConfigValue::Enum(s) => Value::String(s.clone()),
        ConfigValue::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
        ConfigValue::Boolean(b) => Value::Bool(*b),
        // Secret fields never carry a default.
        ConfigValue::Secret(_) => Value::Null,
    }
}

/// Validates manifest documents against the fixed rule set.
pub struct ManifestValidator;

impl ManifestValidator {
    /// Parse `content` in `format` and validate it.
    pub fn parse(content: &str, format: DocumentFormat) -> Result<PluginManifest, ValidationError> {
        let document: ManifestDocument = format
            .parse(content)
            .map_err(|reason| ValidationError::new("manifest", reason))?;
        Self::validate(document)
    }

    /// Validate a manifest document.
    ///
    /// Checks run in a fixed order: required fields, id, version,
    /// capabilities, dependencies, config schema, health check.
    pub fn validate(document: ManifestDocument) -> Result<PluginManifest, ValidationError> {
        let id = required(document.id, "id")?;
        let version = required(document.version, "version")?;
        let category = required(document.category, "category")?;

        if !is_url_safe_token(&id) {
            return Err(ValidationError::new(
                "id",
                format!("`{id}` is not a URL-safe token"),
            ));
        }

        let version = Version::parse(version.trim()).map_err(|e| {
            ValidationError::new("version", format!("`{version}` is not a semantic version: {e}"))
        })?;

        let mut provides = BTreeSet::new();
        for (i, tag) in document.provides.into_iter().enumerate() {
            if !is_url_safe_token(&tag) {
                return Err(ValidationError::new(
                    format!("provides[{i}]"),
                    format!("`{tag}` is not a valid capability tag"),
                ));
            }
            provides.insert(tag);
        }

        let dependencies = validate_dependencies(&id, document.requires.dependencies)?;

        for (i, permission) in document.requires.permissions.iter().enumerate() {
            if permission.trim().is_empty() {
                return Err(ValidationError::new(
                    format!("requires.permissions[{i}]"),
                    "must not be empty",
                ));
            }
        }

        let mut config_schema = ConfigSchema::new();
        for (name, field) in document.config {
            let field = validate_config_field(&name, field)?;
            config_schema.insert(name, field);
        }

        let health_check = document
            .health_check
            .map(validate_health_check)
            .transpose()?;

        Ok(PluginManifest {
            id,
            version,
            category,
            description: document.description,
            provides,
            dependencies,
            permissions: document.requires.permissions,
            config_schema,
            health_check,
            endpoints: document.endpoints,
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::new(field, "is required")),
    }
}

fn validate_dependencies(
    plugin_id: &str,
    documents: Vec<DependencyDocument>,
) -> Result<Vec<Dependency>, ValidationError> {
    let mut seen = HashSet::new();
    let mut dependencies = Vec::with_capacity(documents.len());

    for (i, document) in documents.into_iter().enumerate() {
        let field = format!("requires.dependencies[{i}]");
        let (id, version) = match document {
            DependencyDocument::Id(id) => (id, None),
            DependencyDocument::Constrained { id, version } => (id, version),
        };

        if !is_url_safe_token(&id) {
            return Err(ValidationError::new(
                field,
                format!("`{id}` is not a valid plugin id"),
            ));
        }
        if id == plugin_id {
            return Err(ValidationError::new(field, "a plugin cannot depend on itself"));
        }
        if !seen.insert(id.clone()) {
            return Err(ValidationError::new(field, format!("`{id}` is listed more than once")));
        }

        let version_req = version
            .map(|raw| {
                VersionReq::parse(raw.trim()).map_err(|e| {
                    ValidationError::new(
                        format!("{field}.version"),
                        format!("`{raw}` is not a version requirement: {e}"),
                    )
                })
            })
            .transpose()?;

        dependencies.push(Dependency { id, version_req });
    }

    Ok(dependencies)
}

fn validate_config_field(
    name: &str,
    document: ConfigFieldDocument,
) -> Result<ConfigField, ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::new("config", "field names must not be empty"));
    }
    if !is_url_safe_token(name) {
        return Err(ValidationError::new(
            format!("config.{name}"),
            "field name must be a URL-safe token",
        ));
    }

    let type_name = document
        .field_type
        .ok_or_else(|| ValidationError::new(format!("config.{name}.type"), "is required"))?;

    let field_type = match type_name.as_str() {
        "string" => ConfigFieldType::String,
        "number" => ConfigFieldType::Number,
        "boolean" => ConfigFieldType::Boolean,
        "secret-string" => ConfigFieldType::SecretString,
        "enum" => {
            if document.values.is_empty() {
                return Err(ValidationError::new(
                    format!("config.{name}.values"),
                    "enum fields must declare at least one value",
                ));
            }
            ConfigFieldType::Enum {
                values: document.values.clone(),
            }
        }
        other => {
            return Err(ValidationError::new(
                format!("config.{name}.type"),
                format!(
                    "unsupported type `{other}`; expected one of: {}",
                    SUPPORTED_TYPES.join(", ")
                ),
            ));
        }
    };

    if !document.values.is_empty() && !matches!(field_type, ConfigFieldType::Enum { .. }) {
        return Err(ValidationError::new(
            format!("config.{name}.values"),
            "only enum fields declare values",
        ));
    }

    if document.secret
        && !matches!(field_type, ConfigFieldType::String | ConfigFieldType::SecretString)
    {
        return Err(ValidationError::new(
            format!("config.{name}.secret"),
            "only string fields can be secret",
        ));
    }

    let mut field = ConfigField::new(field_type);
    field.required = document.required;
    field.secret |= document.secret;
    field.description = document.description;

    if let Some(default) = document.default {
        if field.secret {
            return Err(ValidationError::new(
                format!("config.{name}.default"),
                "secret fields cannot declare a default",
            ));
        }
        let value = field
            .coerce(&default)
            .map_err(|reason| ValidationError::new(format!("config.{name}.default"), reason))?;
        field.default = Some(value);
    }

    Ok(field)
}

fn validate_health_check(
    document: HealthCheckDocument,
) -> Result<HealthCheckDescriptor, ValidationError> {
    let raw_protocol = document
        .protocol
        .ok_or_else(|| ValidationError::new("healthCheck.protocol", "is required"))?;
    let protocol = HealthProtocol::from_str(&raw_protocol).map_err(|_| {
        ValidationError::new(
            "healthCheck.protocol",
            format!("unsupported protocol `{raw_protocol}`; expected one of: http, https, tcp, internal"),
        )
    })?;

    let interval = match document.interval_seconds {
        Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
        Some(secs) => {
            return Err(ValidationError::new(
                "healthCheck.intervalSeconds",
                format!("must be positive, got {secs}"),
            ));
        }
        None => return Err(ValidationError::new("healthCheck.intervalSeconds", "is required")),
    };

    let endpoint = document.endpoint.filter(|e| !e.trim().is_empty());
    if protocol.requires_endpoint() {
        let Some(endpoint) = endpoint.as_deref() else {
            return Err(ValidationError::new(
                "healthCheck.endpoint",
                format!("is required for {protocol} probes"),
            ));
        };
        check_endpoint(protocol, endpoint)?;
    }

    Ok(HealthCheckDescriptor {
        protocol,
        endpoint,
        interval,
    })
}

fn check_endpoint(protocol: HealthProtocol, endpoint: &str) -> Result<(), ValidationError> {
    let valid = match protocol {
        HealthProtocol::Http => endpoint.starts_with("http://"),
        HealthProtocol::Https => endpoint.starts_with("https://"),
        HealthProtocol::Tcp => endpoint
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok()),
        HealthProtocol::Internal => true,
    };
    if valid {
        Ok(())
    } else {
        let expected = match protocol {
            HealthProtocol::Tcp => "host:port".to_string(),
            other => format!("a {other}:// URL"),
        };
        Err(ValidationError::new(
            "healthCheck.endpoint",
            format!("`{endpoint}` is not {expected}"),
        ))
    }
}
