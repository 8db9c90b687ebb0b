// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tenant client configuration: which plugins a tenant uses, in what order,
//! and with which raw configuration blocks.
//!
//! Only structure is checked here. Plugin config values are checked against
//! their manifest schema by the engine when the plugin is enabled.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use orchestrall_core::{is_url_safe_token, LoadError, TenantId};
use serde::Deserialize;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};

use crate::format::DocumentFormat;
use crate::schema::json_kind;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientDocument {
    client: Option<ClientSection>,
    #[serde(default)]
    plugins: Vec<PluginRefDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientSection {
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PluginRefDocument {
    id: Option<String>,
    priority: Option<i64>,
    #[serde(default)]
    config: Option<Value>,
}

/// One plugin referenced by a tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginReference {
    pub id: String,
    pub priority: u32,
    /// Raw configuration block, resolved against the manifest at enable time.
    pub config: Value,
}

/// A tenant's declared plugin selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub tenant: TenantId,
    /// Optional display name from `[client] name`.
    pub name: Option<String>,
    /// References in declaration order.
    pub plugins: Vec<PluginReference>,
}

impl ClientConfig {
    /// References sorted by ascending priority. Ties keep declaration order.
    pub fn activation_order(&self) -> Vec<&PluginReference> {
        let mut ordered: Vec<&PluginReference> = self.plugins.iter().collect();
        ordered.sort_by_key(|r| r.priority);
        ordered
    }

    pub fn plugin(&self, id: &str) -> Option<&PluginReference> {
        self.plugins.iter().find(|r| r.id == id)
    }
}

/// Where a client configuration is read from.
#[derive(Debug, Clone)]
pub enum ClientConfigSource {
    /// A file; format inferred from the extension, TOML if unknown.
    Path(PathBuf),
    Inline { content: String, format: DocumentFormat },
}

/// Result of loading every client configuration in a directory.
#[derive(Debug, Default)]
pub struct DirectoryLoad {
    pub configs: Vec<ClientConfig>,
    pub failures: Vec<(PathBuf, LoadError)>,
}

/// Loads and structurally checks tenant client configurations.
pub struct ClientConfigLoader;

impl ClientConfigLoader {
    /// Load the client configuration of `tenant` from `source`.
    ///
    /// All-or-nothing: any structural problem rejects the whole document.
    pub async fn load(
        tenant: &TenantId,
        source: &ClientConfigSource,
    ) -> Result<ClientConfig, LoadError> {
        match source {
            ClientConfigSource::Path(path) => {
                let content = fs::read_to_string(path).await.map_err(|e| {
                    LoadError::new(tenant.as_str(), "source", format!("{}: {e}", path.display()))
                })?;
                let format = DocumentFormat::from_path(path).unwrap_or(DocumentFormat::Toml);
                Self::parse(tenant, &content, format)
            }
            ClientConfigSource::Inline { content, format } => Self::parse(tenant, content, *format),
        }
    }

    /// Parse and check a client configuration document.
    pub fn parse(
        tenant: &TenantId,
        content: &str,
        format: DocumentFormat,
    ) -> Result<ClientConfig, LoadError> {
        let fail = |entry: &str, reason: String| LoadError::new(tenant.as_str(), entry, reason);

        let document: ClientDocument = format
            .parse(content)
            .map_err(|reason| fail("document", reason))?;

        let section = document
            .client
            .ok_or_else(|| fail("client", "section is required".to_string()))?;
        let declared = section
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| fail("client.id", "is required".to_string()))?;
        let declared = TenantId::parse(&declared).map_err(|e| fail("client.id", e.reason))?;
        if &declared != tenant {
            return Err(fail(
                "client.id",
                format!("declares tenant `{declared}` but was loaded for `{tenant}`"),
            ));
        }

        let mut seen = HashSet::new();
        let mut plugins = Vec::with_capacity(document.plugins.len());
        for (i, reference) in document.plugins.into_iter().enumerate() {
            let entry = |field: &str| format!("plugins[{i}].{field}");

            let id = reference
                .id
                .ok_or_else(|| fail(&entry("id"), "is required".to_string()))?;
            if !is_url_safe_token(&id) {
                return Err(fail(&entry("id"), format!("`{id}` is not a valid plugin id")));
            }
            if !seen.insert(id.clone()) {
                return Err(fail(
                    &entry("id"),
                    format!("plugin `{id}` is referenced more than once"),
                ));
            }

            let priority = match reference.priority {
                None => return Err(fail(&entry("priority"), "is required".to_string())),
                Some(p) => u32::try_from(p).map_err(|_| {
                    fail(
                        &entry("priority"),
                        format!("must be a non-negative integer, got {p}"),
                    )
                })?,
            };

            let config = match reference.config {
                None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
                Some(Value::Object(map)) => Value::Object(map),
                Some(other) => {
                    return Err(fail(
                        &entry("config"),
                        format!("must be a table, found {}", json_kind(&other)),
                    ));
                }
            };

            plugins.push(PluginReference {
                id,
                priority,
                config,
            });
        }

        debug!(tenant = %tenant, plugins = plugins.len(), "client configuration loaded");
        Ok(ClientConfig {
            tenant: declared,
            name: section.name,
            plugins,
        })
    }

    /// Load every client configuration file in `dir`.
    ///
    /// The file stem names the tenant and must match `client.id`. Files are
    /// visited in sorted order; a failure in one file never affects another.
    pub async fn load_dir(dir: &Path) -> Result<DirectoryLoad, std::io::Error> {
        let mut reader = fs::read_dir(dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            if DocumentFormat::from_path(&path).is_some() && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut result = DirectoryLoad::default();
        for path in paths {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let tenant = match TenantId::parse(&stem) {
                Ok(tenant) => tenant,
                Err(e) => {
                    warn!(path = %path.display(), "file name is not a tenant id");
                    result
                        .failures
                        .push((path, LoadError::new(stem, "file name", e.reason)));
                    continue;
                }
            };

            match Self::load(&tenant, &ClientConfigSource::Path(path.clone())).await {
                Ok(config) => result.configs.push(config),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "client configuration rejected");
                    result.failures.push((path, e));
                }
            }
        }
        Ok(result)
    }
}
