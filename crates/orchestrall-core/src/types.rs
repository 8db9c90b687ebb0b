// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the plugin engine and the connection manager.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ValidationError;

/// Maximum length of a plugin or tenant identifier.
pub const MAX_TOKEN_LEN: usize = 128;

/// Returns true if `value` is a non-empty, URL-safe identifier token.
///
/// Tokens start with an ASCII alphanumeric and otherwise contain only the RFC 3986
/// unreserved characters (`A-Z a-z 0-9 - . _ ~`). Tenant tokens are also used as
/// database file stems, so `..` and path separators can never appear.
pub fn is_url_safe_token(value: &str) -> bool {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    value.len() <= MAX_TOKEN_LEN
        && first.is_ascii_alphanumeric()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
        && !value.contains("..")
}

/// Identifier of an isolated client organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parse and validate a tenant identifier.
    pub fn parse(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if is_url_safe_token(&value) {
            Ok(Self(value))
        } else {
            Err(ValidationError::new(
                "tenant_id",
                format!("`{value}` is not a URL-safe token"),
            ))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// Lifecycle state of a plugin installation for one tenant.
///
/// ```text
/// Discovered -> Validated -> Enabled <-> Degraded -> Failed
///                   ^           |           |
///                   |           v           v
///                   +------- Disabled <-----+
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Discovered,
    Validated,
    Enabled,
    Degraded,
    Disabled,
    Failed,
}

impl LifecycleState {
    /// Enabled and degraded installations are both considered active.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Enabled | Self::Degraded)
    }
}

/// Tenant data isolation strategy, selected once per process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum IsolationMode {
    /// One shared database; every query carries a tenant discriminator.
    SharedSchema,
    /// One database per tenant.
    DedicatedDatabase,
}

/// Health status reported by capability health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Fully operational.
    Healthy,
    /// Operational but experiencing issues.
    Degraded(String),
    /// Not operational.
    Unhealthy(String),
}

/// Coarse health classification stored in [`HealthCheckResult`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// What a health check was run against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HealthSubject {
    Plugin { tenant: TenantId, plugin: String },
    Connection { tenant: TenantId },
}

impl fmt::Display for HealthSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plugin { tenant, plugin } => write!(f, "plugin {plugin} (tenant {tenant})"),
            Self::Connection { tenant } => write!(f, "connection (tenant {tenant})"),
        }
    }
}

/// Outcome of a single health probe. Only the latest result per subject is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub subject: HealthSubject,
    pub status: HealthState,
    pub checked_at: DateTime<Utc>,
    pub message: Option<String>,
}

impl HealthCheckResult {
    pub fn from_status(subject: HealthSubject, status: HealthStatus) -> Self {
        let (status, message) = match status {
            HealthStatus::Healthy => (HealthState::Healthy, None),
            HealthStatus::Degraded(msg) => (HealthState::Degraded, Some(msg)),
            HealthStatus::Unhealthy(msg) => (HealthState::Unhealthy, Some(msg)),
        };
        Self {
            subject,
            status,
            checked_at: Utc::now(),
            message,
        }
    }

    pub fn healthy(subject: HealthSubject) -> Self {
        Self::from_status(subject, HealthStatus::Healthy)
    }

    pub fn unhealthy(subject: HealthSubject, message: impl Into<String>) -> Self {
        Self::from_status(subject, HealthStatus::Unhealthy(message.into()))
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}
