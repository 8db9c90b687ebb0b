// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-tenant plugin installation records and the lifecycle transition table.

use chrono::{DateTime, Utc};
use orchestrall_core::{
    HealthCheckResult, LifecycleState, OrchestrallError, ResolvedConfig, TenantId,
};
use semver::Version;

/// One plugin as installed for one tenant.
#[derive(Debug, Clone)]
pub struct PluginInstallation {
    pub tenant: TenantId,
    pub plugin: String,
    /// Manifest version the installation was last validated against.
    pub version: Version,
    /// Dependency IDs recorded at enable time.
    pub dependencies: Vec<String>,
    pub config: ResolvedConfig,
    pub state: LifecycleState,
    pub last_health: Option<HealthCheckResult>,
    pub consecutive_failures: u32,
    pub enabled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Incremented on every enable; stale health results are discarded.
    pub(crate) epoch: u64,
}

impl PluginInstallation {
    pub(crate) fn discovered(tenant: TenantId, plugin: &str, version: Version) -> Self {
        Self {
            tenant,
            plugin: plugin.to_string(),
            version,
            dependencies: Vec::new(),
            config: ResolvedConfig::new(),
            state: LifecycleState::Discovered,
            last_health: None,
            consecutive_failures: 0,
            enabled_at: None,
            updated_at: Utc::now(),
            epoch: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Move to `to`, or fail with `InvalidTransition`.
    pub(crate) fn transition(&mut self, to: LifecycleState) -> Result<(), OrchestrallError> {
        if !is_allowed(self.state, to) {
            return Err(OrchestrallError::InvalidTransition {
                plugin: self.plugin.clone(),
                from: self.state,
                to,
            });
        }
        let from = std::mem::replace(&mut self.state, to);
        self.updated_at = Utc::now();
        if from == LifecycleState::Validated && to == LifecycleState::Enabled {
            self.enabled_at = Some(self.updated_at);
        }
        Ok(())
    }
}

/// The lifecycle transition table.
pub fn is_allowed(from: LifecycleState, to: LifecycleState) -> bool {
    use LifecycleState::*;
    matches!(
        (from, to),
        (Discovered, Validated)
            | (Validated, Validated)
            | (Validated, Enabled)
            | (Enabled, Degraded)
            | (Degraded, Enabled)
            | (Enabled, Failed)
            | (Degraded, Failed)
            | (Enabled, Disabled)
            | (Degraded, Disabled)
            | (Disabled, Validated)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    fn installation() -> PluginInstallation {
        PluginInstallation::discovered(TenantId::parse("acme").unwrap(), "crm", Version::new(1, 0, 0))
    }

    #[test]
    fn happy_path_transitions() {
        let mut inst = installation();
        assert_eq!(inst.state, Discovered);
        inst.transition(Validated).unwrap();
        inst.transition(Enabled).unwrap();
        assert!(inst.enabled_at.is_some());
        inst.transition(Degraded).unwrap();
        inst.transition(Enabled).unwrap();
        inst.transition(Disabled).unwrap();
        inst.transition(Validated).unwrap();
    }

    #[test]
    fn failed_is_terminal() {
        for to in [Discovered, Validated, Enabled, Degraded, Disabled] {
            assert!(!is_allowed(Failed, to), "Failed -> {to} must be rejected");
        }
    }

    #[test]
    fn invalid_transition_reports_both_states() {
        let mut inst = installation();
        let err = inst.transition(Enabled).unwrap_err();
        assert!(matches!(
            err,
            OrchestrallError::InvalidTransition { from: Discovered, to: Enabled, .. }
        ));
        assert_eq!(inst.state, Discovered);
    }
}
