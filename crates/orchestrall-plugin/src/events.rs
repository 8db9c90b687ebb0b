// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle events emitted by the plugin engine.

use chrono::{DateTime, Utc};
use orchestrall_core::TenantId;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of the event channel. Slow subscribers observe `Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A state change of one (tenant, plugin) installation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    PluginEnabled {
        tenant: TenantId,
        plugin: String,
        version: String,
        at: DateTime<Utc>,
    },
    PluginDisabled {
        tenant: TenantId,
        plugin: String,
        at: DateTime<Utc>,
    },
    PluginDegraded {
        tenant: TenantId,
        plugin: String,
        message: Option<String>,
        at: DateTime<Utc>,
    },
    PluginRecovered {
        tenant: TenantId,
        plugin: String,
        at: DateTime<Utc>,
    },
    PluginFailed {
        tenant: TenantId,
        plugin: String,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn tenant(&self) -> &TenantId {
        match self {
            Self::PluginEnabled { tenant, .. }
            | Self::PluginDisabled { tenant, .. }
            | Self::PluginDegraded { tenant, .. }
            | Self::PluginRecovered { tenant, .. }
            | Self::PluginFailed { tenant, .. } => tenant,
        }
    }

    pub fn plugin(&self) -> &str {
        match self {
            Self::PluginEnabled { plugin, .. }
            | Self::PluginDisabled { plugin, .. }
            | Self::PluginDegraded { plugin, .. }
            | Self::PluginRecovered { plugin, .. }
            | Self::PluginFailed { plugin, .. } => plugin,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PluginEnabled { .. } => "PluginEnabled",
            Self::PluginDisabled { .. } => "PluginDisabled",
            Self::PluginDegraded { .. } => "PluginDegraded",
            Self::PluginRecovered { .. } => "PluginRecovered",
            Self::PluginFailed { .. } => "PluginFailed",
        }
    }
}

/// Fan-out of lifecycle events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: LifecycleEvent) {
        trace!(event = event.name(), tenant = %event.tenant(), plugin = event.plugin(), "lifecycle event");
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let tenant = TenantId::parse("acme").unwrap();

        bus.publish(LifecycleEvent::PluginDisabled {
            tenant: tenant.clone(),
            plugin: "crm".into(),
            at: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "PluginDisabled");
        assert_eq!(event.tenant(), &tenant);
        assert_eq!(event.plugin(), "crm");
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        EventBus::new().publish(LifecycleEvent::PluginRecovered {
            tenant: TenantId::parse("acme").unwrap(),
            plugin: "crm".into(),
            at: Utc::now(),
        });
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = LifecycleEvent::PluginFailed {
            tenant: TenantId::parse("acme").unwrap(),
            plugin: "crm".into(),
            reason: "3 consecutive unhealthy checks".into(),
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "plugin_failed");
        assert_eq!(json["tenant"], "acme");
    }
}
