// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock plugin implementation for deterministic lifecycle testing.
//!
//! `MockPlugin` implements `PluginCapability` with scripted health results
//! and optional hook failures. Every hook call is counted.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use orchestrall_core::{HealthStatus, OrchestrallError, PluginCapability, PluginContext};

/// A scriptable plugin implementation.
///
/// Health results are popped from a FIFO queue. When the queue is empty,
/// `Healthy` is returned.
pub struct MockPlugin {
    id: String,
    health: Mutex<VecDeque<HealthStatus>>,
    hang_health: bool,
    enable_delay: Option<Duration>,
    enable_failure: Option<String>,
    disable_failure: Option<String>,
    config_rejection: Option<(String, String)>,
    validate_calls: AtomicUsize,
    enable_calls: AtomicUsize,
    disable_calls: AtomicUsize,
    health_calls: AtomicUsize,
}

impl MockPlugin {
    /// Create a mock whose hooks all succeed and which always reports healthy.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            health: Mutex::new(VecDeque::new()),
            hang_health: false,
            enable_delay: None,
            enable_failure: None,
            disable_failure: None,
            config_rejection: None,
            validate_calls: AtomicUsize::new(0),
            enable_calls: AtomicUsize::new(0),
            disable_calls: AtomicUsize::new(0),
            health_calls: AtomicUsize::new(0),
        }
    }

    /// Health results to report, in order.
    pub fn with_health_sequence(self, statuses: Vec<HealthStatus>) -> Self {
        Self {
            health: Mutex::new(VecDeque::from(statuses)),
            ..self
        }
    }

    /// Health checks never complete; only a timeout ends them.
    pub fn hanging_health_check(self) -> Self {
        Self {
            hang_health: true,
            ..self
        }
    }

    /// Sleep in the enable hook, widening race windows in concurrency tests.
    pub fn with_enable_delay(self, delay: Duration) -> Self {
        Self {
            enable_delay: Some(delay),
            ..self
        }
    }

    pub fn failing_enable(self, message: impl Into<String>) -> Self {
        Self {
            enable_failure: Some(message.into()),
            ..self
        }
    }

    pub fn failing_disable(self, message: impl Into<String>) -> Self {
        Self {
            disable_failure: Some(message.into()),
            ..self
        }
    }

    /// Reject every configuration in the validate hook, naming `field`.
    pub fn rejecting_config(self, field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            config_rejection: Some((field.into(), reason.into())),
            ..self
        }
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Queue another health result.
    pub async fn push_health(&self, status: HealthStatus) {
        self.health.lock().await.push_back(status);
    }

    pub fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }

    pub fn enable_calls(&self) -> usize {
        self.enable_calls.load(Ordering::SeqCst)
    }

    pub fn disable_calls(&self) -> usize {
        self.disable_calls.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    fn hook_error(&self, hook: &'static str, message: &str) -> OrchestrallError {
        OrchestrallError::PluginHook {
            plugin: self.id.clone(),
            hook,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl PluginCapability for MockPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    async fn validate(&self, ctx: &PluginContext<'_>) -> Result<(), OrchestrallError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        match &self.config_rejection {
            Some((field, reason)) => Err(OrchestrallError::ConfigInvalid {
                plugin: ctx.plugin.to_string(),
                field: field.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn enable(&self, _ctx: &PluginContext<'_>) -> Result<(), OrchestrallError> {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.enable_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.enable_failure {
            Some(message) => Err(self.hook_error("enable", message)),
            None => Ok(()),
        }
    }

    async fn disable(&self, _ctx: &PluginContext<'_>) -> Result<(), OrchestrallError> {
        self.disable_calls.fetch_add(1, Ordering::SeqCst);
        match &self.disable_failure {
            Some(message) => Err(self.hook_error("disable", message)),
            None => Ok(()),
        }
    }

    async fn health_check(&self, _ctx: &PluginContext<'_>) -> Result<HealthStatus, OrchestrallError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_health {
            std::future::pending::<()>().await;
        }
        Ok(self
            .health
            .lock()
            .await
            .pop_front()
            .unwrap_or(HealthStatus::Healthy))
    }
}
