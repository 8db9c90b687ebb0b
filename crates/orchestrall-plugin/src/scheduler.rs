// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic health checks for enabled plugin installations.
//!
//! One task runs per enabled (tenant, plugin) pair. Tasks are spawned when the
//! engine emits `PluginEnabled` and cancelled on `PluginDisabled` or
//! `PluginFailed`. Each probe is bounded by the engine's timeout, so a hung
//! plugin delays only its own task. A task whose installation disappears
//! removes itself; one whose manifest left the catalog keeps its slot and
//! resumes probing once a later scan brings the manifest back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use orchestrall_core::{OrchestrallError, TenantId};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::PluginEngine;
use crate::events::LifecycleEvent;

type PairKey = (TenantId, String);

struct ScheduledTask {
    id: u64,
    token: CancellationToken,
}

/// Keeps one health-check task alive per enabled installation.
pub struct HealthScheduler {
    engine: Arc<PluginEngine>,
    cancel: CancellationToken,
    tasks: Mutex<HashMap<PairKey, ScheduledTask>>,
    next_task: AtomicU64,
}

impl HealthScheduler {
    /// All tasks stop when `cancel` is cancelled.
    pub fn new(engine: Arc<PluginEngine>, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            engine,
            cancel,
            tasks: Mutex::new(HashMap::new()),
            next_task: AtomicU64::new(0),
        })
    }

    /// Schedule every currently active installation and follow lifecycle
    /// events until cancelled.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        // Subscribe before the initial sync so no enable is missed in between.
        let mut events = self.engine.subscribe();
        self.sync_with_engine();

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = scheduler.cancel.cancelled() => {
                        info!("health scheduler shutting down");
                        break;
                    }
                    received = events.recv() => match received {
                        Ok(event) => scheduler.handle_event(&event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "health scheduler lagged behind lifecycle events, resyncing");
                            scheduler.sync_with_engine();
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            scheduler.stop_all();
        })
    }

    fn handle_event(self: &Arc<Self>, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::PluginEnabled { tenant, plugin, .. } => self.schedule(tenant, plugin),
            LifecycleEvent::PluginDisabled { tenant, plugin, .. }
            | LifecycleEvent::PluginFailed { tenant, plugin, .. } => self.unschedule(tenant, plugin),
            LifecycleEvent::PluginDegraded { .. } | LifecycleEvent::PluginRecovered { .. } => {}
        }
    }

    /// Start tasks for active installations that have none and stop tasks
    /// whose installation is no longer active.
    fn sync_with_engine(self: &Arc<Self>) {
        let mut active = Vec::new();
        for tenant in self.engine.tenants() {
            for installation in self.engine.list_enabled(&tenant) {
                active.push((tenant.clone(), installation.plugin));
            }
        }

        let stale: Vec<PairKey> = self
            .lock_tasks()
            .keys()
            .filter(|key| !active.contains(key))
            .cloned()
            .collect();
        for (tenant, plugin) in stale {
            self.unschedule(&tenant, &plugin);
        }

        for (tenant, plugin) in active {
            if !self.is_scheduled(&tenant, &plugin) {
                self.schedule(&tenant, &plugin);
            }
        }
    }

    /// Start (or restart) the health task of one pair.
    pub fn schedule(self: &Arc<Self>, tenant: &TenantId, plugin: &str) {
        let token = self.cancel.child_token();
        let id = self.next_task.fetch_add(1, Ordering::Relaxed);
        let key: PairKey = (tenant.clone(), plugin.to_string());
        let previous = self.lock_tasks().insert(
            key.clone(),
            ScheduledTask {
                id,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        let interval = self.engine.health_interval(plugin);
        let engine = Arc::clone(&self.engine);
        let scheduler: Weak<Self> = Arc::downgrade(self);
        let tenant = tenant.clone();
        let plugin = plugin.to_string();
        debug!(tenant = %tenant, plugin = %plugin, interval_secs = interval.as_secs(), "health task scheduled");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the first probe runs one
            // interval after enablement.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match engine.health_check(&tenant, &plugin).await {
                            Ok(result) => debug!(
                                tenant = %tenant,
                                plugin = %plugin,
                                status = %result.status,
                                "scheduled health check"
                            ),
                            Err(OrchestrallError::PluginNotFound { .. }) => warn!(
                                tenant = %tenant,
                                plugin = %plugin,
                                "manifest missing from the catalog, health check skipped"
                            ),
                            Err(e) => {
                                debug!(tenant = %tenant, plugin = %plugin, error = %e, "health task stopping");
                                break;
                            }
                        }
                    }
                }
            }
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.forget(&key, id);
            }
        });
    }

    /// Drop the map entry of a finished task unless a newer task replaced it.
    fn forget(&self, key: &PairKey, id: u64) {
        let mut tasks = self.lock_tasks();
        if tasks.get(key).is_some_and(|task| task.id == id) {
            tasks.remove(key);
        }
    }

    /// Stop the health task of one pair, if any.
    pub fn unschedule(&self, tenant: &TenantId, plugin: &str) {
        let removed = self
            .lock_tasks()
            .remove(&(tenant.clone(), plugin.to_string()));
        if let Some(task) = removed {
            task.token.cancel();
            debug!(tenant = %tenant, plugin, "health task cancelled");
        }
    }

    pub fn is_scheduled(&self, tenant: &TenantId, plugin: &str) -> bool {
        self.lock_tasks()
            .contains_key(&(tenant.clone(), plugin.to_string()))
    }

    /// Number of running health tasks.
    pub fn scheduled_count(&self) -> usize {
        self.lock_tasks().len()
    }

    fn stop_all(&self) {
        let tasks: Vec<ScheduledTask> = self.lock_tasks().drain().map(|(_, t)| t).collect();
        for task in tasks {
            task.token.cancel();
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<PairKey, ScheduledTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
