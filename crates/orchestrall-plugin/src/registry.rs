// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin registry: scans manifest locations into a [`Catalog`] and holds the
//! compiled-in plugin implementations.
//!
//! The catalog is rebuilt off to the side on every scan and swapped in with a
//! single atomic pointer store, so concurrent readers always observe either
//! the complete old catalog or the complete new one.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use orchestrall_core::{OrchestrallError, PluginCapability};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, ManifestSource, ScanFailure, ScanFailureKind, ScanReport};
use crate::format::DocumentFormat;
use crate::manifest::PluginManifest;

/// File names looked up inside a per-plugin subdirectory, in order.
const PLUGIN_FILE_NAMES: &[&str] = &["plugin.toml", "plugin.yaml", "plugin.yml", "plugin.json"];

/// Registry of plugin manifests and their compiled-in implementations.
///
/// Constructed once at startup and shared by reference (`Arc`); there is no
/// global instance.
pub struct PluginRegistry {
    catalog: ArcSwap<Catalog>,
    implementations: DashMap<String, Arc<dyn PluginCapability>>,
    /// Last installed generation. Held while a new catalog is built and stored
    /// so generations are installed in order.
    install_lock: Mutex<u64>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    /// Create an empty registry (generation 0).
    pub fn new() -> Self {
        Self {
            catalog: ArcSwap::from_pointee(Catalog::default()),
            implementations: DashMap::new(),
            install_lock: Mutex::new(0),
        }
    }

    /// Scan manifest locations and atomically replace the catalog.
    ///
    /// A location is a manifest file, or a directory whose entries are
    /// manifest files or subdirectories containing `plugin.<ext>`. Failures
    /// are recorded in the report and never abort the scan.
    pub async fn scan<P: AsRef<Path>>(&self, locations: &[P]) -> ScanReport {
        let mut sources = Vec::new();
        let mut failures = Vec::new();
        for location in locations {
            collect_location(location.as_ref(), &mut sources, &mut failures).await;
        }
        self.install(sources, failures)
    }

    /// Build the catalog from in-memory manifest sources.
    pub fn scan_sources(&self, sources: Vec<ManifestSource>) -> ScanReport {
        self.install(sources, Vec::new())
    }

    fn install(&self, sources: Vec<ManifestSource>, failures: Vec<ScanFailure>) -> ScanReport {
        let mut generation = self
            .install_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *generation += 1;

        let (catalog, report) = Catalog::build(*generation, sources, failures);
        for failure in &report.failures {
            warn!(origin = %failure.origin, error = %failure.kind, "plugin manifest rejected");
        }
        self.catalog.store(Arc::new(catalog));

        info!(
            generation = report.generation,
            loaded = report.success_count(),
            failed = report.failure_count(),
            "plugin catalog installed"
        );
        report
    }

    /// Look up a manifest by plugin ID.
    pub fn get(&self, id: &str) -> Result<Arc<PluginManifest>, OrchestrallError> {
        self.catalog
            .load()
            .get(id)
            .ok_or_else(|| OrchestrallError::PluginNotFound {
                plugin: id.to_string(),
            })
    }

    /// All manifests of the current catalog, sorted by plugin ID.
    pub fn list(&self) -> Vec<Arc<PluginManifest>> {
        self.catalog.load().manifests()
    }

    /// The current catalog as one consistent snapshot.
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.catalog.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.catalog.load().generation()
    }

    /// Register the compiled-in implementation for a plugin ID.
    ///
    /// Returns the implementation it replaced, if any.
    pub fn register_implementation(
        &self,
        implementation: Arc<dyn PluginCapability>,
    ) -> Option<Arc<dyn PluginCapability>> {
        let id = implementation.id().to_string();
        let previous = self.implementations.insert(id.clone(), implementation);
        if previous.is_some() {
            warn!(plugin = %id, "replaced registered plugin implementation");
        } else {
            debug!(plugin = %id, "registered plugin implementation");
        }
        previous
    }

    pub fn implementation(&self, id: &str) -> Option<Arc<dyn PluginCapability>> {
        self.implementations.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// IDs of all registered implementations, sorted.
    pub fn implementation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.implementations.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

async fn collect_location(
    path: &Path,
    sources: &mut Vec<ManifestSource>,
    failures: &mut Vec<ScanFailure>,
) {
    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) => {
            failures.push(unreadable(path, e.to_string()));
            return;
        }
    };

    if metadata.is_file() {
        match DocumentFormat::from_path(path) {
            Some(format) => read_source(path, format, sources, failures).await,
            None => failures.push(unreadable(path, "unsupported manifest extension".to_string())),
        }
        return;
    }

    let entries = match sorted_entries(path).await {
        Ok(entries) => entries,
        Err(e) => {
            failures.push(unreadable(path, e.to_string()));
            return;
        }
    };

    for (entry, is_dir) in entries {
        if is_dir {
            match find_plugin_file(&entry).await {
                Some((file, format)) => read_source(&file, format, sources, failures).await,
                None => debug!(path = %entry.display(), "directory has no plugin manifest, skipping"),
            }
        } else if let Some(format) = DocumentFormat::from_path(&entry) {
            read_source(&entry, format, sources, failures).await;
        }
    }
}

async fn sorted_entries(dir: &Path) -> std::io::Result<Vec<(PathBuf, bool)>> {
    let mut reader = fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let path = entry.path();
        let is_dir = fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false);
        entries.push((path, is_dir));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

async fn find_plugin_file(dir: &Path) -> Option<(PathBuf, DocumentFormat)> {
    for name in PLUGIN_FILE_NAMES {
        let candidate = dir.join(name);
        if fs::try_exists(&candidate).await.unwrap_or(false) {
            let format = DocumentFormat::from_path(&candidate)?;
            return Some((candidate, format));
        }
    }
    None
}

async fn read_source(
    path: &Path,
    format: DocumentFormat,
    sources: &mut Vec<ManifestSource>,
    failures: &mut Vec<ScanFailure>,
) {
    match fs::read_to_string(path).await {
        Ok(content) => sources.push(ManifestSource::new(path.display().to_string(), format, content)),
        Err(e) => failures.push(unreadable(path, e.to_string())),
    }
}

fn unreadable(path: &Path, reason: String) -> ScanFailure {
    ScanFailure {
        origin: path.display().to_string(),
        kind: ScanFailureKind::Unreadable(reason),
    }
}
