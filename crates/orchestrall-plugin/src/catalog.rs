// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The immutable plugin catalog and the report produced by building one.

use std::collections::BTreeMap;
use std::sync::Arc;

use orchestrall_core::ValidationError;

use crate::format::DocumentFormat;
use crate::manifest::{ManifestValidator, PluginManifest};

/// Raw manifest content together with where it came from.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    /// Path or label used in scan reports.
    pub origin: String,
    pub format: DocumentFormat,
    pub content: String,
}

impl ManifestSource {
    pub fn new(origin: impl Into<String>, format: DocumentFormat, content: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            format,
            content: content.into(),
        }
    }
}

/// Why a scan candidate did not make it into the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanFailureKind {
    /// The location or file could not be read.
    Unreadable(String),
    /// The manifest failed validation.
    Invalid(ValidationError),
    /// Another manifest with the same ID was seen first.
    Duplicate { id: String, first_origin: String },
}

impl std::fmt::Display for ScanFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreadable(reason) => write!(f, "unreadable: {reason}"),
            Self::Invalid(err) => write!(f, "{err}"),
            Self::Duplicate { id, first_origin } => {
                write!(f, "duplicate plugin id `{id}` (first defined in {first_origin})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanFailure {
    pub origin: String,
    pub kind: ScanFailureKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPlugin {
    pub id: String,
    pub version: semver::Version,
    pub origin: String,
}

/// Outcome of one registry scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Catalog generation installed by this scan.
    pub generation: u64,
    pub loaded: Vec<LoadedPlugin>,
    pub failures: Vec<ScanFailure>,
}

impl ScanReport {
    pub fn success_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// An immutable, fully-built set of validated manifests keyed by plugin ID.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    generation: u64,
    entries: BTreeMap<String, CatalogEntry>,
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    manifest: Arc<PluginManifest>,
    origin: String,
}

impl Catalog {
    /// Build a catalog from manifest sources, in order.
    ///
    /// The first manifest seen for an ID wins; later ones are reported as
    /// duplicates. Scan failures already collected by the caller are carried
    /// into the report ahead of validation failures.
    pub fn build(
        generation: u64,
        sources: Vec<ManifestSource>,
        mut failures: Vec<ScanFailure>,
    ) -> (Self, ScanReport) {
        let mut entries: BTreeMap<String, CatalogEntry> = BTreeMap::new();
        let mut loaded = Vec::new();

        for source in sources {
            let manifest = match ManifestValidator::parse(&source.content, source.format) {
                Ok(manifest) => manifest,
                Err(err) => {
                    failures.push(ScanFailure {
                        origin: source.origin,
                        kind: ScanFailureKind::Invalid(err),
                    });
                    continue;
                }
            };

            if let Some(existing) = entries.get(&manifest.id) {
                failures.push(ScanFailure {
                    origin: source.origin,
                    kind: ScanFailureKind::Duplicate {
                        id: manifest.id,
                        first_origin: existing.origin.clone(),
                    },
                });
                continue;
            }

            loaded.push(LoadedPlugin {
                id: manifest.id.clone(),
                version: manifest.version.clone(),
                origin: source.origin.clone(),
            });
            entries.insert(
                manifest.id.clone(),
                CatalogEntry {
                    manifest: Arc::new(manifest),
                    origin: source.origin,
                },
            );
        }

        let report = ScanReport {
            generation,
            loaded,
            failures,
        };
        (Self { generation, entries }, report)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, id: &str) -> Option<Arc<PluginManifest>> {
        self.entries.get(id).map(|e| Arc::clone(&e.manifest))
    }

    /// Where the manifest for `id` was loaded from.
    pub fn origin(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(|e| e.origin.as_str())
    }

    /// All manifests, sorted by plugin ID.
    pub fn manifests(&self) -> Vec<Arc<PluginManifest>> {
        self.entries.values().map(|e| Arc::clone(&e.manifest)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
