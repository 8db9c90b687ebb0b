// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Offline inspection commands: `plugins`, `check-manifest` and
//! `check-client`.
//!
//! None of these start background tasks or open tenant connections. Each
//! returns whether everything it looked at was valid, which `main` turns into
//! the exit code.

use std::path::Path;

use colored::Colorize;
use orchestrall_core::{OrchestrallError, TenantId};
use orchestrall_plugin::{
    ClientConfigLoader, ClientConfigSource, DocumentFormat, ManifestValidator, PluginRegistry,
    ScanReport,
};
use serde_json::json;

/// Scan `sources` and print the catalog and every scan failure.
pub async fn run_plugins(sources: &[String], as_json: bool) -> Result<bool, OrchestrallError> {
    let registry = PluginRegistry::new();
    let report = registry.scan(sources).await;

    if as_json {
        print_catalog_json(&registry, &report)?;
        return Ok(report.is_clean());
    }

    let manifests = registry.list();
    if manifests.is_empty() {
        println!("no plugins found in {}", sources.join(", "));
    }
    for manifest in &manifests {
        let provides: Vec<&str> = manifest.provides.iter().map(String::as_str).collect();
        let deps: Vec<&str> = manifest.dependency_ids().collect();
        println!(
            "{} {} {}",
            manifest.id.bold(),
            manifest.version,
            format!("[{}]", manifest.category).dimmed()
        );
        if !provides.is_empty() {
            println!("    provides: {}", provides.join(", "));
        }
        if !deps.is_empty() {
            println!("    requires: {}", deps.join(", "));
        }
    }
    for failure in &report.failures {
        eprintln!("{} {}: {}", "error:".red().bold(), failure.origin, failure.kind);
    }
    Ok(report.is_clean())
}

fn print_catalog_json(registry: &PluginRegistry, report: &ScanReport) -> Result<(), OrchestrallError> {
    let plugins: Vec<_> = registry
        .list()
        .iter()
        .map(|m| {
            let origin = report
                .loaded
                .iter()
                .find(|l| l.id == m.id)
                .map(|l| l.origin.clone());
            json!({
                "id": m.id,
                "version": m.version.to_string(),
                "category": m.category,
                "provides": m.provides,
                "dependencies": m.dependency_ids().collect::<Vec<_>>(),
                "origin": origin,
            })
        })
        .collect();
    let failures: Vec<_> = report
        .failures
        .iter()
        .map(|f| json!({ "origin": f.origin, "reason": f.kind.to_string() }))
        .collect();
    let out = json!({
        "generation": report.generation,
        "plugins": plugins,
        "failures": failures,
    });
    let rendered =
        serde_json::to_string_pretty(&out).map_err(|e| OrchestrallError::Internal(e.to_string()))?;
    println!("{rendered}");
    Ok(())
}

/// Validate one manifest file.
pub async fn run_check_manifest(path: &Path) -> Result<bool, OrchestrallError> {
    let Some(format) = DocumentFormat::from_path(path) else {
        eprintln!(
            "{} {}: expected a .toml, .yaml, .yml or .json file",
            "error:".red().bold(),
            path.display()
        );
        return Ok(false);
    };
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| OrchestrallError::Config(format!("{}: {e}", path.display())))?;

    match ManifestValidator::parse(&content, format) {
        Ok(manifest) => {
            println!(
                "{} {} {} ({} config fields)",
                "ok:".green().bold(),
                manifest.id,
                manifest.version,
                manifest.config_schema.len()
            );
            Ok(true)
        }
        Err(e) => {
            eprintln!("{} {}: {e}", "error:".red().bold(), path.display());
            Ok(false)
        }
    }
}

/// Validate a client configuration file, and each plugin block against the
/// catalog built from `sources`.
///
/// The tenant defaults to the file stem.
pub async fn run_check_client(
    path: &Path,
    tenant: Option<&str>,
    sources: &[String],
) -> Result<bool, OrchestrallError> {
    let tenant = match tenant {
        Some(tenant) => tenant.to_string(),
        None => path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string(),
    };
    let tenant = TenantId::parse(tenant)?;

    let client =
        match ClientConfigLoader::load(&tenant, &ClientConfigSource::Path(path.to_path_buf())).await {
            Ok(client) => client,
            Err(e) => {
                eprintln!("{} {e}", "error:".red().bold());
                return Ok(false);
            }
        };

    let registry = PluginRegistry::new();
    registry.scan(sources).await;

    let mut clean = true;
    for reference in client.activation_order() {
        let verdict = registry
            .get(&reference.id)
            .and_then(|manifest| {
                manifest
                    .config_schema
                    .resolve(&reference.config)
                    .map_err(OrchestrallError::from)
            });
        match verdict {
            Ok(_) => println!(
                "{} {} (priority {})",
                "ok:".green().bold(),
                reference.id,
                reference.priority
            ),
            Err(e) => {
                clean = false;
                eprintln!("{} {}: {e}", "error:".red().bold(), reference.id);
            }
        }
    }
    if clean {
        println!("tenant {} declares {} plugin(s)", client.tenant, client.plugins.len());
    }
    Ok(clean)
}
