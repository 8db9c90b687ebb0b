// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Orchestrall - plugin lifecycle engine and multi-tenant connection manager.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod inspect;
mod serve;
mod shutdown;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use orchestrall_config::OrchestrallConfig;

/// Orchestrall - plugin lifecycle engine and multi-tenant connection manager.
#[derive(Parser, Debug)]
#[command(name = "orchestrall", version, about, long_about = None)]
struct Cli {
    /// Configuration file to load instead of the standard search path.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the platform (default).
    Serve,
    /// Scan plugin sources and print the catalog.
    Plugins {
        /// Manifest file or directory; repeatable. Defaults to `plugins.sources`.
        #[arg(long = "source")]
        sources: Vec<String>,
        /// Print the catalog as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Validate a single plugin manifest.
    CheckManifest {
        file: PathBuf,
    },
    /// Validate a tenant client configuration against the plugin catalog.
    CheckClient {
        file: PathBuf,
        /// Tenant the file belongs to. Defaults to the file stem.
        #[arg(long)]
        tenant: Option<String>,
        /// Manifest file or directory; repeatable. Defaults to `plugins.sources`.
        #[arg(long = "source")]
        sources: Vec<String>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Option<OrchestrallConfig> {
    let loaded = match path {
        Some(path) => orchestrall_config::load_and_validate_path(path),
        None => orchestrall_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => Some(config),
        Err(errors) => {
            orchestrall_config::render_errors(&errors);
            None
        }
    }
}

/// Explicit sources win; otherwise the configured ones.
fn resolve_sources(explicit: Vec<String>, config_path: Option<&PathBuf>) -> Option<Vec<String>> {
    if !explicit.is_empty() {
        return Some(explicit);
    }
    load_config(config_path).map(|config| config.plugins.sources)
}

fn exit_code(result: Result<bool, orchestrall_core::OrchestrallError>) -> ExitCode {
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.as_ref();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let Some(config) = load_config(config_path) else {
                return ExitCode::FAILURE;
            };
            match serve::run_serve(config).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("error: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Plugins { sources, json } => {
            let Some(sources) = resolve_sources(sources, config_path) else {
                return ExitCode::FAILURE;
            };
            exit_code(inspect::run_plugins(&sources, json).await)
        }
        Commands::CheckManifest { file } => exit_code(inspect::run_check_manifest(&file).await),
        Commands::CheckClient {
            file,
            tenant,
            sources,
        } => {
            let Some(sources) = resolve_sources(sources, config_path) else {
                return ExitCode::FAILURE;
            };
            exit_code(inspect::run_check_client(&file, tenant.as_deref(), &sources).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["orchestrall"]).unwrap();
        assert!(cli.command.is_none());
        let cli = Cli::try_parse_from(["orchestrall", "plugins", "--source", "a", "--source", "b"])
            .unwrap();
        match cli.command {
            Some(Commands::Plugins { sources, json }) => {
                assert_eq!(sources, vec!["a", "b"]);
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Only jemalloc answers stats queries.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn inline_config_defaults_validate() {
        let config = orchestrall_config::load_and_validate_str("").unwrap();
        assert_eq!(config.server.log_level, "info");
    }
}
