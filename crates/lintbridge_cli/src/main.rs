//! lintbridge CLI
//!
//! Starts the analysis server and serves until shutdown.

mod cli;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use miette::{IntoDiagnostic, Result, WrapErr};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lintbridge_core::SessionOptions;
use lintbridge_core::memory::log_memory_usage;
use lintbridge_server::{Server, ServerConfig};

use crate::cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:?}", e);
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = server_config(&cli)?;
    if config.session.debug_memory {
        log_memory_usage("at startup");
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?
        .block_on(async {
            let server = Server::bind(config)
                .await
                .into_diagnostic()
                .wrap_err("Failed to start the analysis server")?;
            let addr = server.local_addr().into_diagnostic()?;
            info!("lintbridge server is running on {}", addr);
            server.run().await.into_diagnostic()
        })
}

fn server_config(cli: &Cli) -> Result<ServerConfig> {
    let work_dir = match &cli.work_dir {
        Some(dir) if !dir.is_dir() => {
            return Err(miette::miette!(
                "Working directory does not exist: {}",
                dir.display()
            ));
        }
        Some(dir) => Some(dir.as_path()),
        None => None,
    };

    Ok(ServerConfig {
        host: cli.host.clone(),
        port: cli.port,
        workers: cli.workers.max(1),
        timeout: Duration::from_millis(cli.timeout_ms),
        shutdown_grace: Duration::from_millis(cli.shutdown_grace_ms),
        session: SessionOptions {
            ts_parser_for_js: cli.ts_parser_for_js,
            lightweight: cli.lightweight,
            debug_memory: cli.debug_memory,
            rule_bundles: resolve_bundles(&cli.rule_bundles, work_dir),
        },
    })
}

/// Relative bundle paths are resolved against the working directory.
fn resolve_bundles(bundles: &[PathBuf], work_dir: Option<&Path>) -> Vec<PathBuf> {
    bundles
        .iter()
        .filter(|bundle| !bundle.as_os_str().is_empty())
        .map(|bundle| match work_dir {
            Some(dir) if bundle.is_relative() => dir.join(bundle),
            _ => bundle.clone(),
        })
        .collect()
}
