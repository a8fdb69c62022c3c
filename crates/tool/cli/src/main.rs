//! The `solcov` binary: a line-coverage proxy for smart-contract test runs.
//!
//! Sits between a test runner and a node's JSON-RPC endpoint, traces the
//! transactions and calls the tests execute and writes line-coverage reports
//! on shutdown. Point the test runner's RPC URL at the proxy port.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use regex::Regex;
use solcov_proxy::{AppState, Config, serve};
use solcov_solidity::registry::DEFAULT_FUZZY_MATCH_FACTOR;
use tracing_subscriber::EnvFilter;

/// Execution-coverage proxy for smart-contract test runs.
#[derive(Debug, Parser)]
#[command(name = "solcov", version, about)]
struct Cli {
    /// Upstream JSON-RPC URL, plain or TLS.
    #[arg(long, default_value = "http://127.0.0.1:8545")]
    rpc: String,

    /// Local port the proxy listens on.
    #[arg(long, default_value_t = 8011)]
    port: u16,

    /// Directory holding the compiled artifact files.
    #[arg(long, default_value = "build/contracts")]
    artifacts: PathBuf,

    /// Fuzzy-match acceptance threshold for perturbed deployed bytecode.
    #[arg(long, default_value_t = DEFAULT_FUZZY_MATCH_FACTOR)]
    fuzzy_match_factor: f64,

    /// Exclude source files matching this pattern from reports.
    #[arg(long)]
    ignore: Option<Regex>,

    /// Where to write the JSON coverage report on shutdown.
    #[arg(long, default_value = "coverage-report.json")]
    json_report: PathBuf,

    /// Where to write the LCOV report on shutdown.
    #[arg(long, default_value = "coverage-report.lcov")]
    lcov_report: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let state = Arc::new(
        AppState::new(Config {
            rpc_url: cli.rpc,
            port: cli.port,
            artifacts_dir: cli.artifacts,
            fuzzy_match_factor: cli.fuzzy_match_factor,
            ignore: cli.ignore,
        })
        .context("failed to start proxy")?,
    );

    // Serve until interrupted, then drain outstanding traces and write the
    // reports.
    tokio::select! {
        result = serve(Arc::clone(&state)) => result.context("proxy exited")?,
        _ = tokio::signal::ctrl_c() => {}
    }

    let report = state.report().await;

    std::fs::write(&cli.json_report, report.json.to_string())
        .with_context(|| format!("failed to write {}", cli.json_report.display()))?;
    std::fs::write(&cli.lcov_report, &report.lcov)
        .with_context(|| format!("failed to write {}", cli.lcov_report.display()))?;

    tracing::info!(
        "reports written to {} and {}",
        cli.json_report.display(),
        cli.lcov_report.display()
    );

    Ok(())
}
