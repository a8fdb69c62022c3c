//! Shared proxy state and configuration.

use std::{io, net::SocketAddr, path::PathBuf};

use regex::Regex;
use solcov_coverage::CoverageReport;
use solcov_rpc::{RpcClient, RpcClientError};
use solcov_solidity::{DedupLog, LoadError, Registry};
use tokio::sync::RwLock;

use crate::queue::JobQueue;

/// The configuration surface consumed by the proxy core. Populated by an
/// external loader (the CLI).
#[derive(Clone, Debug)]
pub struct Config {
    /// Upstream JSON-RPC URL, plain or TLS.
    pub rpc_url: String,
    /// Local port the proxy listens on.
    pub port: u16,
    /// Directory holding the compiled artifact files.
    pub artifacts_dir: PathBuf,
    /// Fuzzy-match acceptance threshold.
    pub fuzzy_match_factor: f64,
    /// Files matching this pattern are excluded from reports.
    pub ignore: Option<Regex>,
}

/// Unrecoverable proxy failures. Everything else is local to one job or one
/// artifact and never aborts the process.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The artifact directory could not be read at startup or reload.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The upstream URL is unusable.
    #[error(transparent)]
    Rpc(#[from] RpcClientError),

    /// The listening port could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The HTTP server failed while serving.
    #[error("proxy server failed: {0}")]
    Serve(#[source] io::Error),
}

/// State shared by the request handlers and the dispatcher task. The
/// registry is effectively single-writer: only the dispatcher marks visited
/// PCs, and a reload drains the queue before swapping the contents.
pub struct AppState {
    pub client: RpcClient,
    pub registry: RwLock<Registry>,
    pub queue: JobQueue,
    pub log: DedupLog,
    pub config: Config,
}

impl AppState {
    /// Builds the shared state, performing the initial registry load. Fails
    /// only on the fatal startup conditions: an unusable upstream URL or an
    /// unreadable artifact directory.
    pub fn new(config: Config) -> Result<Self, ProxyError> {
        let client = RpcClient::new(&config.rpc_url)?;
        let registry = Registry::load(&config.artifacts_dir, config.fuzzy_match_factor)?;

        Ok(Self {
            client,
            registry: RwLock::new(registry),
            queue: JobQueue::default(),
            log: DedupLog::default(),
            config,
        })
    }

    /// Forces a full registry reload: drains in-flight trace work, rebuilds
    /// from the artifact directory and swaps the contents atomically.
    pub async fn reload(&self) -> Result<(), LoadError> {
        self.queue.drain().await;
        let fresh = Registry::load(&self.config.artifacts_dir, self.config.fuzzy_match_factor)?;
        *self.registry.write().await = fresh;
        tracing::info!("registry reloaded");
        Ok(())
    }

    /// Drains pending trace work, then computes the coverage reports.
    pub async fn report(&self) -> CoverageReport {
        self.queue.drain().await;
        let mut registry = self.registry.write().await;
        solcov_coverage::compute(&mut registry, self.config.ignore.as_ref())
    }
}
