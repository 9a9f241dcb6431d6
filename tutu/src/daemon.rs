//! Component wiring and the daemon lifecycle.

use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use tutu_llama::{LlamaConfig, LlamaLoader};
use tutu_pool::EnginePool;
use tutu_registry::{Catalog, Registry};
use tutu_server::{ServerState, router};
use tutu_store::StoreLayout;

use crate::config::DaemonConfig;
use crate::identity::ensure_node_identity;

/// How long in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Daemon startup and serve errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Filesystem or listener setup failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Owns every component and runs the single HTTP listener.
pub struct Daemon {
    home: PathBuf,
    config: DaemonConfig,
}

impl Daemon {
    /// Daemon over a home directory and loaded configuration.
    pub fn new(home: impl Into<PathBuf>, config: DaemonConfig) -> Self {
        Self {
            home: home.into(),
            config,
        }
    }

    /// Bind the configured listen address and serve until signalled.
    pub async fn run(self) -> Result<(), DaemonError> {
        let listener = TcpListener::bind(&self.config.listen).await?;
        self.run_on(listener).await
    }

    /// Serve on an already bound listener (tests bind port zero).
    pub async fn run_on(self, listener: TcpListener) -> Result<(), DaemonError> {
        tokio::fs::create_dir_all(&self.home).await?;
        let layout = StoreLayout::new(&self.home);

        let identity = ensure_node_identity(&layout.keys_dir())?;
        tracing::info!(node = %identity.public_hex, home = %self.home.display(), "starting TuTu");

        let registry = Arc::new(Registry::with_fs_metadata(
            layout.clone(),
            Catalog::builtin(),
        ));

        let mut llama = LlamaConfig::new(layout.bin_dir());
        llama.spawn.context_size = self.config.context_size;
        llama.spawn.gpu_layers = self.config.gpu_layers;
        if self.config.threads > 0 {
            llama.spawn.threads = self.config.threads;
        }
        let loader = Arc::new(LlamaLoader::new(llama));

        let pool = Arc::new(EnginePool::new(
            registry.clone(),
            loader,
            self.config.pool_config(),
        ));

        let shutdown = CancellationToken::new();
        let reaper = {
            let pool = pool.clone();
            let token = shutdown.clone();
            tokio::spawn(async move { pool.run_reaper(token).await })
        };

        let state = ServerState::new(pool.clone(), registry, self.config.generation_defaults());
        let app = router(state);

        let addr = listener.local_addr()?;
        tracing::info!(%addr, "TuTu is running");

        let signal_token = CancellationToken::new();
        tokio::spawn(wait_for_signal(signal_token.clone()));

        let serve = axum::serve(listener, app)
            .with_graceful_shutdown({
                let token = signal_token.clone();
                async move { token.cancelled().await }
            })
            .into_future();
        tokio::select! {
            result = serve => result?,
            _ = async {
                signal_token.cancelled().await;
                tokio::time::sleep(SHUTDOWN_GRACE).await;
            } => {
                tracing::warn!("shutdown grace period expired, closing connections");
            }
        }

        tracing::info!("shutting down");
        shutdown.cancel();
        let _ = reaper.await;
        pool.unload_all().await;
        Ok(())
    }
}

/// Resolve on SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn wait_for_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await;
                token.cancel();
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;

    tracing::info!("shutdown signal received");
    token.cancel();
}
