//! Daemon entry point.

use tracing_subscriber::EnvFilter;

use tutu::{Daemon, DaemonConfig, config};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let home = config::home_dir();
    let config = match DaemonConfig::load(&home) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = Daemon::new(home, config).run().await {
        tracing::error!(error = %e, "daemon failed");
        std::process::exit(1);
    }
}
