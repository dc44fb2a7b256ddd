//! `tether-server`: runs a Tether server.
//!
//! ```text
//! tether-server [config.json]
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`). `TETHER_BIND`
//! overrides the configured bind address.

use tether::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Ok(addr) = std::env::var(BIND_ENV) {
        config.bind_addr = addr;
    }

    let server = TetherServer::builder().config(config).build().await?;
    tracing::info!(addr = %server.local_addr()?, "listening");

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
