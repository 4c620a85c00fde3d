//! Wizard guard server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server ──▶ security::middleware ──▶ handlers
//!                                       │  rate_limit (global)     │
//!                                       │  csrf (full paths)       │  csrf tokens
//!                                       │  headers                 │  signed grants
//!                                       ▼                          ▼  status
//!                                   lifecycle::GuardServices (owned stores)
//!                                       │
//!                                       └── sweeper (periodic purge)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use wizard_guard::clock::system_clock;
use wizard_guard::config::{load_config, GuardConfig};
use wizard_guard::lifecycle::signals::wait_for_shutdown_signal;
use wizard_guard::observability::{logging, metrics};
use wizard_guard::security::{SecretError, SigningSecret};
use wizard_guard::{GuardServices, HttpServer};

#[derive(Parser)]
#[command(name = "wizard-guard")]
#[command(about = "Resilience and security layer for the listing wizard", long_about = None)]
struct Args {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn load_secret(config: &GuardConfig) -> Result<SigningSecret, SecretError> {
    match SigningSecret::from_env(&config.signed_tokens.secret_env) {
        Ok(secret) => Ok(secret),
        Err(SecretError::Missing(var)) => {
            tracing::warn!(
                env = %var,
                "Signing secret not set; using an ephemeral key, tokens will not survive restart"
            );
            Ok(SigningSecret::generate())
        }
        Err(e) => Err(e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "wizard-guard starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.listener.request_timeout_secs,
        cleanup_interval_secs = config.cleanup.interval_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let secret = load_secret(&config)?;
    let services = Arc::new(GuardServices::build(&config, &secret, system_clock())?);
    services.start();

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config, services.clone());
    let served = server.run(listener, wait_for_shutdown_signal()).await;

    services.close().await;
    served?;

    tracing::info!("Shutdown complete");
    Ok(())
}
