//! edge-frontend: HTTP(S) frontend with hot-swappable TLS.
//!
//! Loads endpoints from a TOML file, serves them until SIGTERM/SIGINT, and
//! reloads certificates and ticket seeds on SIGHUP or when credential files
//! change.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use edge_frontend::config::{load_config, CredentialWatcher};
use edge_frontend::handler::{BodyLimitFilter, ClientIdentity, RequestHandlerChain, RequestIdFilter};
use edge_frontend::lifecycle::{Signal, Signals};
use edge_frontend::observability::{logging, metrics};
use edge_frontend::{HttpServer, ServerOptions};

#[derive(Parser)]
#[command(name = "edge-frontend")]
#[command(about = "HTTP(S) frontend with hot-swappable TLS", long_about = None)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "frontend.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init_logging(&config.observability.log_level);

    if cli.check {
        tracing::info!(path = ?cli.config, endpoints = config.endpoints.len(), "Configuration is valid");
        return Ok(());
    }

    tracing::info!("edge-frontend v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let mut options = ServerOptions::from_settings(&config.server);
    options.handler_chain = RequestHandlerChain::new()
        .add_filter(RequestIdFilter)
        .add_filter(BodyLimitFilter::new(config.server.max_body_size))
        .handler(ClientIdentity);

    let server = Arc::new(HttpServer::new(options));
    server.bind(config.endpoints.clone())?;

    let mut start_error = None;
    server.start(
        || tracing::info!("Listening for connections"),
        |e| start_error = Some(e),
    );
    if let Some(e) = start_error {
        return Err(e.into());
    }

    for address in server.addresses() {
        tracing::info!(
            address = %address.address,
            protocol = %address.protocol,
            secure = address.secure,
            "Serving"
        );
    }

    // The watcher must stay alive for notifications to keep arriving.
    let (_watcher, mut changes) = if config.server.watch_credentials {
        let (watcher, changes) = CredentialWatcher::new(&config);
        (Some(watcher.run()?), changes)
    } else {
        let (_, changes) = mpsc::unbounded_channel();
        (None, changes)
    };

    let mut signals = Signals::new()?;
    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Signal::Terminate => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
                Signal::Reload => reload(&server, &cli.config),
            },
            Some(path) = changes.recv() => {
                tracing::info!(path = ?path, "Reloading credentials");
                if let Err(e) = server.update_credentials() {
                    tracing::error!(error = %e, "Credential reload failed");
                }
            }
        }
    }

    let stopping = Arc::clone(&server);
    tokio::task::spawn_blocking(move || stopping.stop()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Re-read credentials and each endpoint's configured ticket seeds.
fn reload(server: &HttpServer, path: &Path) {
    tracing::info!("Reload signal received");

    match load_config(path) {
        Ok(config) => {
            // Endpoints without configured seeds keep their ephemeral ones.
            for endpoint in config.endpoints {
                let Some(seeds) = endpoint.ticket_seeds else {
                    continue;
                };
                if let Err(e) = server.update_endpoint_ticket_seeds(endpoint.address, seeds) {
                    tracing::error!(endpoint = %endpoint.address, error = %e, "Ticket seed reload failed");
                }
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to reload config, keeping ticket seeds"),
    }

    if let Err(e) = server.update_credentials() {
        tracing::error!(error = %e, "Credential reload failed");
    }
}
