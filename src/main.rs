// Main entry point for the proc2api-server application.
// Loads the server configuration file, optionally writes the nginx configuration,
// and starts one HTTP server per configured entry.

mod config;
mod error;
mod nginx;
mod params;
mod process;
mod shutdown_signal;
mod size_limit;
#[cfg(test)]
mod test_support;
mod web;

use clap::Parser;
use shutdown_signal::{shutdown_signal, wait_for_shutdown};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::Level;

/// Command line arguments for proc2api-server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct AppConfig {
    /// Path of the configuration JSON file, containing an array of server entries.
    #[arg(short, long, env = "PROC2API_CONFIG_PATH")]
    config_path: PathBuf,

    /// Path of the nginx configuration file to generate for the configured servers.
    /// Nothing is generated if this option is not specified.
    #[arg(long, env = "PROC2API_NGINX_CONFIG_PATH")]
    nginx_config_path: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, env = "PROC2API_VERBOSE", action = clap::ArgAction::SetTrue)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    // Parse command line args and environment variables
    let app_config = AppConfig::parse();

    // Initialize tracing subscriber for structured logging.
    tracing_subscriber::fmt()
        .with_max_level(if app_config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_target(true) // Include module path in logs
        .with_file(true) // Include source file name
        .with_line_number(true) // Include line numbers
        .init();

    tracing::info!("Starting proc2api-server...");
    tracing::info!("Configuration file: {}", app_config.config_path.display());

    let server_configs = match config::load_server_configs(&app_config.config_path) {
        Ok(configs) => configs,
        Err(e) => {
            tracing::error!("FATAL: Failed to load configuration: {}", e);
            eprintln!("FATAL: Could not load configuration. Error: {}. Exiting.", e);
            std::process::exit(1);
        }
    };
    tracing::info!("Loaded {} server configuration(s).", server_configs.len());

    if let Some(nginx_config_path) = &app_config.nginx_config_path {
        match nginx::write_nginx_config(nginx_config_path, &server_configs) {
            Ok(()) => tracing::info!(
                "nginx configuration written to {}",
                nginx_config_path.display()
            ),
            Err(e) => tracing::error!(
                "Failed to write nginx configuration to {}: {}",
                nginx_config_path.display(),
                e
            ),
        }
    }

    if server_configs.is_empty() {
        tracing::warn!("No valid server configuration found. Nothing to run.");
        return;
    }

    // --- Start HTTP Servers ---
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let servers = server_configs
        .into_iter()
        .map(|server_config| {
            let label = format!("{}:{}", server_config.host, server_config.port);
            let shutdown = wait_for_shutdown(shutdown_tx.subscribe());
            tokio::spawn(async move {
                if let Err(e) = web::run_server(server_config, shutdown).await {
                    tracing::error!("Server {} stopped with error: {}", label, e);
                }
            })
        })
        .collect::<Vec<_>>();
    let servers = futures::future::join_all(servers);
    tokio::pin!(servers);

    let shutdown_requested = tokio::select! {
        _ = shutdown_signal() => true,
        _ = &mut servers => false,
    };

    if shutdown_requested {
        tracing::info!("Shutting down servers...");
        let _ = shutdown_tx.send(());
        servers.await;
    } else {
        tracing::warn!("All servers have stopped.");
    }

    tracing::info!("proc2api-server has shut down.");
}
