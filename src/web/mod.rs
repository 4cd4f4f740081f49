// Web server hosting one configured command
// Each hosted server gets its own listener, router and process slots

mod app;
mod handlers;
mod listeners;

pub use app::create_app;
pub use listeners::create_listener;

use crate::{config::ServerConfig, process::ProcessInvoker};
use std::{future::Future, sync::Arc};

// Upper bound for a whole request body, on top of the per-part limit
pub const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024 * 1024; // 64MB

/// Configuration and process slots of one hosted server.
pub struct ServerContext {
    pub config: ServerConfig,
    pub invoker: ProcessInvoker,
}

impl ServerContext {
    pub fn new(config: ServerConfig) -> Self {
        let invoker = ProcessInvoker::new(config.command.clone());
        Self { config, invoker }
    }
}

pub type SharedServer = Arc<ServerContext>;

/// Binds and serves one configured server until `shutdown` completes.
pub async fn run_server(
    config: ServerConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let (addr, listener) = create_listener(&config.host, config.port).await?;
    tracing::info!(
        "Server for '{}' listening on {} (command: {:?})",
        config.server_name,
        addr,
        config.command
    );

    let server_name = config.server_name.clone();
    let app = create_app(Arc::new(ServerContext::new(config)));

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Server for '{}' has shut down.", server_name);
    Ok(())
}
