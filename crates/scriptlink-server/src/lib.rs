//! JSON-RPC tool server for the scriptlink engine.
//!
//! Exposes a single `execute` tool over HTTP `POST /mcp`. Requests are
//! handled concurrently; the [`ExecutionController`] lets only one script
//! run at a time and rejects the rest as busy.
//!
//! # Architecture
//!
//! - **Protocol**: JSON-RPC envelopes and tool-protocol message types
//! - **Tools**: the `execute` tool descriptor and result formatting
//! - **Routes**: the axum router, CORS and panic handling

pub mod error;
pub mod protocol;
pub mod routes;
pub mod tools;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use scriptlink_core::ExecutionController;

pub use error::{ServerError, ServerResult};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use routes::{AppState, MCP_PATH, create_router};

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 5099;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on. `0` picks a free port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    fn socket_addr(&self) -> ServerResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", self.host, self.port)))
    }
}

/// Builds and starts the HTTP server.
pub struct McpServer {
    config: ServerConfig,
    controller: Arc<ExecutionController>,
}

impl McpServer {
    pub fn new(config: ServerConfig, controller: Arc<ExecutionController>) -> Self {
        Self { config, controller }
    }

    /// Bind the listener and run the accept loop on a background task.
    pub async fn start(self) -> ServerResult<ServerHandle> {
        let addr = self.config.socket_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let app = create_router(Arc::new(AppState::new(Arc::clone(&self.controller))));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                tracing::error!("server error: {}", e);
            }
            tracing::info!("server shutdown complete");
        });

        let handle = ServerHandle {
            local_addr,
            shutdown: Some(shutdown_tx),
            task,
            controller: self.controller,
        };
        tracing::info!("MCP server started on {}", handle.endpoint());
        Ok(handle)
    }
}

/// A running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    controller: Arc<ExecutionController>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Full URL clients post to.
    pub fn endpoint(&self) -> String {
        format!("http://{}{}", self.local_addr, MCP_PATH)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel any running script, then shut down gracefully.
    pub async fn stop(mut self) -> ServerResult<()> {
        if let Some(id) = self.controller.cancel_active() {
            tracing::info!(session = %id, "cancelled active session on shutdown");
        }
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.task)
            .await
            .map_err(|e| ServerError::Task(e.to_string()))
    }
}

/// Run the server until Ctrl+C.
pub async fn serve(config: ServerConfig, controller: Arc<ExecutionController>) -> ServerResult<()> {
    let handle = McpServer::new(config, controller).start().await?;

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received shutdown signal");

    handle.stop().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 5099);
    }

    #[test]
    fn test_invalid_address() {
        let config = ServerConfig {
            host: "not a host".to_string(),
            port: 80,
        };
        assert!(matches!(
            config.socket_addr(),
            Err(ServerError::InvalidAddress(_))
        ));
    }
}
