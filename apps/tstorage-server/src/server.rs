//! Server lifecycle.
//!
//! Wires the storage engine, the gRPC server and the optional HTTP endpoint together
//! and owns their startup and graceful shutdown:
//!
//! `Unconfigured -> Configured -> Listening -> Draining -> Stopped`

use crate::config::{ConfigError, ServerConfig};
use crate::http::HttpServer;
use crate::metrics::PrometheusMeter;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tstorage_engine::Storage;
use tstorage_observe::Meter;
use tstorage_transport_grpc::{EngineBackend, GrpcServer, StorageBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Unconfigured,
    Configured,
    Listening,
    Draining,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::Unconfigured => "unconfigured",
            ServerState::Configured => "configured",
            ServerState::Listening => "listening",
            ServerState::Draining => "draining",
            ServerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Server - main composition root.
///
/// Holds the storage backend for as long as the gRPC service is up and closes it
/// only after the service has stopped.
pub struct Server {
    config: ServerConfig,
    state: Arc<RwLock<ServerState>>,
    meter: Arc<PrometheusMeter>,
    backend: Option<Arc<dyn StorageBackend>>,
    grpc_server: Option<GrpcServer>,
    http_server: Option<HttpServer>,
    local_addr: Option<SocketAddr>,
    http_local_addr: Option<SocketAddr>,
}

impl Server {
    /// Create a server from configuration.
    ///
    /// Validation happens here: a bad precision, address or duration is rejected
    /// before any storage is opened.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let server = Self {
            config,
            state: Arc::new(RwLock::new(ServerState::Unconfigured)),
            meter: Arc::new(PrometheusMeter::new()),
            backend: None,
            grpc_server: None,
            http_server: None,
            local_addr: None,
            http_local_addr: None,
        };

        server.config.validate()?;
        server.set_state(ServerState::Configured);

        tracing::info!(
            "Configured: addr={}, data_path={}, precision={}, partition={}h, write_timeout={}s",
            server.config.rpc_addr()?,
            server.config.data_path.display(),
            server.config.timestamp_precision,
            server.config.partition_duration_hours,
            server.config.write_timeout_secs
        );

        Ok(server)
    }

    /// Open the storage engine, bind the listener and start serving.
    ///
    /// Any failure here leaves nothing running: whatever was already started is torn down.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        let state = self.state();
        if state != ServerState::Configured {
            return Err(ServerError::InvalidState {
                action: "start",
                state,
            });
        }

        let options = self.config.storage_options()?;
        let precision = options.precision;
        let storage = tokio::task::spawn_blocking(move || Storage::open(options))
            .await
            .map_err(|e| ServerError::Startup(format!("Storage open task failed: {}", e)))??;
        let backend: Arc<dyn StorageBackend> = Arc::new(EngineBackend::new(Arc::new(storage)));

        let addr = self.config.rpc_addr()?;
        let mut grpc_server = GrpcServer::with_backend(addr, backend.clone())
            .with_meter(self.meter.clone() as Arc<dyn Meter>);

        let local_addr = match grpc_server.start().await {
            Ok(local_addr) => local_addr,
            Err(e) => {
                close_backend(backend.as_ref()).await;
                return Err(ServerError::Startup(e.to_string()));
            }
        };

        if let Some(http_addr) = self.config.http_socket_addr()? {
            let mut http_server =
                HttpServer::new(http_addr, self.state.clone(), self.meter.clone(), precision.as_str());
            match http_server.start().await {
                Ok(addr) => {
                    self.http_local_addr = Some(addr);
                    self.http_server = Some(http_server);
                }
                Err(e) => {
                    if let Err(e) = grpc_server.shutdown().await {
                        tracing::error!("Failed to stop gRPC server after HTTP startup failure: {}", e);
                    }
                    close_backend(backend.as_ref()).await;
                    return Err(ServerError::Startup(e.to_string()));
                }
            }
        }

        self.backend = Some(backend);
        self.grpc_server = Some(grpc_server);
        self.local_addr = Some(local_addr);
        self.set_state(ServerState::Listening);

        tracing::info!("tstorage server is listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Drain and stop.
    ///
    /// Stops accepting connections, waits for in-flight calls to finish, then flushes
    /// and closes the storage engine. Errors along the way are logged and shutdown
    /// carries on. Calling it again after the first call is a no-op.
    pub async fn shutdown(&mut self) -> Result<(), ServerError> {
        match self.state() {
            ServerState::Draining | ServerState::Stopped => {
                tracing::debug!("Shutdown already in progress or complete");
                return Ok(());
            }
            ServerState::Unconfigured | ServerState::Configured => {
                self.set_state(ServerState::Stopped);
                return Ok(());
            }
            ServerState::Listening => {}
        }

        tracing::info!("Draining tstorage server");
        self.set_state(ServerState::Draining);

        if let Some(http_server) = self.http_server.take() {
            if let Err(e) = http_server.shutdown().await {
                tracing::error!("Failed to shutdown HTTP server: {}", e);
            }
        }

        if let Some(grpc_server) = self.grpc_server.take() {
            if let Err(e) = grpc_server.shutdown().await {
                tracing::error!("Failed to shutdown gRPC server: {}", e);
            }
        }

        if let Some(backend) = self.backend.take() {
            close_backend(backend.as_ref()).await;
        }

        self.set_state(ServerState::Stopped);
        tracing::info!("tstorage server stopped");
        Ok(())
    }

    /// Start, serve until `signal` resolves, then shut down.
    pub async fn run_until<F>(mut self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        signal.await;
        tracing::info!("Received shutdown signal, gracefully shutting down...");
        self.shutdown().await
    }

    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    /// Bound gRPC address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bound HTTP address, if the HTTP endpoint is enabled.
    pub fn http_local_addr(&self) -> Option<SocketAddr> {
        self.http_local_addr
    }

    fn set_state(&self, state: ServerState) {
        let mut current = self.state.write();
        tracing::debug!("Server state {} -> {}", *current, state);
        *current = state;
    }
}

/// Flush and close the backend. Failures are logged; the caller carries on.
async fn close_backend(backend: &dyn StorageBackend) {
    match backend.close().await {
        Ok(()) => tracing::info!("Storage closed"),
        Err(e) => tracing::error!("Failed to close storage: {}", e),
    }
}

/// Resolves on the first external termination request (SIGINT, or SIGTERM on unix).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] tstorage_engine::Error),

    #[error("Startup error: {0}")]
    Startup(String),

    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: ServerState,
    },
}
