//! gRPC server that hosts the TStorage service.

use crate::proto::t_storage_server::TStorageServer;
use crate::service::TStorageService;
use crate::storage_backend::StorageBackend;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tstorage_observe::Meter;

/// gRPC server wrapper.
///
/// Binds the listener, registers the TStorage service and runs the accept loop in a
/// background task until [`GrpcServer::shutdown`] is called.
pub struct GrpcServer {
    addr: SocketAddr,
    backend: Arc<dyn StorageBackend>,
    meter: Option<Arc<dyn Meter>>,
    local_addr: Option<SocketAddr>,
    running: Option<Running>,
}

/// Handles to a serving accept loop.
struct Running {
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), tonic::transport::Error>>,
}

impl GrpcServer {
    /// Create a new gRPC server delegating to `backend`.
    pub fn with_backend(addr: SocketAddr, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            addr,
            backend,
            meter: None,
            local_addr: None,
            running: None,
        }
    }

    /// Set the metrics meter.
    ///
    /// If provided, the service records insert/select counters and latencies.
    pub fn with_meter(mut self, meter: Arc<dyn Meter>) -> Self {
        self.meter = Some(meter);
        self
    }

    /// Bind the listener and start serving.
    ///
    /// The listener is bound before this returns, so a bad address or a port in use
    /// is reported here rather than from the background task. Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr, GrpcServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| GrpcServerError::Bind {
                addr: self.addr,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| GrpcServerError::Bind {
                addr: self.addr,
                source,
            })?;

        let service = match &self.meter {
            Some(meter) => TStorageService::with_meter(self.backend.clone(), meter.clone()),
            None => TStorageService::new(self.backend.clone()),
        };

        let (stop, stopped) = oneshot::channel::<()>();
        let serve = Server::builder()
            .add_service(TStorageServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                stopped.await.ok();
            });

        self.running = Some(Running {
            stop,
            task: tokio::spawn(serve),
        });
        self.local_addr = Some(local_addr);

        tracing::info!(
            "gRPC server listening on {} (metrics {})",
            local_addr,
            if self.meter.is_some() { "on" } else { "off" }
        );
        Ok(local_addr)
    }

    /// Stop accepting connections and wait for in-flight calls to finish.
    pub async fn shutdown(mut self) -> Result<(), GrpcServerError> {
        let Some(Running { stop, task }) = self.running.take() else {
            return Ok(());
        };

        tracing::info!("Draining gRPC server on {:?}", self.local_addr);
        let _ = stop.send(());
        task.await
            .map_err(|e| GrpcServerError::ShutdownError(e.to_string()))?
            .map_err(|e| GrpcServerError::ServerError(e.to_string()))?;

        tracing::info!("gRPC server drained");
        Ok(())
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GrpcServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}
