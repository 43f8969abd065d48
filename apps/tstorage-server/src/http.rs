//! Monitoring endpoint.
//!
//! - `GET /health`: 200 while the gRPC service is listening, 503 otherwise
//! - `GET /metrics`: Prometheus text exposition

use crate::metrics::PrometheusMeter;
use crate::server::ServerState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::RwLock;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Shared with the handlers.
#[derive(Clone)]
struct Monitor {
    state: Arc<RwLock<ServerState>>,
    meter: Arc<PrometheusMeter>,
    precision: &'static str,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub state: ServerState,
    pub timestamp_precision: &'static str,
}

/// Background HTTP listener for `/health` and `/metrics`.
pub struct HttpServer {
    addr: SocketAddr,
    monitor: Monitor,
    local_addr: Option<SocketAddr>,
    stop: Option<(oneshot::Sender<()>, JoinHandle<std::io::Result<()>>)>,
}

impl HttpServer {
    pub fn new(
        addr: SocketAddr,
        state: Arc<RwLock<ServerState>>,
        meter: Arc<PrometheusMeter>,
        precision: &'static str,
    ) -> Self {
        Self {
            addr,
            monitor: Monitor {
                state,
                meter,
                precision,
            },
            local_addr: None,
            stop: None,
        }
    }

    /// Bind and serve in the background. Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr, HttpServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| HttpServerError::Startup(format!("Failed to bind {}: {}", self.addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| HttpServerError::Startup(e.to_string()))?;

        let app = Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .with_state(self.monitor.clone());

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    rx.await.ok();
                })
                .await
        });

        self.stop = Some((tx, handle));
        self.local_addr = Some(local_addr);

        tracing::info!("HTTP monitoring endpoint listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Stop accepting requests and wait for the listener task to exit.
    pub async fn shutdown(mut self) -> Result<(), HttpServerError> {
        let Some((tx, handle)) = self.stop.take() else {
            return Ok(());
        };

        let _ = tx.send(());
        handle
            .await
            .map_err(|e| HttpServerError::Shutdown(format!("Join error: {}", e)))?
            .map_err(|e| HttpServerError::Shutdown(format!("Server error: {}", e)))?;

        tracing::info!("HTTP monitoring endpoint stopped");
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

async fn health(State(monitor): State<Monitor>) -> Response {
    let state = *monitor.state.read();
    let (code, status) = if state == ServerState::Listening {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    let body = HealthStatus {
        status,
        state,
        timestamp_precision: monitor.precision,
    };
    (code, Json(body)).into_response()
}

async fn metrics(State(monitor): State<Monitor>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        monitor.meter.export(),
    )
        .into_response()
}

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("Startup error: {0}")]
    Startup(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),
}
