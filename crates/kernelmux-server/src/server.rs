//! HTTP surface and gateway assembly.
//!
//! The [`Gateway`] wires the kernel table, the connection registry, the
//! config, and the shutdown coordinator into one axum router with two
//! routes: `/health` for liveness reporting and
//! `/kernels/{kernel_id}/channels` for the websocket bridge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::GatewayConfig;
use crate::kernel::KernelManager;
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket;

/// Shared state behind every route handler.
#[derive(Clone)]
pub struct AppState {
    kernels: Arc<RwLock<HashMap<String, Arc<dyn KernelManager>>>>,
    pub connections: Arc<ConnectionRegistry>,
    pub config: Arc<GatewayConfig>,
    pub shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            kernels: Arc::new(RwLock::new(HashMap::new())),
            connections: Arc::new(ConnectionRegistry::new()),
            config: Arc::new(config),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Register a kernel under its own id.
    pub fn add_kernel(&self, manager: Arc<dyn KernelManager>) {
        let kernel_id = manager.kernel_id().to_string();
        info!(%kernel_id, "kernel registered");
        let _ = self.kernels.write().insert(kernel_id, manager);
    }

    pub fn remove_kernel(&self, kernel_id: &str) -> Option<Arc<dyn KernelManager>> {
        self.kernels.write().remove(kernel_id)
    }

    pub fn kernel(&self, kernel_id: &str) -> Option<Arc<dyn KernelManager>> {
        self.kernels.read().get(kernel_id).cloned()
    }

    pub fn kernel_count(&self) -> usize {
        self.kernels.read().len()
    }
}

/// The websocket-to-kernel gateway server.
pub struct Gateway {
    state: AppState,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            state: AppState::new(config),
        }
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub fn add_kernel(&self, manager: Arc<dyn KernelManager>) {
        self.state.add_kernel(manager);
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Bind and serve until [`ShutdownCoordinator::shutdown`] fires,
    /// then tear down any connections still live.
    pub async fn serve(&self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "gateway listening");

        let shutdown = self.state.shutdown.token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                tokio::select! {
                    () = shutdown.cancelled() => {}
                    _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
                }
            })
            .await?;

        self.state.connections.close_all().await;
        info!("gateway stopped");
        Ok(())
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/kernels/{kernel_id}/channels", get(websocket::kernel_channels))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_connections: usize,
    pub kernels: usize,
    pub uptime_secs: u64,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_connections: state.connections.connection_count(),
        kernels: state.kernel_count(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
