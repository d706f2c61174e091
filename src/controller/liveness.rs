//! Liveness endpoint.
//!
//! Serves `/healthz`: 200 once the controller's watch loop is running,
//! 503 before that and after it stops.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::convergence::Shutdown;
use crate::error::Result;

/// Shared liveness flag.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    alive: Arc<AtomicBool>,
}

impl Liveness {
    /// Creates a flag that starts not alive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag.
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Reads the flag.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Builds the liveness router.
pub fn router(liveness: Liveness) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .with_state(liveness)
}

async fn healthz(State(liveness): State<Liveness>) -> (StatusCode, &'static str) {
    if liveness.is_alive() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// HTTP server for the liveness endpoint.
#[derive(Debug)]
pub struct LivenessServer {
    listener: TcpListener,
    liveness: Liveness,
}

impl LivenessServer {
    /// Binds the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, liveness: Liveness) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, liveness })
    }

    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails.
    pub async fn serve(self, shutdown: Shutdown) -> Result<()> {
        info!("Liveness endpoint listening on {}", self.local_addr()?);
        axum::serve(self.listener, router(self.liveness))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}
