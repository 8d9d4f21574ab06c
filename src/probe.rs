//! Readiness probe endpoint
//!
//! `GET /readyz` answers 200 once both event loops are running and 500
//! before that.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tracing::{error, info};

/// Path of the readiness endpoint
pub const READYZ_PATH: &str = "/readyz";

/// Process-wide readiness flag shared between startup and the probe handler
#[derive(Clone, Debug, Default)]
pub struct ReadinessFlag(Arc<AtomicBool>);

impl ReadinessFlag {
    /// A flag that starts out not ready
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the process ready
    pub fn set_ready(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`set_ready`](Self::set_ready) was called
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

async fn readyz(State(flag): State<ReadinessFlag>) -> StatusCode {
    if flag.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Build the probe router
pub fn router(flag: ReadinessFlag) -> Router {
    Router::new()
        .route(READYZ_PATH, get(readyz))
        .with_state(flag)
}

/// Serve the probe on `addr` until the process exits
///
/// A bind failure is logged and the function returns; the operator keeps
/// running without a probe.
pub async fn serve(addr: SocketAddr, flag: ReadinessFlag) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => {
            info!(%addr, "health endpoint listening");
            l
        }
        Err(e) => {
            error!(%addr, error = %e, "failed to bind health endpoint");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, router(flag)).await {
        error!(error = %e, "health endpoint stopped");
    }
}
