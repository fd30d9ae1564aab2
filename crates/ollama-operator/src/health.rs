//! Liveness and readiness endpoints

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tracing::{error, info};

/// Readiness flag shared with the health server
#[derive(Clone, Debug, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    /// Report ready once the controllers are running
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Whether [`HealthState::mark_ready`] was called
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

async fn readyz(State(state): State<HealthState>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// `/healthz` always answers, `/readyz` only once ready
pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Serve the health endpoints on `port` until the process exits
pub async fn serve(port: u16, state: HealthState) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => {
            info!(addr = %addr, "Health server started");
            l
        }
        Err(e) => {
            error!(error = %e, port, "Failed to bind health port");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, router(state)).await {
        error!(error = %e, "Health server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readiness_follows_the_flag() {
        let state = HealthState::default();
        assert_eq!(
            readyz(State(state.clone())).await,
            (StatusCode::SERVICE_UNAVAILABLE, "not ready")
        );

        state.mark_ready();
        assert_eq!(readyz(State(state)).await, (StatusCode::OK, "ok"));
    }
}
