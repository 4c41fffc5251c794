//! HTTP status surface for the scheduler.
//!
//! Every route answers 200 regardless of scheduler state; degradation is
//! reported in the body so the service itself never looks dead.

use std::net::SocketAddr;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::status::{SchedulerStatus, StatusHandle};

#[derive(Debug, Clone, Serialize)]
pub struct Readiness {
    pub status: &'static str,
    pub store: &'static str,
}

async fn scheduler_handler(State(status): State<StatusHandle>) -> Json<SchedulerStatus> {
    Json(status.status())
}

async fn ready_handler(State(status): State<StatusHandle>) -> Json<Readiness> {
    Json(Readiness {
        status: "ready",
        store: if status.store_reachable() {
            "connected"
        } else {
            "disconnected"
        },
    })
}

async fn live_handler() -> StatusCode {
    StatusCode::OK
}

pub fn router(status: StatusHandle) -> Router {
    Router::new()
        .route("/health/scheduler", get(scheduler_handler))
        .route("/readyz", get(ready_handler))
        .route("/live", get(live_handler))
        .with_state(status)
}

/// Serve [`router`] on `addr` until `token` is cancelled.
pub async fn serve(
    status: StatusHandle,
    addr: SocketAddr,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Health server listening");
    axum::serve(listener, router(status))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    Ok(())
}
