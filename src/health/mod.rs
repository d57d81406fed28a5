//! `GET /health`: a minimal liveness probe. Heavier checks (disk space,
//! external dependency pings) don't apply here — the only externally
//! dependent subsystem is the provider gateway, and its failures surface
//! per-request as `AppError::Provider*` rather than through a poller.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub service: &'static str,
    pub version: &'static str,
}

pub struct StartTime(Instant);

impl StartTime {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.0.elapsed().as_secs()
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthStatus {
        status: "healthy",
        uptime_seconds: state.start_time.elapsed_seconds(),
        service: "jam-room-coordinator",
        version: env!("CARGO_PKG_VERSION"),
    })
}
