use std::time::Instant;

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: i64,
    pub uptime_seconds: i64,
    pub components: ComponentsHealth,
    pub websockets: ConnectionMetrics,
}

#[derive(Serialize, Debug)]
pub struct ComponentsHealth {
    pub database: ComponentStatus,
    pub realtime: ComponentStatus,
}

#[derive(Serialize, Debug)]
pub struct ComponentStatus {
    pub status: String,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct ConnectionMetrics {
    pub active_connections: usize,
    pub peak_connections: usize,
    pub total_connections: usize,
}

impl ComponentStatus {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            response_time_ms: None,
            error: None,
        }
    }

    pub fn unhealthy(error: String) -> Self {
        Self {
            status: "unhealthy".to_string(),
            response_time_ms: None,
            error: Some(error),
        }
    }

    pub fn with_response_time(mut self, response_time_ms: u64) -> Self {
        self.response_time_ms = Some(response_time_ms);
        self
    }

    fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

fn check_database(state: &AppState) -> ComponentStatus {
    let started = Instant::now();
    match state.store.ping() {
        Ok(()) => ComponentStatus::healthy()
            .with_response_time(started.elapsed().as_millis() as u64),
        Err(e) => ComponentStatus::unhealthy(e.to_string()),
    }
}

/// Readiness: 503 when the database does not answer.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let now = Utc::now();
    let components = ComponentsHealth {
        database: check_database(&state),
        realtime: ComponentStatus::healthy(),
    };
    let healthy = components.database.is_healthy() && components.realtime.is_healthy();
    let (active, peak, total) = state.ws_metrics.snapshot();

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: now.timestamp(),
        uptime_seconds: (now - state.started_at).num_seconds(),
        components,
        websockets: ConnectionMetrics {
            active_connections: active,
            peak_connections: peak,
            total_connections: total,
        },
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

/// Liveness only; never touches the database.
pub async fn live() -> &'static str {
    "OK"
}
