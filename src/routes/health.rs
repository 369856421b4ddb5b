use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub api_key: ComponentHealth,
    pub sessions: SessionHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub detail: Option<String>,
}

#[derive(Serialize)]
pub struct SessionHealth {
    pub active: usize,
}

/// GET /health: liveness plus configuration status.
///
/// The remote API is not called; a missing credential alone makes the
/// service degraded because every remote action would fail.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let api_key = match state.config.api_key() {
        Ok(_) => ComponentHealth {
            status: "ok".to_string(),
            detail: None,
        },
        Err(e) => ComponentHealth {
            status: "error".to_string(),
            detail: Some(e.to_string()),
        },
    };

    let healthy = api_key.status == "ok" && state.backend.is_some();
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            api_key,
            sessions: SessionHealth {
                active: state.sessions.len(),
            },
        },
    };

    (status_code, Json(response))
}
