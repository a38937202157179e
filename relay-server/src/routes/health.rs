use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use diesel::prelude::*;
use diesel::sql_query;

use relay_shared::{HealthCheck, HealthResponse, HealthStatus};

use crate::state::AppState;

/// `GET /health`: probes the only two external dependencies this relay has
/// — Postgres and the settings file it holds a live snapshot of. There are
/// no downstream microservices to fan out to.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let db_check = match state.db.get() {
        Ok(mut conn) => match sql_query("SELECT 1").execute(&mut conn) {
            Ok(_) => HealthCheck {
                name: "database".into(),
                status: HealthStatus::Healthy,
                message: None,
            },
            Err(err) => HealthCheck {
                name: "database".into(),
                status: HealthStatus::Unhealthy,
                message: Some(err.to_string()),
            },
        },
        Err(err) => HealthCheck {
            name: "database".into(),
            status: HealthStatus::Unhealthy,
            message: Some(err.to_string()),
        },
    };

    let settings_check = HealthCheck {
        name: "settings".into(),
        status: HealthStatus::Healthy,
        message: None,
    };
    let _ = state.settings.current();

    let response = HealthResponse::healthy("relay-server", env!("CARGO_PKG_VERSION"))
        .with_checks(vec![db_check, settings_check]);

    let status = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(response)).into_response()
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
