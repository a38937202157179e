use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Errors that can cross a component boundary inside the relay.
///
/// Unlike a typical HTTP service's error type, most `RelayError` variants
/// never reach a client directly — the admission pipeline converts
/// validation failures into a rejection reason string (see
/// `relay_core::pipeline`) well before an error would bubble this far.
/// The variants here are reserved for failures that must propagate rather
/// than be acknowledged as a rejection: a failing datastore, cache, or
/// event-check webhook call that aborts the admission outright.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("database pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("webhook transport error: {0}")]
    Webhook(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Error envelope for the small admin HTTP surface (`GET /user`, `GET /health`).
///
/// The admission pipeline's own errors never render through this type — it
/// exists only for the relay's ambient HTTP endpoints.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] RelayError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AdminError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            AdminError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AdminError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AdminError::Internal(err) => {
                tracing::error!(error = %err, "admin endpoint internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
