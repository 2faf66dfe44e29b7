//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks metadata-store connectivity

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that pings the versioned metadata store. An absent
/// catalog index still counts as ready; only transport failures do not.
/// HTTP 200 when the check passes, HTTP 503 when it fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let store_check = match state.catalog.ping().await {
        Ok(()) => (true, None::<String>),
        Err(err) => (false, Some(err.to_string())),
    };

    let body = ReadyResponse {
        status: if store_check.0 {
            "ok".into()
        } else {
            "error".into()
        },
        store: CheckStatus {
            ok: store_check.0,
            error: store_check.1,
        },
    };

    let status = if body.store.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    store: CheckStatus,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
