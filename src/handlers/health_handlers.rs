//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata store and object store

use crate::services::file_service::FileService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Very small liveness probe; never performs I/O.
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
/// Readiness probe that:
/// 1. Runs `SELECT 1` against the metadata store.
/// 2. Stages and removes a small file in the object store.
///
/// HTTP 200 when both pass, HTTP 503 otherwise.
pub async fn readyz(State(service): State<FileService>) -> impl IntoResponse {
    let metadata = match service.metadata.ping().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };
    let objects = match service.objects.root_writable().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };

    let overall_ok = metadata.ok && objects.ok;

    let mut checks = HashMap::new();
    checks.insert("metadata", metadata);
    checks.insert("objectStore", objects);

    let body = ReadyResponse {
        status: if overall_ok { "ok".into() } else { "error".into() },
        checks,
    };

    let status = if overall_ok {
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
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
