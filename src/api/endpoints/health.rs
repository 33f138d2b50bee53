//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::types::ApiContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub analysis_enabled: bool,
    pub backend: Option<&'static str>,
}

/// `GET /api/health`: liveness plus whether ECG analysis is available.
pub async fn check(State(ctx): State<ApiContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: crate::config::APP_VERSION,
        analysis_enabled: ctx.core.analysis_enabled(),
        backend: ctx.core.ecg.backend_name(),
    })
}
