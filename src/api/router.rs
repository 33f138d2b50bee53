//! API router.
//!
//! Returns a composable `Router`; every route lives under `/api/`.
//! Layers: request tracing (outermost) → body size limit → handler.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;

/// Build the API router.
pub fn api_router(core: Arc<CoreState>) -> Router {
    let body_limit = core.config.max_upload_bytes;
    let ctx = ApiContext::new(core);

    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let api = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/ecg/analyze", post(endpoints::analysis::analyze))
        .route("/ecg/waveform", post(endpoints::analysis::waveform))
        .route(
            "/visits",
            get(endpoints::visits::list).post(endpoints::visits::create),
        )
        .route("/visits/export.csv", get(endpoints::visits::export_csv))
        .route("/visits/:id", get(endpoints::visits::detail))
        .route("/visits/:id/ecg", put(endpoints::visits::replace_ecg))
        .route(
            "/visits/:id/ecg/reanalyze",
            post(endpoints::visits::reanalyze),
        )
        .route(
            "/visits/:id/ecg/waveform",
            get(endpoints::visits::waveform),
        )
        .with_state(ctx);

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}
