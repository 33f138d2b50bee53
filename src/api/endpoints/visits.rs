//! Visit endpoints.
//!
//! - `GET  /api/visits`: list
//! - `POST /api/visits`: create (multipart: `patient_name`, `notes`, optional ECG pair)
//! - `GET  /api/visits/:id`: visit + analysis (cached or live)
//! - `PUT  /api/visits/:id/ecg`: replace the ECG pair and re-analyze
//! - `POST /api/visits/:id/ecg/reanalyze`: forced live analysis
//! - `GET  /api/visits/:id/ecg/waveform`: preview of the stored record
//! - `GET  /api/visits/export.csv`: CSV export

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use super::analysis::{WaveformQuery, WaveformResponse};
use super::parse_id;
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, EcgForm};
use crate::visits::{self, NewVisit, VisitReport, VisitSummary};

#[derive(Serialize)]
pub struct VisitListResponse {
    pub success: bool,
    pub visits: Vec<VisitSummary>,
}

#[derive(Serialize)]
pub struct VisitResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: VisitReport,
}

impl From<VisitReport> for VisitResponse {
    fn from(report: VisitReport) -> Self {
        Self {
            success: true,
            report,
        }
    }
}

/// `GET /api/visits`
pub async fn list(State(ctx): State<ApiContext>) -> Result<Json<VisitListResponse>, ApiError> {
    let visits = visits::list_visits(&ctx.core)?;
    Ok(Json(VisitListResponse {
        success: true,
        visits,
    }))
}

/// `POST /api/visits`
pub async fn create(
    State(ctx): State<ApiContext>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<VisitResponse>), ApiError> {
    let mut form = EcgForm::read(multipart).await?;
    let upload = form.take_upload()?;
    let new = NewVisit {
        patient_name: form.text("patient_name").unwrap_or_default().to_string(),
        notes: form.text("notes").map(str::to_string),
    };

    let report = visits::create_visit(&ctx.core, new, upload).await?;
    Ok((StatusCode::CREATED, Json(report.into())))
}

/// `GET /api/visits/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<VisitResponse>, ApiError> {
    let id = parse_id(&id)?;
    let report = visits::visit_report(&ctx.core, id).await?;
    Ok(Json(report.into()))
}

/// `PUT /api/visits/:id/ecg`
pub async fn replace_ecg(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Json<VisitResponse>, ApiError> {
    let id = parse_id(&id)?;
    let upload = EcgForm::read(multipart).await?.require_upload()?;
    let report = visits::replace_visit_ecg(&ctx.core, id, upload).await?;
    Ok(Json(report.into()))
}

/// `POST /api/visits/:id/ecg/reanalyze`
pub async fn reanalyze(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<VisitResponse>, ApiError> {
    let id = parse_id(&id)?;
    let report = visits::reanalyze_visit(&ctx.core, id).await?;
    Ok(Json(report.into()))
}

/// `GET /api/visits/:id/ecg/waveform`
pub async fn waveform(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    Query(query): Query<WaveformQuery>,
) -> Result<Json<WaveformResponse>, ApiError> {
    let id = parse_id(&id)?;
    let preview = visits::visit_waveform(&ctx.core, id, query.selection()).await?;
    Ok(Json(WaveformResponse {
        success: true,
        preview,
    }))
}

/// `GET /api/visits/export.csv`
pub async fn export_csv(State(ctx): State<ApiContext>) -> Result<impl IntoResponse, ApiError> {
    let csv = visits::export_csv(&ctx.core).await?;
    let filename = format!(
        "ecg_visits_{}.csv",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        csv,
    ))
}
