//! Ad-hoc ECG endpoints: analysis and waveform preview of an uploaded pair.
//!
//! - `POST /api/ecg/analyze`: multipart `hea_file` + `mat_file`
//! - `POST /api/ecg/waveform?leads=I,II&max_points=2000`: same body, no inference
//!
//! Uploads are staged in a temporary directory that is removed when the
//! request finishes.

use axum::extract::{Multipart, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, EcgForm};
use crate::ecg::waveform::{WaveformPreview, WaveformSelection};
use crate::ecg::PredictionResult;

#[derive(Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: PredictionResult,
}

/// `POST /api/ecg/analyze`: one-off analysis, nothing is persisted.
pub async fn analyze(
    State(ctx): State<ApiContext>,
    multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let upload = EcgForm::read(multipart).await?.require_upload()?;
    let staged = upload.stage_temp()?;

    let result = ctx
        .core
        .ecg
        .analyze(
            staged.files.header_path.clone(),
            staged.files.signal_path.clone(),
        )
        .await?;

    tracing::info!(
        record = %upload.header_name(),
        primary = result.primary_abbreviation(),
        "Ad-hoc ECG analysis complete"
    );

    Ok(Json(AnalyzeResponse {
        success: true,
        result,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct WaveformQuery {
    pub leads: Option<String>,
    pub max_points: Option<usize>,
}

impl WaveformQuery {
    pub fn selection(&self) -> WaveformSelection {
        WaveformSelection::from_query(self.leads.as_deref(), self.max_points)
    }
}

#[derive(Serialize)]
pub struct WaveformResponse {
    pub success: bool,
    #[serde(flatten)]
    pub preview: WaveformPreview,
}

/// `POST /api/ecg/waveform`: per-lead display traces of an uploaded pair.
pub async fn waveform(
    State(ctx): State<ApiContext>,
    Query(query): Query<WaveformQuery>,
    multipart: Multipart,
) -> Result<Json<WaveformResponse>, ApiError> {
    let upload = EcgForm::read(multipart).await?.require_upload()?;
    let staged = upload.stage_temp()?;

    let preview = ctx
        .core
        .ecg
        .waveform(
            staged.files.header_path.clone(),
            staged.files.signal_path.clone(),
            query.selection(),
        )
        .await?;

    Ok(Json(WaveformResponse {
        success: true,
        preview,
    }))
}
