//! Visit workflows.
//!
//! Every path that needs an ECG result (create, edit, view, re-analyze,
//! waveform, CSV export) goes through [`EcgService`](crate::ecg::EcgService).
//! A prediction is persisted only after a complete, successful analysis.

use std::fmt::Write as _;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::core_state::{CoreError, CoreState};
use crate::db::{self, DatabaseError};
use crate::ecg::taxonomy::CLASS_ABBREVIATIONS;
use crate::ecg::waveform::{WaveformPreview, WaveformSelection};
use crate::ecg::{AnalysisOutcome, AnalysisSource, EcgError, PredictionResult};
use crate::intake::{self, EcgUpload, UploadError};
use crate::models::{EcgFiles, Visit};

#[derive(Error, Debug)]
pub enum VisitError {
    #[error("Visit not found: {0}")]
    NotFound(Uuid),

    #[error("Visit {0} has no ECG record")]
    NoEcg(Uuid),

    #[error("Invalid visit: {0}")]
    Invalid(String),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Ecg(#[from] EcgError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub struct NewVisit {
    pub patient_name: String,
    pub notes: Option<String>,
}

// ═══════════════════════════════════════════════════════════
// Views
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Cached,
    Live,
    Error,
    None,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Cached => "cached",
            AnalysisStatus::Live => "live",
            AnalysisStatus::Error => "error",
            AnalysisStatus::None => "none",
        }
    }
}

impl From<AnalysisSource> for AnalysisStatus {
    fn from(source: AnalysisSource) -> Self {
        match source {
            AnalysisSource::Cached => AnalysisStatus::Cached,
            AnalysisSource::Live => AnalysisStatus::Live,
        }
    }
}

/// Analysis state of one visit as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitAnalysis {
    pub status: AnalysisStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PredictionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl VisitAnalysis {
    fn none() -> Self {
        Self {
            status: AnalysisStatus::None,
            result: None,
            summary: None,
            warning: None,
        }
    }

    fn completed(outcome: AnalysisOutcome) -> Self {
        Self {
            status: outcome.source.into(),
            summary: Some(outcome.display_summary()),
            result: Some(outcome.result),
            warning: None,
        }
    }

    fn failed(error: &EcgError) -> Self {
        Self {
            status: AnalysisStatus::Error,
            result: None,
            summary: None,
            warning: Some(error.to_string()),
        }
    }
}

/// Client view of a visit. File locations stay server-side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitSummary {
    pub id: Uuid,
    pub patient_name: String,
    pub notes: Option<String>,
    pub ecg_record: Option<String>,
    pub analyzed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<&Visit> for VisitSummary {
    fn from(visit: &Visit) -> Self {
        Self {
            id: visit.id,
            patient_name: visit.patient_name.clone(),
            notes: visit.notes.clone(),
            ecg_record: visit.ecg.as_ref().and_then(|f| {
                f.header_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
            }),
            analyzed_at: visit.analyzed_at,
            created_at: visit.created_at,
            updated_at: visit.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitReport {
    pub visit: VisitSummary,
    pub analysis: VisitAnalysis,
}

// ═══════════════════════════════════════════════════════════
// Workflows
// ═══════════════════════════════════════════════════════════

pub fn list_visits(core: &CoreState) -> Result<Vec<VisitSummary>, VisitError> {
    let conn = core.open_db()?;
    Ok(db::list_visits(&conn)?.iter().map(VisitSummary::from).collect())
}

/// Create a visit, store its ECG pair (if any) and analyze it.
///
/// Analysis failure does not fail the request: the visit is saved and the
/// failure is reported as a warning.
pub async fn create_visit(
    core: &CoreState,
    new: NewVisit,
    upload: Option<EcgUpload>,
) -> Result<VisitReport, VisitError> {
    let patient_name = new.patient_name.trim().to_string();
    if patient_name.is_empty() {
        return Err(VisitError::Invalid("patient name is required".into()));
    }
    let notes = new.notes.filter(|n| !n.trim().is_empty());

    let mut visit = Visit::new(patient_name, notes);
    if let Some(upload) = &upload {
        visit.ecg = Some(upload.store(&core.ecg_files_dir())?);
    }

    if let Err(e) = insert(core, &visit) {
        if let Some(files) = &visit.ecg {
            remove_upload(core, files);
        }
        return Err(e);
    }
    tracing::info!(visit = %visit.id, has_ecg = visit.has_ecg(), "Visit created");

    let analysis = match visit.ecg.clone() {
        Some(files) => analyze_and_store(core, &mut visit, &files).await,
        None => VisitAnalysis::none(),
    };

    Ok(VisitReport {
        visit: VisitSummary::from(&visit),
        analysis,
    })
}

/// Replace a visit's ECG pair, dropping the stale prediction, and re-analyze.
pub async fn replace_visit_ecg(
    core: &CoreState,
    id: Uuid,
    upload: EcgUpload,
) -> Result<VisitReport, VisitError> {
    let previous = load(core, id)?;

    let files = upload.store(&core.ecg_files_dir())?;
    let updated = {
        let conn = core.open_db()?;
        db::update_visit_ecg(&conn, &id, &files).and_then(|_| db::require_visit(&conn, &id))
    };
    let mut visit = match updated {
        Ok(visit) => visit,
        Err(e) => {
            remove_upload(core, &files);
            return Err(e.into());
        }
    };
    if let Some(old) = &previous.ecg {
        remove_upload(core, old);
    }
    tracing::info!(visit = %id, "Visit ECG replaced");

    let analysis = analyze_and_store(core, &mut visit, &files).await;
    Ok(VisitReport {
        visit: VisitSummary::from(&visit),
        analysis,
    })
}

/// Visit with its analysis: the stored prediction when complete, otherwise a
/// live run whose result is written back.
pub async fn visit_report(core: &CoreState, id: Uuid) -> Result<VisitReport, VisitError> {
    let mut visit = load(core, id)?;
    let analysis = cached_analysis(core, &mut visit).await;
    Ok(VisitReport {
        visit: VisitSummary::from(&visit),
        analysis,
    })
}

/// Forced live analysis. Errors propagate to the caller.
pub async fn reanalyze_visit(core: &CoreState, id: Uuid) -> Result<VisitReport, VisitError> {
    let mut visit = load(core, id)?;
    let files = visit.ecg.clone().ok_or(VisitError::NoEcg(id))?;

    let result = core
        .ecg
        .analyze(files.header_path.clone(), files.signal_path.clone())
        .await?;
    store_prediction(core, &mut visit, &result)?;
    tracing::info!(visit = %id, primary = result.primary_abbreviation(), "Visit re-analyzed");

    Ok(VisitReport {
        visit: VisitSummary::from(&visit),
        analysis: VisitAnalysis::completed(AnalysisOutcome::live(result)),
    })
}

pub async fn visit_waveform(
    core: &CoreState,
    id: Uuid,
    selection: WaveformSelection,
) -> Result<WaveformPreview, VisitError> {
    let visit = load(core, id)?;
    let files = visit.ecg.ok_or(VisitError::NoEcg(id))?;
    Ok(core
        .ecg
        .waveform(files.header_path, files.signal_path, selection)
        .await?)
}

pub const CSV_HEADER_PREFIX: &[&str] = &[
    "visit_id",
    "patient_name",
    "created_at",
    "primary_abbreviation",
    "primary_name",
    "primary_probability",
];

/// One CSV row per visit, newest first.
pub async fn export_csv(core: &CoreState) -> Result<String, VisitError> {
    let visits = {
        let conn = core.open_db()?;
        db::list_visits(&conn)?
    };

    let mut out = String::new();
    let header: Vec<&str> = CSV_HEADER_PREFIX
        .iter()
        .copied()
        .chain(CLASS_ABBREVIATIONS)
        .chain(["source", "error"])
        .collect();
    out.push_str(&header.join(","));
    out.push('\n');

    for mut visit in visits {
        let analysis = cached_analysis(core, &mut visit).await;
        write_csv_row(&mut out, &visit, &analysis);
    }
    Ok(out)
}

fn write_csv_row(out: &mut String, visit: &Visit, analysis: &VisitAnalysis) {
    let mut fields: Vec<String> = vec![
        visit.id.to_string(),
        csv_field(&visit.patient_name),
        visit.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    ];

    match &analysis.result {
        Some(result) => {
            fields.push(result.primary_abbreviation().to_string());
            fields.push(csv_field(result.primary_name()));
            fields.push(format!("{:.6}", result.primary_probability()));
            fields.extend(result.probabilities.iter().map(|(_, p)| format!("{p:.6}")));
        }
        None => fields.extend(std::iter::repeat(String::new()).take(3 + CLASS_ABBREVIATIONS.len())),
    }

    fields.push(analysis.status.as_str().to_string());
    fields.push(csv_field(analysis.warning.as_deref().unwrap_or("")));

    // Writing to a String cannot fail
    let _ = writeln!(out, "{}", fields.join(","));
}

/// Quote a field when it holds a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// ═══════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════

fn load(core: &CoreState, id: Uuid) -> Result<Visit, VisitError> {
    let conn = core.open_db()?;
    db::get_visit(&conn, &id)?.ok_or(VisitError::NotFound(id))
}

fn insert(core: &CoreState, visit: &Visit) -> Result<(), VisitError> {
    let conn = core.open_db()?;
    db::insert_visit(&conn, visit)?;
    Ok(())
}

fn store_prediction(
    core: &CoreState,
    visit: &mut Visit,
    result: &PredictionResult,
) -> Result<(), VisitError> {
    let stored = result.to_stored();
    let analyzed_at = {
        let conn = core.open_db()?;
        db::set_visit_prediction(&conn, &visit.id, &stored)?
    };
    visit.ecg_prediction = Some(stored);
    visit.analyzed_at = Some(analyzed_at);
    visit.updated_at = analyzed_at;
    Ok(())
}

/// Live analysis of freshly stored files. Failures become a warning.
async fn analyze_and_store(core: &CoreState, visit: &mut Visit, files: &EcgFiles) -> VisitAnalysis {
    let outcome = core
        .ecg
        .analyze(files.header_path.clone(), files.signal_path.clone())
        .await;
    match outcome {
        Ok(result) => match store_prediction(core, visit, &result) {
            Ok(()) => VisitAnalysis::completed(AnalysisOutcome::live(result)),
            Err(e) => {
                tracing::error!(visit = %visit.id, error = %e, "Failed to store ECG prediction");
                let mut analysis = VisitAnalysis::completed(AnalysisOutcome::live(result));
                analysis.warning = Some("analysis result could not be saved".into());
                analysis
            }
        },
        Err(e) => {
            tracing::warn!(visit = %visit.id, error = %e, "ECG analysis failed; visit saved without prediction");
            VisitAnalysis::failed(&e)
        }
    }
}

/// Cached-or-live analysis for display. Live results are written back.
async fn cached_analysis(core: &CoreState, visit: &mut Visit) -> VisitAnalysis {
    let Some(files) = visit.ecg.clone() else {
        return VisitAnalysis::none();
    };

    let outcome = core
        .ecg
        .analyze_cached(visit.ecg_prediction.as_ref(), files.header_path, files.signal_path)
        .await;

    match outcome {
        Ok(outcome) => {
            if outcome.source == AnalysisSource::Live {
                if let Err(e) = store_prediction(core, visit, &outcome.result) {
                    tracing::warn!(visit = %visit.id, error = %e, "Could not cache live ECG result");
                }
            }
            VisitAnalysis::completed(outcome)
        }
        Err(e) => {
            tracing::warn!(visit = %visit.id, error = %e, "ECG analysis failed");
            VisitAnalysis::failed(&e)
        }
    }
}

/// Best-effort removal of an upload directory under the ECG files root.
fn remove_upload(core: &CoreState, files: &EcgFiles) {
    let Some(dir) = intake::upload_dir(files) else {
        return;
    };
    if !is_within(&dir, &core.ecg_files_dir()) {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(&dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove ECG upload directory");
    }
}

fn is_within(dir: &Path, root: &Path) -> bool {
    dir != root && dir.starts_with(root)
}
