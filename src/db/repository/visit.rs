use std::path::PathBuf;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::ecg::StoredPrediction;
use crate::models::{EcgFiles, Visit};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const VISIT_COLUMNS: &str = "id, patient_name, notes, ecg_signal_path, ecg_header_path,
     ecg_prediction, analyzed_at, created_at, updated_at";

pub fn insert_visit(conn: &Connection, visit: &Visit) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO visits (id, patient_name, notes, ecg_signal_path, ecg_header_path,
         ecg_prediction, analyzed_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            visit.id.to_string(),
            visit.patient_name,
            visit.notes,
            visit.ecg.as_ref().map(|f| path_text(&f.signal_path)),
            visit.ecg.as_ref().map(|f| path_text(&f.header_path)),
            visit.ecg_prediction.as_ref().map(prediction_json).transpose()?,
            visit.analyzed_at.map(format_timestamp),
            format_timestamp(visit.created_at),
            format_timestamp(visit.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_visit(conn: &Connection, id: &Uuid) -> Result<Option<Visit>, DatabaseError> {
    let mut stmt = conn.prepare(&format!("SELECT {VISIT_COLUMNS} FROM visits WHERE id = ?1"))?;

    let result = stmt.query_row(params![id.to_string()], read_row);

    match result {
        Ok(row) => Ok(Some(visit_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Like [`get_visit`], but a missing visit is `NotFound`.
pub fn require_visit(conn: &Connection, id: &Uuid) -> Result<Visit, DatabaseError> {
    get_visit(conn, id)?.ok_or_else(|| not_found(id))
}

/// All visits, newest first.
pub fn list_visits(conn: &Connection) -> Result<Vec<Visit>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {VISIT_COLUMNS} FROM visits ORDER BY created_at DESC, id"
    ))?;

    let rows = stmt.query_map([], read_row)?;

    let mut visits = Vec::new();
    for row in rows {
        visits.push(visit_from_row(row?)?);
    }
    Ok(visits)
}

/// Point a visit at a new ECG pair. Any stored prediction belongs to the old
/// pair and is cleared in the same statement.
pub fn update_visit_ecg(conn: &Connection, id: &Uuid, files: &EcgFiles) -> Result<(), DatabaseError> {
    let rows = conn.execute(
        "UPDATE visits SET ecg_signal_path = ?2, ecg_header_path = ?3,
         ecg_prediction = NULL, analyzed_at = NULL, updated_at = ?4
         WHERE id = ?1",
        params![
            id.to_string(),
            path_text(&files.signal_path),
            path_text(&files.header_path),
            format_timestamp(now()),
        ],
    )?;
    if rows == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

/// Persist a completed prediction for the visit's current ECG pair.
pub fn set_visit_prediction(
    conn: &Connection,
    id: &Uuid,
    prediction: &StoredPrediction,
) -> Result<NaiveDateTime, DatabaseError> {
    let analyzed_at = now();
    let rows = conn.execute(
        "UPDATE visits SET ecg_prediction = ?2, analyzed_at = ?3, updated_at = ?3
         WHERE id = ?1 AND ecg_header_path IS NOT NULL",
        params![
            id.to_string(),
            prediction_json(prediction)?,
            format_timestamp(analyzed_at),
        ],
    )?;
    if rows == 0 {
        return Err(match get_visit(conn, id)? {
            Some(_) => DatabaseError::ConstraintViolation(format!(
                "visit {id} has no ECG record to attach a prediction to"
            )),
            None => not_found(id),
        });
    }
    Ok(analyzed_at)
}

// Internal row type for Visit mapping
struct VisitRow {
    id: String,
    patient_name: String,
    notes: Option<String>,
    ecg_signal_path: Option<String>,
    ecg_header_path: Option<String>,
    ecg_prediction: Option<String>,
    analyzed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<VisitRow> {
    Ok(VisitRow {
        id: row.get::<_, String>(0)?,
        patient_name: row.get::<_, String>(1)?,
        notes: row.get::<_, Option<String>>(2)?,
        ecg_signal_path: row.get::<_, Option<String>>(3)?,
        ecg_header_path: row.get::<_, Option<String>>(4)?,
        ecg_prediction: row.get::<_, Option<String>>(5)?,
        analyzed_at: row.get::<_, Option<String>>(6)?,
        created_at: row.get::<_, String>(7)?,
        updated_at: row.get::<_, String>(8)?,
    })
}

fn visit_from_row(row: VisitRow) -> Result<Visit, DatabaseError> {
    let ecg = match (row.ecg_header_path, row.ecg_signal_path) {
        (Some(header), Some(signal)) => Some(EcgFiles {
            header_path: PathBuf::from(header),
            signal_path: PathBuf::from(signal),
        }),
        _ => None,
    };

    // An unreadable prediction is treated as absent; the next analysis recomputes it.
    let ecg_prediction = row.ecg_prediction.and_then(|json| {
        serde_json::from_str::<StoredPrediction>(&json)
            .map_err(|e| tracing::warn!(visit = %row.id, error = %e, "Discarding unreadable stored prediction"))
            .ok()
    });

    Ok(Visit {
        id: Uuid::parse_str(&row.id).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        patient_name: row.patient_name,
        notes: row.notes,
        ecg,
        ecg_prediction,
        analyzed_at: row.analyzed_at.as_deref().and_then(parse_timestamp),
        created_at: parse_timestamp(&row.created_at).unwrap_or_default(),
        updated_at: parse_timestamp(&row.updated_at).unwrap_or_default(),
    })
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

fn path_text(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

fn prediction_json(prediction: &StoredPrediction) -> Result<String, DatabaseError> {
    serde_json::to_string(prediction).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

fn not_found(id: &Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity_type: "Visit".into(),
        id: id.to_string(),
    }
}
