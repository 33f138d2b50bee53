use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ecg::StoredPrediction;

/// On-disk locations of a visit's ECG record pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcgFiles {
    pub header_path: PathBuf,
    pub signal_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub id: Uuid,
    pub patient_name: String,
    pub notes: Option<String>,
    pub ecg: Option<EcgFiles>,
    /// Last successful prediction, stored as a flat abbreviation → probability map.
    pub ecg_prediction: Option<StoredPrediction>,
    pub analyzed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Visit {
    pub fn new(patient_name: impl Into<String>, notes: Option<String>) -> Self {
        let now = chrono::Local::now().naive_local();
        Self {
            id: Uuid::new_v4(),
            patient_name: patient_name.into(),
            notes,
            ecg: None,
            ecg_prediction: None,
            analyzed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_ecg(&self) -> bool {
        self.ecg.is_some()
    }
}
