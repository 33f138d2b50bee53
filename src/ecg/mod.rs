//! ECG record analysis: WFDB record reading, fixed-window normalization,
//! multi-label classifier inference and result shaping.
//!
//! Every caller (visit create/edit, ad-hoc upload, cached re-display,
//! CSV export, waveform preview) goes through [`pipeline::EcgAnalysisPipeline`].

pub mod classifier;
pub mod header;
pub mod mapper;
pub mod normalize;
pub mod pipeline;
pub mod record;
pub mod service;
pub mod taxonomy;
pub mod waveform;

#[cfg(test)]
pub(crate) mod test_support;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use classifier::{EcgClassifier, InferenceAdapter, MockClassifier};
pub use mapper::{PredictionResult, Probabilities, StoredPrediction};
pub use normalize::NormalizedTensor;
pub use pipeline::{AnalysisOutcome, AnalysisSource, EcgAnalysisPipeline};
pub use record::WaveformRecord;
pub use service::EcgService;

/// Time-axis length every record is clipped or padded to before inference.
pub const FIXED_LENGTH: usize = 15_000;

/// Lead count the classifier was trained on.
pub const EXPECTED_LEADS: usize = 12;

#[derive(Error, Debug)]
pub enum EcgError {
    #[error("could not read ECG record {}: {reason}", path.display())]
    RecordFormat {
        path: PathBuf,
        reason: RecordFormatReason,
    },

    #[error("ECG record {record} has {actual} leads, model expects {expected}")]
    ChannelCountMismatch {
        record: String,
        expected: usize,
        actual: usize,
    },

    #[error("ECG analysis model not available: {0}")]
    ModelUnavailable(String),

    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    Shape {
        context: &'static str,
        expected: String,
        actual: String,
    },

    #[error("ECG inference failed: {0}")]
    Inference(String),

    #[error("unknown lead '{lead}' (record has: {})", available.join(", "))]
    UnknownLead {
        lead: String,
        available: Vec<String>,
    },
}

impl EcgError {
    pub(crate) fn record(path: impl Into<PathBuf>, reason: RecordFormatReason) -> Self {
        EcgError::RecordFormat {
            path: path.into(),
            reason,
        }
    }

    /// True when the failure is a missing record file (as opposed to a malformed one).
    pub fn is_missing_file(&self) -> bool {
        matches!(
            self,
            EcgError::RecordFormat {
                reason: RecordFormatReason::MissingFile,
                ..
            }
        )
    }
}

/// Why a record could not be read.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordFormatReason {
    #[error("file not found")]
    MissingFile,

    #[error("invalid header: {0}")]
    Header(String),

    #[error("unsupported storage format {0}")]
    UnsupportedFormat(String),

    #[error("signal data truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: u64, actual: u64 },

    #[error("header declares signal file '{declared}', got '{supplied}'")]
    CompanionMismatch { declared: String, supplied: String },

    #[error("record contains no samples")]
    Empty,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("read timed out after {0:?}")]
    Timeout(Duration),
}

impl From<&std::io::Error> for RecordFormatReason {
    fn from(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => RecordFormatReason::MissingFile,
            _ => RecordFormatReason::Io(err.to_string()),
        }
    }
}
