//! The single analysis entry point: read → normalize → infer → map.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use super::classifier::InferenceAdapter;
use super::mapper::{self, PredictionResult, StoredPrediction};
use super::normalize::normalize;
use super::record::{WaveformRecord, WaveformRecordReader};
use super::waveform::{self, WaveformPreview, WaveformSelection};
use super::EcgError;

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Cached,
    Live,
}

impl AnalysisSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisSource::Cached => "cached",
            AnalysisSource::Live => "live",
        }
    }

    fn summary_suffix(&self) -> &'static str {
        match self {
            AnalysisSource::Cached => " (cached)",
            AnalysisSource::Live => " (live analysis)",
        }
    }
}

/// A prediction tagged with its source.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub result: PredictionResult,
    pub source: AnalysisSource,
}

impl AnalysisOutcome {
    pub fn live(result: PredictionResult) -> Self {
        Self {
            result,
            source: AnalysisSource::Live,
        }
    }

    /// Summary with the source suffix, for display.
    pub fn display_summary(&self) -> String {
        format!("{}{}", self.result.summary, self.source.summary_suffix())
    }
}

/// Composes reader, normalizer, classifier adapter and mapper.
///
/// Cheap to share: the reader is stateless and the adapter is behind an `Arc`.
#[derive(Clone)]
pub struct EcgAnalysisPipeline {
    reader: WaveformRecordReader,
    adapter: Arc<InferenceAdapter>,
}

impl EcgAnalysisPipeline {
    pub fn new(adapter: Arc<InferenceAdapter>) -> Self {
        Self {
            reader: WaveformRecordReader::new(),
            adapter,
        }
    }

    pub fn adapter(&self) -> &InferenceAdapter {
        &self.adapter
    }

    pub fn is_available(&self) -> bool {
        self.adapter.is_available()
    }

    pub fn read(&self, header_path: &Path, signal_path: &Path) -> Result<WaveformRecord, EcgError> {
        self.reader.read(header_path, signal_path)
    }

    /// Normalize, infer and map an already loaded record.
    pub fn analyze_record(&self, record: &WaveformRecord) -> Result<PredictionResult, EcgError> {
        let tensor = normalize(record)?;
        let logits = self.adapter.predict(&tensor)?;
        let result = mapper::map(&logits)?;

        tracing::debug!(
            record = %record.record_name,
            primary = result.primary_abbreviation(),
            probability = result.primary_probability(),
            "ECG analysis complete"
        );
        Ok(result)
    }

    pub fn analyze(&self, header_path: &Path, signal_path: &Path) -> Result<PredictionResult, EcgError> {
        let record = self.read(header_path, signal_path)?;
        self.analyze_record(&record)
    }

    /// Serve a structurally valid stored prediction as-is; otherwise run live.
    pub fn analyze_cached(
        &self,
        stored: Option<&StoredPrediction>,
        header_path: &Path,
        signal_path: &Path,
    ) -> Result<AnalysisOutcome, EcgError> {
        if let Some(result) = cached_result(stored) {
            return Ok(AnalysisOutcome {
                result,
                source: AnalysisSource::Cached,
            });
        }
        self.analyze(header_path, signal_path).map(AnalysisOutcome::live)
    }

    /// Per-lead display traces. Never touches the classifier.
    pub fn waveform(
        &self,
        header_path: &Path,
        signal_path: &Path,
        selection: &WaveformSelection,
    ) -> Result<WaveformPreview, EcgError> {
        let record = self.read(header_path, signal_path)?;
        waveform::preview(&record, selection)
    }
}

/// A stored prediction rebuilt into a result, when it is complete.
pub fn cached_result(stored: Option<&StoredPrediction>) -> Option<PredictionResult> {
    let stored = stored?;
    let result = PredictionResult::from_stored(stored);
    if result.is_none() {
        tracing::debug!(keys = stored.len(), "Stored prediction incomplete, recomputing");
    }
    result
}
