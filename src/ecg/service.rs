//! Async front of the pipeline for request handlers.
//!
//! Record reads run on the blocking pool under a timeout; normalization,
//! inference and preview shaping run there without one (they are CPU-bound
//! and always terminate).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::mapper::{PredictionResult, StoredPrediction};
use super::pipeline::{cached_result, AnalysisOutcome, AnalysisSource, EcgAnalysisPipeline};
use super::record::WaveformRecord;
use super::waveform::{self, WaveformPreview, WaveformSelection};
use super::{EcgError, RecordFormatReason};

#[derive(Clone)]
pub struct EcgService {
    pipeline: Arc<EcgAnalysisPipeline>,
    read_timeout: Duration,
}

impl EcgService {
    pub fn new(pipeline: EcgAnalysisPipeline, read_timeout: Duration) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            read_timeout,
        }
    }

    pub fn pipeline(&self) -> &EcgAnalysisPipeline {
        &self.pipeline
    }

    pub fn is_available(&self) -> bool {
        self.pipeline.is_available()
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.pipeline.adapter().backend_name()
    }

    /// Load a record, failing with `RecordFormat(Timeout)` if the read stalls.
    pub async fn read(&self, header: PathBuf, signal: PathBuf) -> Result<WaveformRecord, EcgError> {
        let pipeline = self.pipeline.clone();
        let signal_for_error = signal.clone();
        let task = tokio::task::spawn_blocking(move || pipeline.read(&header, &signal));

        match tokio::time::timeout(self.read_timeout, task).await {
            Ok(joined) => joined.map_err(join_error)?,
            Err(_) => {
                tracing::warn!(
                    path = %signal_for_error.display(),
                    timeout_ms = self.read_timeout.as_millis() as u64,
                    "ECG record read timed out"
                );
                Err(EcgError::record(
                    signal_for_error,
                    RecordFormatReason::Timeout(self.read_timeout),
                ))
            }
        }
    }

    pub async fn analyze(&self, header: PathBuf, signal: PathBuf) -> Result<PredictionResult, EcgError> {
        let record = self.read(header, signal).await?;
        let pipeline = self.pipeline.clone();
        tokio::task::spawn_blocking(move || pipeline.analyze_record(&record))
            .await
            .map_err(join_error)?
    }

    pub async fn analyze_cached(
        &self,
        stored: Option<&StoredPrediction>,
        header: PathBuf,
        signal: PathBuf,
    ) -> Result<AnalysisOutcome, EcgError> {
        if let Some(result) = cached_result(stored) {
            return Ok(AnalysisOutcome {
                result,
                source: AnalysisSource::Cached,
            });
        }
        self.analyze(header, signal).await.map(AnalysisOutcome::live)
    }

    pub async fn waveform(
        &self,
        header: PathBuf,
        signal: PathBuf,
        selection: WaveformSelection,
    ) -> Result<WaveformPreview, EcgError> {
        let record = self.read(header, signal).await?;
        tokio::task::spawn_blocking(move || waveform::preview(&record, &selection))
            .await
            .map_err(join_error)?
    }
}

fn join_error(e: tokio::task::JoinError) -> EcgError {
    tracing::error!(error = %e, "ECG worker task failed");
    EcgError::Inference(format!("worker task failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecg::classifier::{InferenceAdapter, MockClassifier};
    use crate::ecg::mapper;
    use crate::ecg::taxonomy::NUM_CLASSES;
    use crate::ecg::test_support::{write_record, RecordSpec};

    fn service(mock: Arc<MockClassifier>) -> EcgService {
        let pipeline = EcgAnalysisPipeline::new(Arc::new(InferenceAdapter::new(mock)));
        EcgService::new(pipeline, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn analyze_matches_synchronous_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let (hea, sig) = write_record(dir.path(), &RecordSpec::twelve_lead("S1", 2_000), |r, _| {
            (r % 7) as i16
        });
        let mock = Arc::new(MockClassifier::new(vec![0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]));
        let svc = service(mock.clone());

        let async_result = svc.analyze(hea.clone(), sig.clone()).await.unwrap();
        let sync_result = svc.pipeline().analyze(&hea, &sig).unwrap();
        assert_eq!(async_result, sync_result);
        assert_eq!(async_result.primary_abbreviation(), "IAVB");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn cached_path_skips_inference() {
        let mock = Arc::new(MockClassifier::new(vec![0.0; NUM_CLASSES]));
        let svc = service(mock.clone());
        let stored = mapper::map(&[1.0; NUM_CLASSES]).unwrap().to_stored();
        let outcome = svc
            .analyze_cached(Some(&stored), "/x/a.hea".into(), "/x/a.mat".into())
            .await
            .unwrap();
        assert_eq!(outcome.source, AnalysisSource::Cached);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_record_is_a_missing_file_error() {
        let svc = service(Arc::new(MockClassifier::new(vec![0.0; NUM_CLASSES])));
        let err = svc
            .analyze("/nope/a.hea".into(), "/nope/a.mat".into())
            .await
            .unwrap_err();
        assert!(err.is_missing_file());
    }

    /// Replace a record's signal file with a FIFO so reading it blocks until a writer appears.
    #[cfg(unix)]
    fn block_signal_file(signal: &std::path::Path) {
        std::fs::remove_file(signal).unwrap();
        let status = std::process::Command::new("mkfifo").arg(signal).status().unwrap();
        assert!(status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stalled_read_times_out_as_record_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let (hea, sig) = write_record(dir.path(), &RecordSpec::twelve_lead("S3", 10), |_, _| 0);
        block_signal_file(&sig);

        let mock = Arc::new(MockClassifier::new(vec![0.0; NUM_CLASSES]));
        let pipeline = EcgAnalysisPipeline::new(Arc::new(InferenceAdapter::new(mock.clone())));
        let svc = EcgService::new(pipeline, Duration::from_millis(100));

        let err = svc.analyze(hea, sig.clone()).await.unwrap_err();
        match &err {
            EcgError::RecordFormat {
                path,
                reason: RecordFormatReason::Timeout(after),
            } => {
                assert_eq!(path, &sig);
                assert_eq!(*after, Duration::from_millis(100));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.to_string().contains("100ms"), "{err}");
        assert_eq!(mock.call_count(), 0);

        // Release the stalled reader so the blocking pool can shut down
        drop(std::fs::OpenOptions::new().write(true).open(&sig).unwrap());
    }

    #[tokio::test]
    async fn waveform_honours_selection() {
        let dir = tempfile::tempdir().unwrap();
        let (hea, sig) = write_record(dir.path(), &RecordSpec::twelve_lead("S2", 30), |_, _| 250);
        let svc = service(Arc::new(MockClassifier::new(vec![0.0; NUM_CLASSES])));
        let preview = svc
            .waveform(hea, sig, WaveformSelection::from_query(Some("II,V6"), Some(10)))
            .await
            .unwrap();
        assert_eq!(preview.traces.len(), 2);
        assert_eq!(preview.time.len(), 10);
        assert_eq!(preview.traces[0].values[0], 0.25);
    }
}
