//! Classifier runtimes behind one call contract.
//!
//! [`InferenceAdapter`] owns the (optional) loaded classifier for the whole
//! process. It is the only place that decides whether analysis is possible.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::{ArrayView3, Axis};

use super::normalize::NormalizedTensor;
use super::taxonomy::NUM_CLASSES;
use super::{EcgError, EXPECTED_LEADS, FIXED_LENGTH};
use crate::config::ModelConfig;

/// One forward pass of a fixed-architecture multi-label classifier.
///
/// Implementations receive a `[1, 12, FIXED_LENGTH]` batch and return raw logits.
pub trait EcgClassifier: Send + Sync {
    fn forward(&self, batch: ArrayView3<'_, f32>) -> Result<Vec<f32>, EcgError>;

    /// Runtime name for logs and health output.
    fn backend_name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════
// InferenceAdapter
// ═══════════════════════════════════════════════════════════

/// Process-wide classifier handle. Immutable after construction.
pub struct InferenceAdapter {
    classifier: Option<Arc<dyn EcgClassifier>>,
    unavailable_reason: String,
}

impl InferenceAdapter {
    pub fn new(classifier: Arc<dyn EcgClassifier>) -> Self {
        Self {
            classifier: Some(classifier),
            unavailable_reason: String::new(),
        }
    }

    /// An adapter with no model. Every `predict` fails with `ModelUnavailable`.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            classifier: None,
            unavailable_reason: reason.into(),
        }
    }

    /// Load the configured model. A load failure yields an unavailable adapter.
    pub fn load(config: &ModelConfig) -> Self {
        match load_classifier(config) {
            Ok(classifier) => {
                tracing::info!(
                    backend = classifier.backend_name(),
                    model = %config.model_path.display(),
                    "ECG classifier loaded"
                );
                Self::new(classifier)
            }
            Err(e) => {
                tracing::warn!(
                    model = %config.model_path.display(),
                    error = %e,
                    "ECG classifier not loaded; analysis disabled"
                );
                Self::unavailable(e.to_string())
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.classifier.as_ref().map(|c| c.backend_name())
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        if self.classifier.is_some() {
            None
        } else {
            Some(&self.unavailable_reason)
        }
    }

    /// Run the classifier on a `[12, FIXED_LENGTH]` tensor and return raw logits.
    pub fn predict(&self, tensor: &NormalizedTensor) -> Result<[f32; NUM_CLASSES], EcgError> {
        let classifier = self
            .classifier
            .as_ref()
            .ok_or_else(|| EcgError::ModelUnavailable(self.unavailable_reason.clone()))?;

        let shape = tensor.shape();
        if shape != (EXPECTED_LEADS, FIXED_LENGTH) {
            return Err(EcgError::Shape {
                context: "classifier input",
                expected: format!("[{EXPECTED_LEADS}, {FIXED_LENGTH}]"),
                actual: format!("[{}, {}]", shape.0, shape.1),
            });
        }

        let batch = tensor.view().insert_axis(Axis(0));
        let output = classifier.forward(batch)?;

        <[f32; NUM_CLASSES]>::try_from(output.as_slice()).map_err(|_| EcgError::Shape {
            context: "classifier output",
            expected: format!("[{NUM_CLASSES}]"),
            actual: format!("[{}]", output.len()),
        })
    }
}

/// Build the ONNX Runtime classifier. A missing model file or a build without
/// the runtime both surface as `ModelUnavailable`.
pub fn load_classifier(config: &ModelConfig) -> Result<Arc<dyn EcgClassifier>, EcgError> {
    if !config.model_path.exists() {
        return Err(EcgError::ModelUnavailable(format!(
            "model file not found at {}",
            config.model_path.display()
        )));
    }
    if config.device_is_gpu() {
        tracing::warn!("GPU inference requested; running the ECG classifier on CPU");
    }
    load_ort(&config.model_path)
}

#[cfg(feature = "onnx-runtime")]
fn load_ort(path: &Path) -> Result<Arc<dyn EcgClassifier>, EcgError> {
    Ok(Arc::new(OrtClassifier::load(path)?))
}

#[cfg(not(feature = "onnx-runtime"))]
fn load_ort(_path: &Path) -> Result<Arc<dyn EcgClassifier>, EcgError> {
    Err(EcgError::ModelUnavailable(
        "built without the onnx-runtime feature".into(),
    ))
}

// ═══════════════════════════════════════════════════════════
// ONNX Runtime backend: behind `onnx-runtime` feature
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx-runtime")]
mod onnx {
    use super::{EcgClassifier, EcgError};
    use ndarray::ArrayView3;
    use ort::session::Session;
    use std::path::Path;
    use std::sync::Mutex;

    /// Exported classifier graph executed by ONNX Runtime.
    ///
    /// `Session::run` takes `&mut self`, so calls are serialized through a Mutex.
    pub struct OrtClassifier {
        session: Mutex<Session>,
    }

    impl OrtClassifier {
        pub fn load(model_path: &Path) -> Result<Self, EcgError> {
            let session = Session::builder()
                .map_err(|e: ort::Error| EcgError::ModelUnavailable(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| EcgError::ModelUnavailable(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e: ort::Error| {
                    EcgError::ModelUnavailable(format!("ONNX load failed: {e}"))
                })?;

            Ok(Self {
                session: Mutex::new(session),
            })
        }
    }

    impl EcgClassifier for OrtClassifier {
        fn forward(&self, batch: ArrayView3<'_, f32>) -> Result<Vec<f32>, EcgError> {
            use ort::value::TensorRef;

            let input = batch.as_standard_layout().into_owned();
            let input_tensor = TensorRef::from_array_view(&input)
                .map_err(|e| EcgError::Inference(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| EcgError::Inference("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![input_tensor])
                .map_err(|e| EcgError::Inference(format!("ONNX inference failed: {e}")))?;

            // Output shape: [1, NUM_CLASSES]
            let (_shape, logits) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| EcgError::Inference(format!("Output extraction: {e}")))?;

            Ok(logits.to_vec())
        }

        fn backend_name(&self) -> &'static str {
            "ort"
        }
    }
}

#[cfg(feature = "onnx-runtime")]
pub use onnx::OrtClassifier;

// ═══════════════════════════════════════════════════════════
// Mock
// ═══════════════════════════════════════════════════════════

/// Test double: returns fixed logits and counts calls.
pub struct MockClassifier {
    logits: Vec<f32>,
    calls: AtomicUsize,
}

impl MockClassifier {
    pub fn new(logits: Vec<f32>) -> Self {
        Self {
            logits,
            calls: AtomicUsize::new(0),
        }
    }

    /// Logits whose sigmoid is exactly `probabilities` (clamped away from 0 and 1).
    pub fn from_probabilities(probabilities: &[f64]) -> Self {
        Self::new(
            probabilities
                .iter()
                .map(|&p| {
                    let p = p.clamp(1e-6, 1.0 - 1e-6);
                    (p / (1.0 - p)).ln() as f32
                })
                .collect(),
        )
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EcgClassifier for MockClassifier {
    fn forward(&self, batch: ArrayView3<'_, f32>) -> Result<Vec<f32>, EcgError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug_assert_eq!(batch.shape(), &[1, EXPECTED_LEADS, FIXED_LENGTH]);
        Ok(self.logits.clone())
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }
}
