//! Fixed-window normalization of a record into the classifier input layout.
//!
//! Records longer than [`FIXED_LENGTH`] keep their most recent samples;
//! shorter records are right-aligned in a zero buffer. The result is
//! transposed to `[leads, FIXED_LENGTH]` and cast to f32. No filtering
//! or unit conversion happens here.

use ndarray::{s, Array2, ArrayView2};

use super::record::WaveformRecord;
use super::{EcgError, EXPECTED_LEADS, FIXED_LENGTH};

/// Classifier input for one record, shape `[leads, FIXED_LENGTH]`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTensor {
    data: Array2<f32>,
}

impl NormalizedTensor {
    /// Wrap an existing `[leads, time]` array. Shape is checked by the adapter.
    pub fn from_array(data: Array2<f32>) -> Self {
        Self { data }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    pub fn into_inner(self) -> Array2<f32> {
        self.data
    }
}

/// Clip/pad a record into a [`NormalizedTensor`].
///
/// Fails with [`EcgError::ChannelCountMismatch`] unless the record has
/// exactly [`EXPECTED_LEADS`] leads.
pub fn normalize(record: &WaveformRecord) -> Result<NormalizedTensor, EcgError> {
    let leads = record.num_leads();
    if leads != EXPECTED_LEADS {
        return Err(EcgError::ChannelCountMismatch {
            record: record.record_name.clone(),
            expected: EXPECTED_LEADS,
            actual: leads,
        });
    }
    Ok(NormalizedTensor {
        data: fit_window(record.samples.view()),
    })
}

/// `[N, C]` → `[C, FIXED_LENGTH]`, last-window clip or leading zero pad.
fn fit_window(samples: ArrayView2<'_, f64>) -> Array2<f32> {
    let (n, c) = samples.dim();
    let mut window = Array2::<f64>::zeros((FIXED_LENGTH, c));

    if n >= FIXED_LENGTH {
        window.assign(&samples.slice(s![n - FIXED_LENGTH.., ..]));
    } else {
        window.slice_mut(s![FIXED_LENGTH - n.., ..]).assign(&samples);
    }

    window.t().as_standard_layout().mapv(|v| v as f32)
}
