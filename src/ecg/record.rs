//! Waveform record loading: header + signal file pair → `[samples × leads]` matrix.

use std::path::{Path, PathBuf};

use ndarray::Array2;

use super::header::{read_header, RecordHeader, SignalSpec, StorageFormat};
use super::{EcgError, RecordFormatReason};

/// One ECG capture loaded into memory.
///
/// `samples` is `[N, C]` in physical units; column `c` belongs to
/// `channel_names[c]` and is measured in `units[c]`.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformRecord {
    pub record_name: String,
    pub samples: Array2<f64>,
    pub sampling_rate: f64,
    pub channel_names: Vec<String>,
    pub units: Vec<String>,
}

impl WaveformRecord {
    /// Build a record from an in-memory matrix, one name per column.
    pub fn new(
        record_name: impl Into<String>,
        samples: Array2<f64>,
        sampling_rate: f64,
        channel_names: Vec<String>,
    ) -> Self {
        let units = vec![super::header::DEFAULT_UNITS.to_string(); channel_names.len()];
        Self {
            record_name: record_name.into(),
            samples,
            sampling_rate,
            channel_names,
            units,
        }
    }

    pub fn num_samples(&self) -> usize {
        self.samples.nrows()
    }

    pub fn num_leads(&self) -> usize {
        self.samples.ncols()
    }

    pub fn duration_secs(&self) -> f64 {
        self.num_samples() as f64 / self.sampling_rate
    }
}

/// Reads WFDB-style records.
///
/// Stateless; a single instance is shared by the pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct WaveformRecordReader;

impl WaveformRecordReader {
    pub fn new() -> Self {
        Self
    }

    /// Load a record from its header and the signal file the header declares.
    ///
    /// `signal_path` must be the header's companion: same directory, same
    /// file name as the header's signal lines. Records whose signals span
    /// several files are resolved relative to the header's directory.
    pub fn read(&self, header_path: &Path, signal_path: &Path) -> Result<WaveformRecord, EcgError> {
        let header = read_header(header_path)?;
        let record_dir = header_path.parent().unwrap_or_else(|| Path::new(""));

        check_companion(&header, record_dir, signal_path)?;

        let groups = header.signal_groups();
        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); header.signals.len()];
        let mut sample_count: Option<usize> = None;

        for (file_name, members) in groups {
            let data_path = record_dir.join(file_name);
            let specs: Vec<&SignalSpec> = members.iter().map(|&i| &header.signals[i]).collect();
            let decoded = decode_group(&data_path, &specs, header.num_samples)?;

            let group_len = decoded.first().map(Vec::len).unwrap_or(0);
            match sample_count {
                None => sample_count = Some(group_len),
                Some(expected) if expected != group_len => {
                    return Err(EcgError::record(
                        &data_path,
                        RecordFormatReason::Header(format!(
                            "signal files disagree on length: {expected} vs {group_len} samples"
                        )),
                    ));
                }
                Some(_) => {}
            }

            for (signal_idx, column) in members.into_iter().zip(decoded) {
                columns[signal_idx] = column;
            }
        }

        let num_samples = sample_count.unwrap_or(0);
        if num_samples == 0 {
            return Err(EcgError::record(signal_path, RecordFormatReason::Empty));
        }

        let num_leads = columns.len();
        let samples = Array2::from_shape_fn((num_samples, num_leads), |(row, lead)| {
            columns[lead][row]
        });

        tracing::debug!(
            record = %header.record_name,
            samples = num_samples,
            leads = num_leads,
            fs = header.sampling_rate,
            "Loaded ECG record"
        );

        Ok(WaveformRecord {
            record_name: header.record_name,
            samples,
            sampling_rate: header.sampling_rate,
            channel_names: header.signals.iter().map(|s| s.description.clone()).collect(),
            units: header.signals.iter().map(|s| s.units.clone()).collect(),
        })
    }
}

/// Companion signal path for a header, as the header itself declares it.
pub fn declared_signal_path(header_path: &Path) -> Result<PathBuf, EcgError> {
    let header = read_header(header_path)?;
    let record_dir = header_path.parent().unwrap_or_else(|| Path::new(""));
    Ok(record_dir.join(&header.signals[0].file_name))
}

fn check_companion(
    header: &RecordHeader,
    record_dir: &Path,
    signal_path: &Path,
) -> Result<(), EcgError> {
    let supplied = signal_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let declared = header
        .signals
        .iter()
        .any(|s| s.file_name == supplied && same_dir(record_dir, signal_path));

    if declared {
        Ok(())
    } else {
        Err(EcgError::record(
            signal_path,
            RecordFormatReason::CompanionMismatch {
                declared: header.signals[0].file_name.clone(),
                supplied,
            },
        ))
    }
}

fn same_dir(record_dir: &Path, signal_path: &Path) -> bool {
    let signal_dir = signal_path.parent().unwrap_or_else(|| Path::new(""));
    if signal_dir == record_dir {
        return true;
    }
    match (record_dir.canonicalize(), signal_dir.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn bytes_per_frame(format: StorageFormat, signals: usize) -> Option<usize> {
    match format {
        StorageFormat::Fmt16 | StorageFormat::Fmt61 => Some(2 * signals),
        StorageFormat::Fmt80 => Some(signals),
        StorageFormat::Fmt24 => Some(3 * signals),
        StorageFormat::Fmt32 => Some(4 * signals),
        // 212 packs samples across frame boundaries
        StorageFormat::Fmt212 => None,
    }
}

/// Decode every signal stored in one data file. Returns one column per spec.
fn decode_group(
    path: &Path,
    specs: &[&SignalSpec],
    declared_samples: Option<usize>,
) -> Result<Vec<Vec<f64>>, EcgError> {
    let format = specs[0].format;
    if specs.iter().any(|s| s.format != format) {
        return Err(EcgError::record(
            path,
            RecordFormatReason::Header("signals sharing a file must share a storage format".into()),
        ));
    }
    let offset = specs[0].byte_offset as usize;

    let bytes = std::fs::read(path).map_err(|e| EcgError::record(path, (&e).into()))?;
    let payload = bytes.get(offset..).unwrap_or(&[]);
    let k = specs.len();

    let available_samples = match bytes_per_frame(format, k) {
        Some(frame) => payload.len() / frame,
        None => (payload.len() * 2 / 3) / k,
    };

    let num_samples = match declared_samples {
        Some(n) if n > available_samples => {
            let expected = (n as u64)
                .checked_mul(k as u64)
                .and_then(|total| required_bytes(format, total))
                .and_then(|needed| needed.checked_add(offset as u64));
            let reason = match expected {
                Some(expected) => RecordFormatReason::Truncated {
                    expected,
                    actual: bytes.len() as u64,
                },
                None => RecordFormatReason::Header(format!(
                    "declared sample count {n} is too large"
                )),
            };
            return Err(EcgError::record(path, reason));
        }
        Some(n) => n,
        None => available_samples,
    };

    let digital = decode_samples(format, payload, num_samples * k);

    let mut columns: Vec<Vec<f64>> = (0..k).map(|_| Vec::with_capacity(num_samples)).collect();
    for frame in digital.chunks_exact(k) {
        for ((column, spec), &value) in columns.iter_mut().zip(specs).zip(frame) {
            column.push(spec.to_physical(value));
        }
    }
    Ok(columns)
}

/// Bytes needed for `total_samples` interleaved samples; `None` on overflow.
fn required_bytes(format: StorageFormat, total_samples: u64) -> Option<u64> {
    match format {
        StorageFormat::Fmt16 | StorageFormat::Fmt61 => total_samples.checked_mul(2),
        StorageFormat::Fmt80 => Some(total_samples),
        StorageFormat::Fmt24 => total_samples.checked_mul(3),
        StorageFormat::Fmt32 => total_samples.checked_mul(4),
        StorageFormat::Fmt212 => total_samples.checked_mul(3).map(|b| b.div_ceil(2)),
    }
}

/// Decode `count` interleaved digital samples. Caller guarantees `payload` is long enough.
fn decode_samples(format: StorageFormat, payload: &[u8], count: usize) -> Vec<i32> {
    match format {
        StorageFormat::Fmt16 => payload
            .chunks_exact(2)
            .take(count)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as i32)
            .collect(),
        StorageFormat::Fmt61 => payload
            .chunks_exact(2)
            .take(count)
            .map(|b| i16::from_be_bytes([b[0], b[1]]) as i32)
            .collect(),
        StorageFormat::Fmt80 => payload
            .iter()
            .take(count)
            .map(|&b| b as i32 - 128)
            .collect(),
        StorageFormat::Fmt24 => payload
            .chunks_exact(3)
            .take(count)
            .map(|b| {
                let raw = (b[0] as i32) | ((b[1] as i32) << 8) | ((b[2] as i32) << 16);
                (raw << 8) >> 8
            })
            .collect(),
        StorageFormat::Fmt32 => payload
            .chunks_exact(4)
            .take(count)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        StorageFormat::Fmt212 => {
            let mut out = Vec::with_capacity(count);
            for chunk in payload.chunks(3) {
                if out.len() >= count {
                    break;
                }
                let b0 = chunk[0] as i32;
                let b1 = chunk.get(1).copied().unwrap_or(0) as i32;
                out.push(sign_extend_12(b0 | ((b1 & 0x0F) << 8)));
                if out.len() < count {
                    if let Some(&b2) = chunk.get(2) {
                        out.push(sign_extend_12(b2 as i32 | ((b1 & 0xF0) << 4)));
                    }
                }
            }
            out
        }
    }
}

fn sign_extend_12(value: i32) -> i32 {
    if value > 2047 {
        value - 4096
    } else {
        value
    }
}
