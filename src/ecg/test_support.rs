//! Synthetic WFDB records for tests.

use std::path::{Path, PathBuf};

pub const TWELVE_LEADS: [&str; 12] = [
    "I", "II", "III", "aVR", "aVL", "aVF", "V1", "V2", "V3", "V4", "V5", "V6",
];

/// Shape of a synthetic record: format 16, gain 1000/mV, baseline 0.
pub struct RecordSpec {
    pub name: String,
    pub leads: Vec<String>,
    pub samples: usize,
    pub fs: f64,
    pub mat_offset: bool,
    pub declare_samples: bool,
}

impl RecordSpec {
    pub fn twelve_lead(name: &str, samples: usize) -> Self {
        Self::with_leads(name, samples, 12)
    }

    pub fn with_leads(name: &str, samples: usize, leads: usize) -> Self {
        Self {
            name: name.to_string(),
            leads: (0..leads)
                .map(|i| {
                    TWELVE_LEADS
                        .get(i)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| format!("X{i}"))
                })
                .collect(),
            samples,
            fs: 500.0,
            mat_offset: false,
            declare_samples: true,
        }
    }

    /// Store samples in `<name>.mat` behind a 24-byte MATLAB v4 header.
    pub fn with_mat_offset(mut self) -> Self {
        self.mat_offset = true;
        self
    }

    pub fn without_sample_count(mut self) -> Self {
        self.declare_samples = false;
        self
    }

    pub fn signal_file_name(&self) -> String {
        if self.mat_offset {
            format!("{}.mat", self.name)
        } else {
            format!("{}.dat", self.name)
        }
    }

    pub fn header_text(&self) -> String {
        let format = if self.mat_offset { "16+24" } else { "16" };
        let mut text = if self.declare_samples {
            format!("{} {} {} {}\n", self.name, self.leads.len(), self.fs, self.samples)
        } else {
            format!("{} {} {}\n", self.name, self.leads.len(), self.fs)
        };
        for lead in &self.leads {
            text.push_str(&format!(
                "{} {format} 1000/mV 16 0 0 0 0 {lead}\n",
                self.signal_file_name()
            ));
        }
        text
    }
}

/// Write `<name>.hea` and its signal file into `dir`. `value(row, lead)` is the
/// digital sample; physical value is `value / 1000` mV.
pub fn write_record(
    dir: &Path,
    spec: &RecordSpec,
    value: impl Fn(usize, usize) -> i16,
) -> (PathBuf, PathBuf) {
    let header_path = dir.join(format!("{}.hea", spec.name));
    let signal_path = dir.join(spec.signal_file_name());

    std::fs::write(&header_path, spec.header_text()).unwrap();

    let mut bytes = Vec::with_capacity(spec.samples * spec.leads.len() * 2 + 24);
    if spec.mat_offset {
        bytes.extend_from_slice(&[0u8; 24]);
    }
    for row in 0..spec.samples {
        for lead in 0..spec.leads.len() {
            bytes.extend_from_slice(&value(row, lead).to_le_bytes());
        }
    }
    std::fs::write(&signal_path, bytes).unwrap();

    (header_path, signal_path)
}

/// Header and signal file contents as in-memory bytes (for upload tests).
pub fn record_bytes(spec: &RecordSpec, value: impl Fn(usize, usize) -> i16) -> (Vec<u8>, Vec<u8>) {
    let dir = tempfile::tempdir().unwrap();
    let (hea, sig) = write_record(dir.path(), spec, value);
    (std::fs::read(hea).unwrap(), std::fs::read(sig).unwrap())
}
