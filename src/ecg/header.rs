//! WFDB header (`.hea`) parsing.
//!
//! A header holds one record line followed by one line per signal. The
//! signal lines name the data file(s) holding the samples, so a header is
//! enough to locate its companion signal file.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::{EcgError, RecordFormatReason};

/// Sampling frequency assumed when the record line omits it.
pub const DEFAULT_SAMPLING_RATE: f64 = 250.0;

/// ADC units per physical unit when the gain field is absent or zero.
pub const DEFAULT_GAIN: f64 = 200.0;

pub const DEFAULT_UNITS: &str = "mV";

static FORMAT_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)(?:x(\d+))?(?::(-?\d+))?(?:\+(\d+))?$").unwrap()
});

static GAIN_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)(?:\(([-+]?\d+)\))?(?:/(.+))?$")
        .unwrap()
});

/// On-disk sample encodings we decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFormat {
    /// 16-bit two's complement, little-endian.
    Fmt16,
    /// 16-bit two's complement, big-endian.
    Fmt61,
    /// 8-bit offset binary.
    Fmt80,
    /// Two 12-bit samples packed into three bytes.
    Fmt212,
    /// 24-bit two's complement, little-endian.
    Fmt24,
    /// 32-bit two's complement, little-endian.
    Fmt32,
}

impl StorageFormat {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "16" => Some(Self::Fmt16),
            "61" => Some(Self::Fmt61),
            "80" => Some(Self::Fmt80),
            "212" => Some(Self::Fmt212),
            "24" => Some(Self::Fmt24),
            "32" => Some(Self::Fmt32),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Fmt16 => "16",
            Self::Fmt61 => "61",
            Self::Fmt80 => "80",
            Self::Fmt212 => "212",
            Self::Fmt24 => "24",
            Self::Fmt32 => "32",
        }
    }

    /// Reserved digital value marking a missing sample.
    pub fn invalid_sample(&self) -> i32 {
        match self {
            Self::Fmt16 | Self::Fmt61 => i16::MIN as i32,
            Self::Fmt80 => -128,
            Self::Fmt212 => -2048,
            Self::Fmt24 => -(1 << 23),
            Self::Fmt32 => i32::MIN,
        }
    }
}

/// One signal (lead) line of a header.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSpec {
    pub file_name: String,
    pub format: StorageFormat,
    pub byte_offset: u64,
    pub gain: f64,
    pub baseline: i32,
    pub units: String,
    pub adc_zero: i32,
    pub description: String,
}

impl SignalSpec {
    /// Convert a stored digital value to physical units.
    pub fn to_physical(&self, digital: i32) -> f64 {
        if digital == self.format.invalid_sample() {
            return f64::NAN;
        }
        (digital as f64 - self.baseline as f64) / self.gain
    }
}

/// Parsed header of a single-segment record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    pub record_name: String,
    pub sampling_rate: f64,
    /// Samples per signal, when the record line declares it.
    pub num_samples: Option<usize>,
    pub signals: Vec<SignalSpec>,
}

impl RecordHeader {
    /// Data files in order of first appearance, each with the indices of the
    /// signals it stores (frame-interleaved in that order).
    pub fn signal_groups(&self) -> Vec<(&str, Vec<usize>)> {
        let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();
        for (idx, spec) in self.signals.iter().enumerate() {
            match groups.iter_mut().find(|(name, _)| *name == spec.file_name) {
                Some((_, members)) => members.push(idx),
                None => groups.push((spec.file_name.as_str(), vec![idx])),
            }
        }
        groups
    }
}

/// Read and parse a header file.
pub fn read_header(path: &Path) -> Result<RecordHeader, EcgError> {
    let text = std::fs::read_to_string(path).map_err(|e| EcgError::record(path, (&e).into()))?;
    parse_header(&text).map_err(|reason| EcgError::record(path, reason))
}

/// Parse header text.
pub fn parse_header(text: &str) -> Result<RecordHeader, RecordFormatReason> {
    let mut lines = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'));

    let record_line = lines
        .next()
        .ok_or_else(|| header_err("header is empty"))?;
    let fields: Vec<&str> = record_line.split_whitespace().collect();

    let record_name = fields[0];
    if record_name.contains('/') {
        return Err(header_err(format!(
            "multi-segment record '{record_name}' is not supported"
        )));
    }

    let num_signals: usize = fields
        .get(1)
        .ok_or_else(|| header_err("record line is missing the signal count"))?
        .parse()
        .map_err(|_| header_err(format!("invalid signal count '{}'", fields[1])))?;
    if num_signals == 0 {
        return Err(header_err("record declares no signals"));
    }

    let sampling_rate = match fields.get(2) {
        Some(field) => parse_sampling_rate(field)?,
        None => DEFAULT_SAMPLING_RATE,
    };

    let num_samples = match fields.get(3) {
        Some(field) => Some(
            field
                .parse::<usize>()
                .map_err(|_| header_err(format!("invalid sample count '{field}'")))?,
        ),
        None => None,
    };

    // The declared count is untrusted; grow as signal lines are found
    let mut signals = Vec::new();
    for n in 0..num_signals {
        let line = lines.next().ok_or_else(|| {
            header_err(format!(
                "record declares {num_signals} signals but only {n} signal lines are present"
            ))
        })?;
        signals.push(parse_signal_line(line, n + 1)?);
    }

    Ok(RecordHeader {
        record_name: record_name.to_string(),
        sampling_rate,
        num_samples,
        signals,
    })
}

fn parse_sampling_rate(field: &str) -> Result<f64, RecordFormatReason> {
    // "500", "500/1000(0)": only the frame frequency matters here
    let freq = field.split('/').next().unwrap_or(field);
    let rate: f64 = freq
        .parse()
        .map_err(|_| header_err(format!("invalid sampling frequency '{field}'")))?;
    if !rate.is_finite() || rate <= 0.0 {
        return Err(header_err(format!("sampling frequency must be positive, got {rate}")));
    }
    Ok(rate)
}

fn parse_signal_line(line: &str, number: usize) -> Result<SignalSpec, RecordFormatReason> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 2 {
        return Err(header_err(format!(
            "signal line {number} needs at least a file name and a format"
        )));
    }

    let file_name = fields[0].to_string();
    let caps = FORMAT_FIELD
        .captures(fields[1])
        .ok_or_else(|| header_err(format!("invalid format field '{}'", fields[1])))?;

    let format = StorageFormat::from_code(&caps[1])
        .ok_or_else(|| RecordFormatReason::UnsupportedFormat(caps[1].to_string()))?;
    if let Some(spf) = caps.get(2) {
        if spf.as_str() != "1" {
            return Err(RecordFormatReason::UnsupportedFormat(format!(
                "{} with {} samples per frame",
                format.code(),
                spf.as_str()
            )));
        }
    }
    if let Some(skew) = caps.get(3) {
        if skew.as_str() != "0" {
            tracing::warn!(signal = number, skew = skew.as_str(), "Ignoring signal skew");
        }
    }
    let byte_offset = match caps.get(4) {
        Some(m) => m
            .as_str()
            .parse()
            .map_err(|_| header_err(format!("invalid byte offset '{}'", m.as_str())))?,
        None => 0,
    };

    let adc_zero = match fields.get(4) {
        Some(field) => field
            .parse()
            .map_err(|_| header_err(format!("invalid ADC zero '{field}'")))?,
        None => 0,
    };

    let (gain, baseline, units) = match fields.get(2) {
        Some(field) => {
            let caps = GAIN_FIELD
                .captures(field)
                .ok_or_else(|| header_err(format!("invalid gain field '{field}'")))?;
            let gain: f64 = caps[1]
                .parse()
                .map_err(|_| header_err(format!("invalid gain '{}'", &caps[1])))?;
            let baseline = match caps.get(2) {
                Some(m) => m
                    .as_str()
                    .parse()
                    .map_err(|_| header_err(format!("invalid baseline '{}'", m.as_str())))?,
                None => adc_zero,
            };
            let units = caps
                .get(3)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| DEFAULT_UNITS.to_string());
            (gain, baseline, units)
        }
        None => (DEFAULT_GAIN, adc_zero, DEFAULT_UNITS.to_string()),
    };
    let gain = if gain == 0.0 { DEFAULT_GAIN } else { gain };

    let description = if fields.len() > 8 {
        fields[8..].join(" ")
    } else {
        format!("ch{number}")
    };

    Ok(SignalSpec {
        file_name,
        format,
        byte_offset,
        gain,
        baseline,
        units,
        adc_zero,
        description,
    })
}

fn header_err(msg: impl Into<String>) -> RecordFormatReason {
    RecordFormatReason::Header(msg.into())
}
