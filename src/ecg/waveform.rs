//! Display traces for the waveform preview.
//!
//! Presentation only: values are scaled to millivolts here and nowhere else.
//! The inference path never sees these numbers.

use serde::Serialize;

use super::record::WaveformRecord;
use super::EcgError;

/// Which leads to show and how densely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaveformSelection {
    /// `None` shows every lead (overlay view).
    pub leads: Option<Vec<String>>,
    /// Upper bound on points per trace; larger records are decimated by stride.
    pub max_points: Option<usize>,
}

impl WaveformSelection {
    /// Build from a comma-separated lead list such as `"I,II,V1"`.
    pub fn from_query(leads: Option<&str>, max_points: Option<usize>) -> Self {
        let leads = leads
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|l| !l.is_empty());
        Self {
            leads,
            max_points: max_points.filter(|&m| m > 0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadTrace {
    pub lead: String,
    pub units: String,
    /// Invalid samples serialize as `null`.
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveformPreview {
    pub record_name: String,
    pub sampling_rate: f64,
    pub duration_secs: f64,
    pub lead_names: Vec<String>,
    pub time: Vec<f64>,
    pub traces: Vec<LeadTrace>,
}

/// Scale factor to millivolts and the units to report afterwards.
fn millivolt_scale(units: &str) -> (f64, &str) {
    match units {
        "mV" | "mv" => (1.0, "mV"),
        "uV" | "µV" | "μV" | "uv" => (1e-3, "mV"),
        "V" | "v" => (1e3, "mV"),
        other => (1.0, other),
    }
}

fn resolve_lead(record: &WaveformRecord, wanted: &str) -> Result<usize, EcgError> {
    let names = &record.channel_names;
    names
        .iter()
        .position(|n| n == wanted)
        .or_else(|| names.iter().position(|n| n.eq_ignore_ascii_case(wanted)))
        .ok_or_else(|| EcgError::UnknownLead {
            lead: wanted.to_string(),
            available: names.clone(),
        })
}

/// Build the preview for `record`. Unknown lead names fail the whole request.
pub fn preview(
    record: &WaveformRecord,
    selection: &WaveformSelection,
) -> Result<WaveformPreview, EcgError> {
    let columns: Vec<usize> = match &selection.leads {
        None => (0..record.num_leads()).collect(),
        Some(names) => names
            .iter()
            .map(|n| resolve_lead(record, n))
            .collect::<Result<_, _>>()?,
    };

    let n = record.num_samples();
    let stride = match selection.max_points {
        Some(max) if n > max => n.div_ceil(max),
        _ => 1,
    };
    let rows: Vec<usize> = (0..n).step_by(stride).collect();

    let fs = record.sampling_rate;
    let time = rows.iter().map(|&i| i as f64 / fs).collect();

    let traces = columns
        .iter()
        .map(|&c| {
            let source_units = record.units.get(c).map(String::as_str).unwrap_or("mV");
            let (scale, units) = millivolt_scale(source_units);
            let column = record.samples.column(c);
            LeadTrace {
                lead: record.channel_names[c].clone(),
                units: units.to_string(),
                values: rows.iter().map(|&i| column[i] * scale).collect(),
            }
        })
        .collect();

    Ok(WaveformPreview {
        record_name: record.record_name.clone(),
        sampling_rate: fs,
        duration_secs: record.duration_secs(),
        lead_names: record.channel_names.clone(),
        time,
        traces,
    })
}
