//! Logits → probabilities → primary diagnosis.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use super::taxonomy::{class_name, CLASS_ABBREVIATIONS, NUM_CLASSES};
use super::EcgError;

/// Persisted form of a prediction: a flat abbreviation → probability map.
pub type StoredPrediction = BTreeMap<String, f64>;

/// Per-class probabilities in taxonomy order.
///
/// Serializes as a JSON object keyed by abbreviation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probabilities([f64; NUM_CLASSES]);

impl Probabilities {
    /// Accept a stored map only if it carries every taxonomy key with a finite
    /// value in `[0, 1]`. Extra keys are ignored.
    pub fn from_stored(stored: &StoredPrediction) -> Option<Self> {
        let mut values = [0.0; NUM_CLASSES];
        for (slot, abbr) in values.iter_mut().zip(CLASS_ABBREVIATIONS) {
            let p = *stored.get(abbr)?;
            if !p.is_finite() || !(0.0..=1.0).contains(&p) {
                return None;
            }
            *slot = p;
        }
        Some(Self(values))
    }

    pub fn get(&self, abbreviation: &str) -> Option<f64> {
        CLASS_ABBREVIATIONS
            .iter()
            .position(|a| *a == abbreviation)
            .map(|i| self.0[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        CLASS_ABBREVIATIONS.iter().copied().zip(self.0.iter().copied())
    }

    pub fn as_array(&self) -> &[f64; NUM_CLASSES] {
        &self.0
    }

    pub fn to_stored(&self) -> StoredPrediction {
        self.iter().map(|(a, p)| (a.to_string(), p)).collect()
    }

    /// First index of the maximum (strict `>` scan).
    fn argmax(&self) -> usize {
        let mut best = 0;
        for (i, &p) in self.0.iter().enumerate().skip(1) {
            if p > self.0[best] {
                best = i;
            }
        }
        best
    }
}

impl Serialize for Probabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(NUM_CLASSES))?;
        for (abbr, p) in self.iter() {
            map.serialize_entry(abbr, &p)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Probabilities {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let stored = StoredPrediction::deserialize(deserializer)?;
        Probabilities::from_stored(&stored).ok_or_else(|| {
            serde::de::Error::custom("prediction must hold all 9 class probabilities in [0, 1]")
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimaryDiagnosis {
    pub abbreviation: &'static str,
    pub name: &'static str,
    pub probability: f64,
}

/// Outcome of one analysis. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub probabilities: Probabilities,
    pub primary_diagnosis: PrimaryDiagnosis,
    pub summary: String,
}

impl PredictionResult {
    /// Derive primary diagnosis and summary from a full probability set.
    pub fn from_probabilities(probabilities: Probabilities) -> Self {
        let index = probabilities.argmax();
        let abbreviation = CLASS_ABBREVIATIONS[index];
        let probability = probabilities.0[index];
        let name = class_name(abbreviation);
        Self {
            probabilities,
            primary_diagnosis: PrimaryDiagnosis {
                abbreviation,
                name,
                probability,
            },
            summary: format_summary(name, probability),
        }
    }

    /// Rebuild from a stored map. `None` when the map is structurally invalid.
    pub fn from_stored(stored: &StoredPrediction) -> Option<Self> {
        Probabilities::from_stored(stored).map(Self::from_probabilities)
    }

    pub fn to_stored(&self) -> StoredPrediction {
        self.probabilities.to_stored()
    }

    pub fn primary_abbreviation(&self) -> &'static str {
        self.primary_diagnosis.abbreviation
    }

    pub fn primary_probability(&self) -> f64 {
        self.primary_diagnosis.probability
    }

    pub fn primary_name(&self) -> &'static str {
        self.primary_diagnosis.name
    }
}

/// `"Primary finding: {name} ({pct:.1}% confidence)"`.
pub fn format_summary(name: &str, probability: f64) -> String {
    format!(
        "Primary finding: {name} ({:.1}% confidence)",
        probability * 100.0
    )
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Map raw classifier logits to a [`PredictionResult`].
///
/// The slice must hold exactly [`NUM_CLASSES`] finite values.
pub fn map(logits: &[f32]) -> Result<PredictionResult, EcgError> {
    if logits.len() != NUM_CLASSES {
        return Err(EcgError::Shape {
            context: "result mapper input",
            expected: format!("[{NUM_CLASSES}]"),
            actual: format!("[{}]", logits.len()),
        });
    }
    if let Some(bad) = logits.iter().find(|v| !v.is_finite()) {
        return Err(EcgError::Shape {
            context: "result mapper input",
            expected: "finite logits".to_string(),
            actual: bad.to_string(),
        });
    }

    let mut values = [0.0; NUM_CLASSES];
    for (slot, &logit) in values.iter_mut().zip(logits) {
        *slot = sigmoid(f64::from(logit));
    }
    Ok(PredictionResult::from_probabilities(Probabilities(values)))
}
