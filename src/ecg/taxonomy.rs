//! The fixed 9-class taxonomy shared by the classifier output and every
//! consumer of a prediction.
//!
//! Position `i` of [`CLASS_ABBREVIATIONS`] is output position `i` of the
//! exported model. The order is part of the model contract.

/// Number of classifier outputs.
pub const NUM_CLASSES: usize = 9;

pub const CLASS_ABBREVIATIONS: [&str; NUM_CLASSES] = [
    "SNR", "AF", "IAVB", "LBBB", "RBBB", "PAC", "PVC", "STD", "STE",
];

const CLASS_NAMES: [(&str, &str); NUM_CLASSES] = [
    ("SNR", "Sinus Rhythm"),
    ("AF", "Atrial Fibrillation"),
    ("IAVB", "AV Block"),
    ("LBBB", "Left Bundle Branch Block"),
    ("RBBB", "Right Bundle Branch Block"),
    ("PAC", "Premature Atrial Contraction"),
    ("PVC", "Premature Ventricular Contraction"),
    ("STD", "ST Depression"),
    ("STE", "ST Elevation"),
];

/// Human-readable name for an abbreviation. Unknown abbreviations map to themselves.
pub fn class_name(abbreviation: &str) -> &str {
    CLASS_NAMES
        .iter()
        .find(|(abbr, _)| *abbr == abbreviation)
        .map(|(_, name)| *name)
        .unwrap_or(abbreviation)
}

/// Output position of an abbreviation.
pub fn class_index(abbreviation: &str) -> Option<usize> {
    CLASS_ABBREVIATIONS.iter().position(|a| *a == abbreviation)
}
