//! The fixed set of pathology classes scored by the classifier.
//!
//! The declaration order is the index order of every score and threshold vector in
//! the crate and must match the order of the classifier's output head.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::constants::NUM_CLASSES;
use crate::core::errors::AnalysisError;

/// One of the fourteen chest radiograph findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathologyClass {
    Atelectasis,
    Cardiomegaly,
    Effusion,
    Infiltration,
    Mass,
    Nodule,
    Pneumonia,
    Pneumothorax,
    Consolidation,
    Edema,
    Emphysema,
    Fibrosis,
    #[serde(rename = "Pleural_Thickening")]
    PleuralThickening,
    Hernia,
}

impl PathologyClass {
    /// All classes in classifier output order.
    pub const ALL: [PathologyClass; NUM_CLASSES] = [
        PathologyClass::Atelectasis,
        PathologyClass::Cardiomegaly,
        PathologyClass::Effusion,
        PathologyClass::Infiltration,
        PathologyClass::Mass,
        PathologyClass::Nodule,
        PathologyClass::Pneumonia,
        PathologyClass::Pneumothorax,
        PathologyClass::Consolidation,
        PathologyClass::Edema,
        PathologyClass::Emphysema,
        PathologyClass::Fibrosis,
        PathologyClass::PleuralThickening,
        PathologyClass::Hernia,
    ];

    /// Position of this class in score and threshold vectors.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Class at `index`, if in range.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Canonical artifact name (the label used by the training dataset).
    pub fn name(self) -> &'static str {
        match self {
            PathologyClass::Atelectasis => "Atelectasis",
            PathologyClass::Cardiomegaly => "Cardiomegaly",
            PathologyClass::Effusion => "Effusion",
            PathologyClass::Infiltration => "Infiltration",
            PathologyClass::Mass => "Mass",
            PathologyClass::Nodule => "Nodule",
            PathologyClass::Pneumonia => "Pneumonia",
            PathologyClass::Pneumothorax => "Pneumothorax",
            PathologyClass::Consolidation => "Consolidation",
            PathologyClass::Edema => "Edema",
            PathologyClass::Emphysema => "Emphysema",
            PathologyClass::Fibrosis => "Fibrosis",
            PathologyClass::PleuralThickening => "Pleural_Thickening",
            PathologyClass::Hernia => "Hernia",
        }
    }

    /// Human-readable name, e.g. "Pleural Thickening".
    pub fn display_name(self) -> &'static str {
        match self {
            PathologyClass::PleuralThickening => "Pleural Thickening",
            other => other.name(),
        }
    }
}

/// Lowercases and drops separators so "Pleural_Thickening", "pleural thickening"
/// and "PleuralThickening" compare equal.
pub(crate) fn normalize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

impl FromStr for PathologyClass {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize_label(s);
        PathologyClass::ALL
            .into_iter()
            .find(|class| normalize_label(class.name()) == wanted)
            .ok_or_else(|| {
                AnalysisError::config_error(format!("unknown pathology class '{}'", s.trim()))
            })
    }
}

impl fmt::Display for PathologyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
