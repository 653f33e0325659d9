//! Agreement between a clinician's reference diagnosis and the model ranking.

use serde::Serialize;

use crate::domain::pathology::{PathologyClass, normalize_label};
use crate::domain::result::AnalysisResult;

/// Where a reference label landed in the model's ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReferenceAgreement {
    /// The highest-scoring class matches the reference.
    Primary,
    /// A class at `rank` (2..=k) matches the reference.
    TopK { rank: usize },
    /// No class in the top `k` matches.
    Miss,
}

impl ReferenceAgreement {
    /// Compares `reference` with the top `k` classes of `result`.
    ///
    /// The primary class is always checked, even when `k` is 0. Labels match when
    /// either normalized form contains the other, so "pleural effusion" matches
    /// Effusion and "Pleural Thickening" matches `Pleural_Thickening`.
    pub fn evaluate(result: &AnalysisResult, reference: &str, k: usize) -> Self {
        let reference = normalize_label(reference);
        if reference.is_empty() {
            return Self::Miss;
        }
        result
            .scores()
            .top(k.max(1))
            .into_iter()
            .position(|(class, _)| labels_match(class, &reference))
            .map_or(Self::Miss, |i| match i {
                0 => Self::Primary,
                i => Self::TopK { rank: i + 1 },
            })
    }

    /// True for any outcome other than [`ReferenceAgreement::Miss`].
    pub fn is_match(&self) -> bool {
        !matches!(self, Self::Miss)
    }
}

fn labels_match(class: PathologyClass, normalized_reference: &str) -> bool {
    let name = normalize_label(class.name());
    name.contains(normalized_reference) || normalized_reference.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::NUM_CLASSES;
    use crate::domain::finding::classify;
    use crate::domain::result::AnalysisResultAssembler;
    use crate::domain::scores::ScoreVector;
    use crate::domain::thresholds::ThresholdTable;
    use std::sync::Arc;

    fn result() -> AnalysisResult {
        let mut values = [0.05; NUM_CLASSES];
        values[PathologyClass::Effusion.index()] = 0.8;
        values[PathologyClass::PleuralThickening.index()] = 0.6;
        values[PathologyClass::Mass.index()] = 0.4;
        let scores = ScoreVector::new(&values).unwrap();
        let thresholds = Arc::new(ThresholdTable::uniform(0.5).unwrap());
        let findings = classify(&scores, &thresholds);
        AnalysisResultAssembler::new("v1", thresholds)
            .assemble(scores, findings, Vec::new(), &[], Vec::new())
            .unwrap()
    }

    #[test]
    fn test_primary_match_with_free_text() {
        assert_eq!(
            ReferenceAgreement::evaluate(&result(), "Pleural effusion", 5),
            ReferenceAgreement::Primary
        );
    }

    #[test]
    fn test_top_k_match() {
        assert_eq!(
            ReferenceAgreement::evaluate(&result(), "pleural thickening", 5),
            ReferenceAgreement::TopK { rank: 2 }
        );
        assert_eq!(
            ReferenceAgreement::evaluate(&result(), "MASS", 5),
            ReferenceAgreement::TopK { rank: 3 }
        );
    }

    #[test]
    fn test_primary_checked_when_k_is_zero() {
        assert_eq!(
            ReferenceAgreement::evaluate(&result(), "effusion", 0),
            ReferenceAgreement::Primary
        );
        assert_eq!(
            ReferenceAgreement::evaluate(&result(), "Mass", 0),
            ReferenceAgreement::Miss
        );
    }

    #[test]
    fn test_miss_outside_k_or_unknown() {
        assert_eq!(
            ReferenceAgreement::evaluate(&result(), "Mass", 2),
            ReferenceAgreement::Miss
        );
        assert!(!ReferenceAgreement::evaluate(&result(), "Tuberculosis", 5).is_match());
        assert!(!ReferenceAgreement::evaluate(&result(), "  ", 5).is_match());
    }
}
