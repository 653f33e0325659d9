//! Threshold classification of scores into findings.

use serde::Serialize;

use crate::domain::pathology::PathologyClass;
use crate::domain::scores::ScoreVector;
use crate::domain::thresholds::ThresholdTable;

/// A class whose score reached its decision threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Finding {
    /// The detected class.
    pub class: PathologyClass,
    /// Classifier probability for the class.
    pub score: f32,
    /// Threshold the score was compared against.
    pub threshold: f32,
}

impl Finding {
    /// Distance above the decision boundary (never negative for a finding).
    pub fn margin(&self) -> f32 {
        self.score - self.threshold
    }
}

/// Applies per-class thresholds to a score vector.
///
/// A class is a finding iff `score >= threshold`. Findings are ordered by descending
/// score; equal scores keep enumeration order. The function is pure.
pub fn classify(scores: &ScoreVector, thresholds: &ThresholdTable) -> Vec<Finding> {
    let mut findings: Vec<Finding> = scores
        .iter()
        .filter_map(|(class, score)| {
            let threshold = thresholds.get(class);
            (score >= threshold).then_some(Finding {
                class,
                score,
                threshold,
            })
        })
        .collect();

    findings.sort_by(|a, b| b.score.total_cmp(&a.score));
    findings
}

/// One entry of the raw-score ranking, annotated with the decision outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankedPrediction {
    /// 1-based rank by score.
    pub rank: usize,
    /// The class.
    pub class: PathologyClass,
    /// Classifier probability.
    pub score: f32,
    /// Decision threshold for the class.
    pub threshold: f32,
    /// Whether the score reached the threshold.
    pub detected: bool,
}

/// The `k` highest-scoring classes regardless of threshold.
pub fn rank_predictions(
    scores: &ScoreVector,
    thresholds: &ThresholdTable,
    k: usize,
) -> Vec<RankedPrediction> {
    scores
        .top(k)
        .into_iter()
        .enumerate()
        .map(|(i, (class, score))| {
            let threshold = thresholds.get(class);
            RankedPrediction {
                rank: i + 1,
                class,
                score,
                threshold,
                detected: score >= threshold,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::NUM_CLASSES;

    fn scores(overrides: &[(PathologyClass, f32)], base: f32) -> ScoreVector {
        let mut values = [base; NUM_CLASSES];
        for (class, score) in overrides {
            values[class.index()] = *score;
        }
        ScoreVector::new(&values).unwrap()
    }

    fn thresholds(overrides: &[(PathologyClass, f32)], base: f32) -> ThresholdTable {
        let mut cutoffs = [base; NUM_CLASSES];
        for (class, cutoff) in overrides {
            cutoffs[class.index()] = *cutoff;
        }
        ThresholdTable::new(cutoffs).unwrap()
    }

    #[test]
    fn test_single_cardiomegaly_finding() {
        let table = thresholds(&[(PathologyClass::Cardiomegaly, 0.5)], 0.9);
        let scores = scores(&[(PathologyClass::Cardiomegaly, 0.7)], 0.1);

        let findings = classify(&scores, &table);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].class, PathologyClass::Cardiomegaly);
        assert!((findings[0].margin() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_boundary_score_is_included() {
        let table = thresholds(&[], 0.5);
        let scores = scores(&[(PathologyClass::Edema, 0.5)], 0.49);
        let findings = classify(&scores, &table);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].class, PathologyClass::Edema);
    }

    #[test]
    fn test_membership_iff_score_reaches_threshold() {
        let values: Vec<f32> = (0..NUM_CLASSES).map(|i| i as f32 / 13.0).collect();
        let scores = ScoreVector::new(&values).unwrap();
        let table = thresholds(&[], 0.5);
        let findings = classify(&scores, &table);

        for (class, score) in scores.iter() {
            let present = findings.iter().any(|f| f.class == class);
            assert_eq!(present, score >= 0.5, "{class}");
        }
    }

    #[test]
    fn test_order_descending_with_stable_ties() {
        let table = thresholds(&[], 0.3);
        let scores = scores(
            &[
                (PathologyClass::Hernia, 0.6),
                (PathologyClass::Effusion, 0.6),
                (PathologyClass::Mass, 0.9),
            ],
            0.1,
        );
        let classes: Vec<PathologyClass> =
            classify(&scores, &table).iter().map(|f| f.class).collect();
        assert_eq!(
            classes,
            vec![
                PathologyClass::Mass,
                PathologyClass::Effusion,
                PathologyClass::Hernia
            ]
        );
    }

    #[test]
    fn test_classify_is_pure() {
        let table = thresholds(&[(PathologyClass::Nodule, 0.2)], 0.4);
        let scores = scores(&[(PathologyClass::Nodule, 0.3), (PathologyClass::Mass, 0.45)], 0.1);
        assert_eq!(classify(&scores, &table), classify(&scores, &table));
    }

    #[test]
    fn test_rank_predictions_reports_undetected() {
        let table = thresholds(&[], 0.9);
        let scores = scores(&[(PathologyClass::Pneumonia, 0.6)], 0.1);
        let ranked = rank_predictions(&scores, &table, 5);
        assert_eq!(ranked.len(), 5);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[0].class, PathologyClass::Pneumonia);
        assert!(!ranked[0].detected);
    }
}
