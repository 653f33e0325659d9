//! The immutable analysis result and its assembler.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::core::constants::NUM_CLASSES;
use crate::core::errors::AnalysisError;
use crate::domain::finding::{Finding, RankedPrediction};
use crate::domain::pathology::PathologyClass;
use crate::domain::scores::ScoreVector;
use crate::domain::thresholds::ThresholdTable;
use crate::processors::saliency::SaliencyOverlay;

/// Everything one analysis produced.
///
/// Field order is part of the serialized contract consumed by report and storage
/// collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    model_version: String,
    threshold_version: Option<String>,
    analyzed_at: DateTime<Utc>,
    scores: ScoreVector,
    thresholds: Arc<ThresholdTable>,
    findings: Vec<Finding>,
    ranked_predictions: Vec<RankedPrediction>,
    overlays: Vec<SaliencyOverlay>,
}

impl AnalysisResult {
    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn threshold_version(&self) -> Option<&str> {
        self.threshold_version.as_deref()
    }

    pub fn analyzed_at(&self) -> DateTime<Utc> {
        self.analyzed_at
    }

    pub fn scores(&self) -> &ScoreVector {
        &self.scores
    }

    /// The threshold table the findings were derived from.
    pub fn thresholds(&self) -> &ThresholdTable {
        &self.thresholds
    }

    /// Findings by descending score.
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn ranked_predictions(&self) -> &[RankedPrediction] {
        &self.ranked_predictions
    }

    /// Overlays in request order.
    pub fn overlays(&self) -> &[SaliencyOverlay] {
        &self.overlays
    }

    pub fn overlay(&self, class: PathologyClass) -> Option<&SaliencyOverlay> {
        self.overlays.iter().find(|o| o.class() == class)
    }

    pub fn is_detected(&self, class: PathologyClass) -> bool {
        self.findings.iter().any(|f| f.class == class)
    }
}

/// Composes stage outputs into an [`AnalysisResult`] after checking that they agree.
///
/// A failed check means an upstream bug; the caller gets an
/// [`AnalysisError::Assembly`] and no partial result.
#[derive(Debug, Clone)]
pub struct AnalysisResultAssembler {
    model_version: String,
    thresholds: Arc<ThresholdTable>,
}

impl AnalysisResultAssembler {
    pub fn new(model_version: impl Into<String>, thresholds: Arc<ThresholdTable>) -> Self {
        Self {
            model_version: model_version.into(),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &Arc<ThresholdTable> {
        &self.thresholds
    }

    /// Assembles a result. `requested` lists the classes overlays were asked for;
    /// `overlays` must contain exactly those classes, in that order.
    pub fn assemble(
        &self,
        scores: ScoreVector,
        findings: Vec<Finding>,
        ranked_predictions: Vec<RankedPrediction>,
        requested: &[PathologyClass],
        overlays: Vec<SaliencyOverlay>,
    ) -> Result<AnalysisResult, AnalysisError> {
        self.check_findings(&scores, &findings)?;
        self.check_ranked(&scores, &ranked_predictions)?;
        Self::check_overlays(requested, &overlays)?;

        Ok(AnalysisResult {
            model_version: self.model_version.clone(),
            threshold_version: self.thresholds.version().map(str::to_string),
            analyzed_at: Utc::now(),
            scores,
            thresholds: Arc::clone(&self.thresholds),
            findings,
            ranked_predictions,
            overlays,
        })
    }

    fn check_findings(&self, scores: &ScoreVector, findings: &[Finding]) -> Result<(), AnalysisError> {
        let mut present = [false; NUM_CLASSES];
        for finding in findings {
            let class = finding.class;
            if std::mem::replace(&mut present[class.index()], true) {
                return Err(AnalysisError::assembly_error(format!(
                    "{class} appears twice in findings"
                )));
            }
            if finding.score != scores.get(class) {
                return Err(AnalysisError::assembly_error(format!(
                    "finding for {class} has score {} but the score vector has {}",
                    finding.score,
                    scores.get(class)
                )));
            }
            if finding.threshold != self.thresholds.get(class) || finding.score < finding.threshold {
                return Err(AnalysisError::assembly_error(format!(
                    "finding for {class} does not clear the threshold in use"
                )));
            }
        }
        for (class, score) in scores.iter() {
            if !present[class.index()] && score >= self.thresholds.get(class) {
                return Err(AnalysisError::assembly_error(format!(
                    "{class} clears its threshold but is missing from findings"
                )));
            }
        }
        if findings.windows(2).any(|w| w[0].score < w[1].score) {
            return Err(AnalysisError::assembly_error(
                "findings are not ordered by descending score",
            ));
        }
        Ok(())
    }

    fn check_ranked(
        &self,
        scores: &ScoreVector,
        ranked: &[RankedPrediction],
    ) -> Result<(), AnalysisError> {
        for (i, prediction) in ranked.iter().enumerate() {
            if prediction.rank != i + 1 || prediction.score != scores.get(prediction.class) {
                return Err(AnalysisError::assembly_error(format!(
                    "ranked prediction {} ({}) disagrees with the score vector",
                    i + 1,
                    prediction.class
                )));
            }
        }
        Ok(())
    }

    fn check_overlays(
        requested: &[PathologyClass],
        overlays: &[SaliencyOverlay],
    ) -> Result<(), AnalysisError> {
        let produced: Vec<PathologyClass> = overlays.iter().map(|o| o.class()).collect();
        if produced != requested {
            return Err(AnalysisError::assembly_error(format!(
                "overlays were requested for {requested:?} but produced for {produced:?}"
            )));
        }
        Ok(())
    }
}
