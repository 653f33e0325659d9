//! Process-level analysis configuration.
//!
//! ```json
//! {
//!   "model_dir": "models/densenet121",
//!   "thresholds_path": "models/densenet121/thresholds.json",
//!   "session_pool_size": 2,
//!   "saliency": { "targets": { "top_findings": 3 }, "opacity": 0.5 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::errors::{ConfigError, ConfigValidator};
use super::onnx::OrtSessionConfig;
use crate::core::constants::{
    DEFAULT_OVERLAY_OPACITY, DEFAULT_OVERLAY_TOP_K, DEFAULT_RANKED_PREDICTIONS, NUM_CLASSES,
};
use crate::core::errors::AnalysisError;
use crate::domain::finding::Finding;
use crate::domain::pathology::PathologyClass;
use crate::domain::scores::ScoreVector;
use crate::processors::types::ResizeFilter;

/// Which classes receive a saliency overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaliencyTargets {
    /// The `k` highest-scoring findings (fewer if fewer classes cleared their threshold).
    TopFindings(usize),
    /// The `k` highest raw scores, detected or not.
    TopPredictions(usize),
    /// An explicit list of class names.
    Classes(Vec<String>),
}

impl Default for SaliencyTargets {
    fn default() -> Self {
        Self::TopFindings(DEFAULT_OVERLAY_TOP_K)
    }
}

impl SaliencyTargets {
    /// An explicit class list, failing on names outside the fixed class set.
    pub fn named<S: AsRef<str>>(names: &[S]) -> Result<Self, AnalysisError> {
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        for name in &names {
            name.parse::<PathologyClass>()?;
        }
        Ok(Self::Classes(names))
    }

    /// Resolves the targets for one analysis, in overlay order and without duplicates.
    pub fn select(
        &self,
        scores: &ScoreVector,
        findings: &[Finding],
    ) -> Result<Vec<PathologyClass>, AnalysisError> {
        let mut classes: Vec<PathologyClass> = match self {
            Self::TopFindings(k) => findings.iter().take(*k).map(|f| f.class).collect(),
            Self::TopPredictions(k) => scores.top(*k).into_iter().map(|(c, _)| c).collect(),
            Self::Classes(names) => names
                .iter()
                .map(|n| n.parse::<PathologyClass>())
                .collect::<Result<_, _>>()?,
        };
        let mut seen = [false; NUM_CLASSES];
        classes.retain(|c| !std::mem::replace(&mut seen[c.index()], true));
        Ok(classes)
    }
}

/// Saliency rendering options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaliencyConfig {
    pub targets: SaliencyTargets,
    /// Heat-map weight in the composite, in `[0, 1]`.
    pub opacity: f32,
    /// Filter used to upsample the activation grid to the original resolution.
    pub upsample_filter: ResizeFilter,
}

impl Default for SaliencyConfig {
    fn default() -> Self {
        Self {
            targets: SaliencyTargets::default(),
            opacity: DEFAULT_OVERLAY_OPACITY,
            upsample_filter: ResizeFilter::Triangle,
        }
    }
}

impl ConfigValidator for SaliencyConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_unit_interval(self.opacity, "saliency.opacity")?;
        if let SaliencyTargets::Classes(names) = &self.targets {
            for name in names {
                if name.parse::<PathologyClass>().is_err() {
                    return Err(ConfigError::InvalidConfig {
                        message: format!("saliency target '{name}' is not a known pathology class"),
                    });
                }
            }
        }
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Everything needed to construct a [`ChestXrayAnalyzer`](crate::pipeline::ChestXrayAnalyzer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Directory holding `manifest.json`, the backbone, and the head weights.
    pub model_dir: PathBuf,
    /// Threshold artifact.
    pub thresholds_path: PathBuf,
    /// Number of backbone sessions for concurrent analyses.
    pub session_pool_size: usize,
    /// ONNX Runtime options applied to every pooled session.
    pub ort_session: Option<OrtSessionConfig>,
    pub saliency: SaliencyConfig,
    /// Length of the raw-score ranking attached to each result.
    pub ranked_predictions: usize,
    /// Retry an inference failure flagged transient once before surfacing it.
    pub retry_transient_inference: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            thresholds_path: PathBuf::from("models/thresholds.json"),
            session_pool_size: 1,
            ort_session: None,
            saliency: SaliencyConfig::default(),
            ranked_predictions: DEFAULT_RANKED_PREDICTIONS,
            retry_transient_inference: true,
        }
    }
}

impl AnalysisConfig {
    /// Configuration for a model directory that also holds `thresholds.json`.
    pub fn for_model_dir(model_dir: impl Into<PathBuf>) -> Self {
        let model_dir = model_dir.into();
        Self {
            thresholds_path: model_dir.join("thresholds.json"),
            model_dir,
            ..Self::default()
        }
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            AnalysisError::config_error_with_source(
                format!("cannot read configuration '{}'", path.display()),
                e,
            )
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            AnalysisError::config_error_with_source(
                format!("configuration '{}' is malformed", path.display()),
                e,
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Location of the model manifest.
    pub fn manifest_path(&self) -> PathBuf {
        self.model_dir.join("manifest.json")
    }
}

impl ConfigValidator for AnalysisConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_positive_usize(self.session_pool_size, "session_pool_size")?;
        self.validate_thread_count(self.session_pool_size)?;
        if let Some(ort) = &self.ort_session {
            if let Some(intra) = ort.intra_threads {
                self.validate_thread_count(intra)?;
            }
            if let Some(inter) = ort.inter_threads {
                self.validate_thread_count(inter)?;
            }
        }
        if self.ranked_predictions > NUM_CLASSES {
            return Err(ConfigError::InvalidConfig {
                message: format!(
                    "ranked_predictions is {}, at most {NUM_CLASSES} classes exist",
                    self.ranked_predictions
                ),
            });
        }
        self.saliency.validate()
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::finding::classify;
    use crate::domain::thresholds::ThresholdTable;

    fn scores() -> ScoreVector {
        let mut values = [0.1; NUM_CLASSES];
        values[PathologyClass::Edema.index()] = 0.9;
        values[PathologyClass::Mass.index()] = 0.8;
        values[PathologyClass::Hernia.index()] = 0.7;
        values[PathologyClass::Nodule.index()] = 0.6;
        ScoreVector::new(&values).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.saliency.targets, SaliencyTargets::TopFindings(3));
        assert_eq!(config.saliency.opacity, 0.5);
        assert_eq!(config.ranked_predictions, 5);
        assert!(config.retry_transient_inference);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_top_findings_selection() {
        let scores = scores();
        let findings = classify(&scores, &ThresholdTable::uniform(0.75).unwrap());
        let selected = SaliencyTargets::TopFindings(3)
            .select(&scores, &findings)
            .unwrap();
        assert_eq!(selected, vec![PathologyClass::Edema, PathologyClass::Mass]);
    }

    #[test]
    fn test_top_predictions_ignore_thresholds() {
        let scores = scores();
        let selected = SaliencyTargets::TopPredictions(4).select(&scores, &[]).unwrap();
        assert_eq!(
            selected,
            vec![
                PathologyClass::Edema,
                PathologyClass::Mass,
                PathologyClass::Hernia,
                PathologyClass::Nodule
            ]
        );
    }

    #[test]
    fn test_named_classes_deduplicated() {
        let targets = SaliencyTargets::named(&["pleural thickening", "Hernia", "HERNIA"]).unwrap();
        let selected = targets.select(&scores(), &[]).unwrap();
        assert_eq!(
            selected,
            vec![PathologyClass::PleuralThickening, PathologyClass::Hernia]
        );
    }

    #[test]
    fn test_unknown_named_class_is_configuration_error() {
        let err = SaliencyTargets::named(&["Covid-19"]).unwrap_err();
        assert!(err.is_startup_fatal());

        let config = SaliencyConfig {
            targets: SaliencyTargets::Classes(vec!["Covid-19".into()]),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_limits() {
        let mut config = AnalysisConfig::default();
        config.session_pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.ranked_predictions = 15;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.saliency.opacity = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.json");
        std::fs::write(
            &path,
            r#"{
                "model_dir": "/opt/models/cxr",
                "thresholds_path": "/opt/models/cxr/thresholds.json",
                "session_pool_size": 4,
                "saliency": { "targets": { "top_predictions": 5 }, "opacity": 0.4 }
            }"#,
        )
        .unwrap();

        let config = AnalysisConfig::from_path(&path).unwrap();
        assert_eq!(config.session_pool_size, 4);
        assert_eq!(config.saliency.targets, SaliencyTargets::TopPredictions(5));
        assert_eq!(config.saliency.upsample_filter, ResizeFilter::Triangle);
        assert_eq!(
            config.manifest_path(),
            PathBuf::from("/opt/models/cxr/manifest.json")
        );
    }

    #[test]
    fn test_for_model_dir() {
        let config = AnalysisConfig::for_model_dir("weights");
        assert_eq!(config.thresholds_path, PathBuf::from("weights/thresholds.json"));
    }
}
