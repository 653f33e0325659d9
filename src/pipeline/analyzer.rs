//! End-to-end chest radiograph analysis.

use image::DynamicImage;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::core::config::{
    AnalysisConfig, ConfigValidator, ModelManifest, OrtSessionConfig, SaliencyConfig,
    SaliencyTargets,
};
use crate::core::errors::AnalysisError;
use crate::core::inference::{Activations, InferenceEngine};
use crate::domain::finding::{classify, rank_predictions};
use crate::domain::pathology::PathologyClass;
use crate::domain::result::{AnalysisResult, AnalysisResultAssembler};
use crate::domain::thresholds::ThresholdTable;
use crate::processors::preprocess::{ImagePreprocessor, PreparedImage};
use crate::processors::saliency::{SaliencyMapGenerator, SaliencyOverlay};
use crate::utils::image as image_utils;

/// Builder for [`ChestXrayAnalyzer`].
///
/// # Example
///
/// ```no_run
/// use cxr_analysis::pipeline::ChestXrayAnalyzerBuilder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let analyzer = ChestXrayAnalyzerBuilder::new("models/densenet121")
///     .thresholds_path("models/densenet121/thresholds.json")
///     .session_pool_size(2)
///     .build()?;
///
/// let result = analyzer.analyze_path("scan.png")?;
/// for finding in result.findings() {
///     println!("{}: {:.3}", finding.class, finding.score);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ChestXrayAnalyzerBuilder {
    model_dir: PathBuf,
    thresholds_path: Option<PathBuf>,
    session_pool_size: Option<usize>,
    ort_session_config: Option<OrtSessionConfig>,
    saliency: Option<SaliencyConfig>,
    ranked_predictions: Option<usize>,
    retry_transient_inference: Option<bool>,
}

impl ChestXrayAnalyzerBuilder {
    /// Starts a builder for the model in `model_dir`.
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            thresholds_path: None,
            session_pool_size: None,
            ort_session_config: None,
            saliency: None,
            ranked_predictions: None,
            retry_transient_inference: None,
        }
    }

    /// Threshold artifact; defaults to `thresholds.json` in the model directory.
    pub fn thresholds_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.thresholds_path = Some(path.into());
        self
    }

    pub fn session_pool_size(mut self, size: usize) -> Self {
        self.session_pool_size = Some(size);
        self
    }

    /// Sets the ONNX Runtime session configuration applied to every pooled session.
    pub fn ort_session(mut self, config: OrtSessionConfig) -> Self {
        self.ort_session_config = Some(config);
        self
    }

    pub fn saliency(mut self, config: SaliencyConfig) -> Self {
        self.saliency = Some(config);
        self
    }

    pub fn ranked_predictions(mut self, k: usize) -> Self {
        self.ranked_predictions = Some(k);
        self
    }

    pub fn retry_transient_inference(mut self, enabled: bool) -> Self {
        self.retry_transient_inference = Some(enabled);
        self
    }

    /// The configuration this builder describes.
    pub fn into_config(self) -> AnalysisConfig {
        let defaults = AnalysisConfig::for_model_dir(&self.model_dir);
        AnalysisConfig {
            thresholds_path: self.thresholds_path.unwrap_or(defaults.thresholds_path),
            session_pool_size: self.session_pool_size.unwrap_or(defaults.session_pool_size),
            ort_session: self.ort_session_config,
            saliency: self.saliency.unwrap_or(defaults.saliency),
            ranked_predictions: self.ranked_predictions.unwrap_or(defaults.ranked_predictions),
            retry_transient_inference: self
                .retry_transient_inference
                .unwrap_or(defaults.retry_transient_inference),
            model_dir: self.model_dir,
        }
    }

    pub fn build(self) -> Result<ChestXrayAnalyzer, AnalysisError> {
        ChestXrayAnalyzer::from_config(&self.into_config())
    }
}

/// The analysis context: preprocessing, the loaded model, thresholds, and
/// saliency rendering.
///
/// Immutable once built. Share it by reference (or `Arc`) between threads; every
/// method takes `&self`.
#[derive(Debug)]
pub struct ChestXrayAnalyzer {
    preprocessor: ImagePreprocessor,
    engine: InferenceEngine,
    saliency: SaliencyMapGenerator,
    targets: SaliencyTargets,
    assembler: AnalysisResultAssembler,
    ranked_predictions: usize,
    retry_transient_inference: bool,
}

impl ChestXrayAnalyzer {
    /// Loads the manifest, thresholds, backbone, and head. Any failure here is a
    /// configuration error and the analyzer must not serve requests.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        let start = Instant::now();
        config.validate()?;
        let manifest = ModelManifest::from_path(config.manifest_path())?;
        let thresholds = ThresholdTable::from_path(&config.thresholds_path)?;
        let preprocessor = ImagePreprocessor::from_config(&manifest.preprocess)?;
        let engine = InferenceEngine::from_manifest(
            &config.model_dir,
            &manifest,
            config.session_pool_size,
            config.ort_session.as_ref(),
        )?;
        let analyzer = Self::from_parts(preprocessor, engine, thresholds, config)?;
        tracing::info!(
            model_version = analyzer.model_version(),
            thresholds = analyzer.thresholds().version().unwrap_or("unversioned"),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "analyzer ready"
        );
        Ok(analyzer)
    }

    /// Assembles an analyzer from already-loaded components.
    pub fn from_parts(
        preprocessor: ImagePreprocessor,
        engine: InferenceEngine,
        thresholds: ThresholdTable,
        config: &AnalysisConfig,
    ) -> Result<Self, AnalysisError> {
        config.validate()?;
        let assembler = AnalysisResultAssembler::new(engine.model_version(), Arc::new(thresholds));
        Ok(Self {
            preprocessor,
            engine,
            saliency: SaliencyMapGenerator::from_config(&config.saliency)?,
            targets: config.saliency.targets.clone(),
            assembler,
            ranked_predictions: config.ranked_predictions,
            retry_transient_inference: config.retry_transient_inference,
        })
    }

    pub fn model_version(&self) -> &str {
        self.engine.model_version()
    }

    pub fn thresholds(&self) -> &ThresholdTable {
        self.assembler.thresholds()
    }

    pub fn preprocessor(&self) -> &ImagePreprocessor {
        &self.preprocessor
    }

    /// Analyzes an encoded image (PNG or JPEG bytes).
    pub fn analyze_bytes(&self, bytes: &[u8]) -> Result<AnalysisResult, AnalysisError> {
        self.analyze(&image_utils::decode(bytes)?)
    }

    /// Analyzes an image file.
    pub fn analyze_path(&self, path: impl AsRef<Path>) -> Result<AnalysisResult, AnalysisError> {
        self.analyze(&image_utils::load_image(path.as_ref())?)
    }

    /// Analyzes a decoded image with the configured overlay targets.
    pub fn analyze(&self, image: &DynamicImage) -> Result<AnalysisResult, AnalysisError> {
        self.analyze_with_targets(image, &self.targets)
    }

    /// Analyzes a decoded image, rendering overlays for `targets`.
    ///
    /// All-or-nothing: any failure returns an error and no partial result.
    pub fn analyze_with_targets(
        &self,
        image: &DynamicImage,
        targets: &SaliencyTargets,
    ) -> Result<AnalysisResult, AnalysisError> {
        let start = Instant::now();
        let prepared = self.preprocessor.preprocess(image)?;
        let activations = self.capture(&prepared)?;

        let scores = activations.scores;
        let findings = classify(&scores, self.thresholds());
        let ranked = rank_predictions(&scores, self.thresholds(), self.ranked_predictions);
        let requested = targets.select(&scores, &findings)?;
        let overlays = self.overlays(&prepared, &activations, &requested)?;

        let result = self
            .assembler
            .assemble(scores, findings, ranked, &requested, overlays)?;
        tracing::debug!(
            findings = result.findings().len(),
            overlays = result.overlays().len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "analysis complete"
        );
        Ok(result)
    }

    /// Renders one overlay for the class named `class_name`, e.g. for a class the
    /// caller picked from the ranked predictions after the fact.
    ///
    /// Names outside the fixed class set fail with a configuration error.
    pub fn explain(
        &self,
        image: &DynamicImage,
        class_name: &str,
    ) -> Result<SaliencyOverlay, AnalysisError> {
        let class: PathologyClass = class_name.parse()?;
        let prepared = self.preprocessor.preprocess(image)?;
        let activations = self.capture(&prepared)?;
        let gradients = self.engine.gradients(&activations, class)?;
        self.saliency
            .generate(&activations.features, &gradients, &prepared)
    }

    fn capture(&self, prepared: &PreparedImage) -> Result<Activations, AnalysisError> {
        match self.engine.capture(&prepared.tensor) {
            Err(e) if self.retry_transient_inference && e.is_retryable() => {
                tracing::warn!(error = %e, "transient inference failure; retrying once");
                self.engine.capture(&prepared.tensor)
            }
            other => other,
        }
    }

    fn overlays(
        &self,
        prepared: &PreparedImage,
        activations: &Activations,
        classes: &[PathologyClass],
    ) -> Result<Vec<SaliencyOverlay>, AnalysisError> {
        classes
            .par_iter()
            .map(|&class| {
                let gradients = self.engine.gradients(activations, class)?;
                self.saliency
                    .generate(&activations.features, &gradients, prepared)
            })
            .collect()
    }
}
