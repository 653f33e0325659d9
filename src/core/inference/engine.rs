//! The inference engine: backbone feature extraction plus the classifier head.

use ndarray::{Array3, ArrayView3, ArrayView4};
use std::fmt;
use std::path::Path;
use std::time::Instant;

use super::head::ClassifierHead;
use super::session::OrtFeatureExtractor;
use crate::core::config::{ModelManifest, OrtSessionConfig};
use crate::core::errors::AnalysisError;
use crate::domain::pathology::PathologyClass;
use crate::domain::scores::ScoreVector;
use crate::processors::preprocess::ImageTensor;

/// Activation of the backbone's last convolutional block, shape `[K, h, w]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
    data: Array3<f32>,
}

impl FeatureMap {
    pub fn new(data: Array3<f32>) -> Self {
        Self { data }
    }

    /// `(channels, height, width)`.
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }
}

/// Gradient of one class logit with respect to a [`FeatureMap`], same shape.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientMap {
    class: PathologyClass,
    data: Array3<f32>,
}

impl GradientMap {
    pub fn new(class: PathologyClass, data: Array3<f32>) -> Self {
        Self { class, data }
    }

    /// Class whose logit was differentiated.
    pub fn class(&self) -> PathologyClass {
        self.class
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }
}

/// Scores plus the activation they were computed from.
///
/// One capture serves any number of gradient requests, so overlays for several
/// classes need a single backbone pass.
#[derive(Debug, Clone)]
pub struct Activations {
    pub scores: ScoreVector,
    pub features: FeatureMap,
}

/// Result of [`InferenceEngine::forward_with_gradients`].
#[derive(Debug, Clone)]
pub struct GradientCapture {
    pub scores: ScoreVector,
    pub features: FeatureMap,
    pub gradients: GradientMap,
}

/// Maps a normalized image batch of one to the last convolutional activation.
///
/// Implementations must be deterministic and safe to call from many threads.
pub trait FeatureExtractor: Send + Sync + fmt::Debug {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Runs the backbone on a `[1, ...]` input tensor.
    fn extract(&self, input: ArrayView4<'_, f32>) -> Result<FeatureMap, AnalysisError>;
}

/// Owns the pretrained classifier.
///
/// Immutable after construction and shared read-only between concurrent analyses.
#[derive(Debug)]
pub struct InferenceEngine {
    extractor: Box<dyn FeatureExtractor>,
    head: ClassifierHead,
    input_shape: [usize; 4],
    model_version: String,
}

impl InferenceEngine {
    /// Assembles an engine from its parts.
    pub fn new(
        extractor: Box<dyn FeatureExtractor>,
        head: ClassifierHead,
        input_shape: [usize; 4],
        model_version: impl Into<String>,
    ) -> Self {
        Self {
            extractor,
            head,
            input_shape,
            model_version: model_version.into(),
        }
    }

    /// Loads the backbone session pool and the head described by `manifest`.
    pub fn from_manifest(
        model_dir: &Path,
        manifest: &ModelManifest,
        session_pool_size: usize,
        ort_session: Option<&OrtSessionConfig>,
    ) -> Result<Self, AnalysisError> {
        let extractor =
            OrtFeatureExtractor::from_manifest(model_dir, manifest, session_pool_size, ort_session)?;
        let head = ClassifierHead::load(
            &manifest.head_path(model_dir),
            &manifest.head_prefix,
            manifest.feature_channels,
        )?;
        Ok(Self::new(
            Box::new(extractor),
            head,
            manifest.preprocess.tensor_shape(),
            manifest.version.clone(),
        ))
    }

    /// Identifier of the loaded model artifact.
    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Input shape the backbone expects, including the batch dimension.
    pub fn input_shape(&self) -> [usize; 4] {
        self.input_shape
    }

    fn check_input(&self, tensor: &ImageTensor) -> Result<(), AnalysisError> {
        if tensor.shape() != self.input_shape.as_slice() {
            tracing::error!(
                model = self.extractor.name(),
                expected = ?self.input_shape,
                actual = ?tensor.shape(),
                "input tensor does not match the model's input shape"
            );
            return Err(AnalysisError::shape_mismatch(
                self.extractor.name(),
                "input tensor",
                &self.input_shape,
                tensor.shape(),
            ));
        }
        Ok(())
    }

    /// Runs the backbone and the head, keeping the activation for later gradient requests.
    pub fn capture(&self, tensor: &ImageTensor) -> Result<Activations, AnalysisError> {
        self.check_input(tensor)?;
        let start = Instant::now();
        let features = self.extractor.extract(tensor.view())?;
        let scores = self.head.scores(&features).inspect_err(|e| {
            tracing::error!(
                model = self.extractor.name(),
                input_shape = ?tensor.shape(),
                features = ?features.dim(),
                error = %e,
                "classifier head produced unusable scores"
            );
        })?;
        tracing::debug!(
            model = self.extractor.name(),
            features = ?features.dim(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "forward pass complete"
        );
        Ok(Activations { scores, features })
    }

    /// One sigmoid probability per class.
    pub fn forward(&self, tensor: &ImageTensor) -> Result<ScoreVector, AnalysisError> {
        Ok(self.capture(tensor)?.scores)
    }

    /// Gradient of `class`'s logit with respect to a captured activation.
    pub fn gradients(
        &self,
        activations: &Activations,
        class: PathologyClass,
    ) -> Result<GradientMap, AnalysisError> {
        self.head.gradients(&activations.features, class).inspect_err(|e| {
            tracing::error!(
                model = self.extractor.name(),
                features = ?activations.features.dim(),
                class = class.name(),
                error = %e,
                "gradient extraction failed"
            );
        })
    }

    /// Scores, the last convolutional activation, and the target class's gradient.
    pub fn forward_with_gradients(
        &self,
        tensor: &ImageTensor,
        class: PathologyClass,
    ) -> Result<GradientCapture, AnalysisError> {
        let activations = self.capture(tensor)?;
        let gradients = self.gradients(&activations, class)?;
        Ok(GradientCapture {
            scores: activations.scores,
            features: activations.features,
            gradients,
        })
    }
}
