//! ONNX Runtime backbone with a pool of sessions for concurrent analyses.

use ndarray::{ArrayView4, Axis};
use ort::execution_providers::ExecutionProviderDispatch;
use ort::logging::LogLevel;
use ort::session::Session;
use ort::session::builder::SessionBuilder;
use ort::value::{TensorRef, ValueType};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::engine::{FeatureExtractor, FeatureMap};
use crate::core::config::{
    ConfigValidator, ModelManifest, OrtExecutionProvider, OrtGraphOptimizationLevel,
    OrtSessionConfig,
};
use crate::core::errors::AnalysisError;
use crate::processors::types::ChannelOrder;

/// Backbone network run through ONNX Runtime.
///
/// Holds `session_pool_size` sessions; each call locks the next one round-robin so
/// concurrent callers rarely contend.
pub struct OrtFeatureExtractor {
    sessions: Vec<Mutex<Session>>,
    next_idx: AtomicUsize,
    input_name: String,
    output_name: String,
    layout: ChannelOrder,
    model_path: PathBuf,
    model_name: String,
}

impl std::fmt::Debug for OrtFeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrtFeatureExtractor")
            .field("sessions", &self.sessions.len())
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("layout", &self.layout)
            .field("model_path", &self.model_path)
            .field("model_name", &self.model_name)
            .finish()
    }
}

impl OrtFeatureExtractor {
    /// Opens the backbone named by `manifest` inside `model_dir`.
    pub fn from_manifest(
        model_dir: &Path,
        manifest: &ModelManifest,
        session_pool_size: usize,
        ort_session: Option<&OrtSessionConfig>,
    ) -> Result<Self, AnalysisError> {
        let path = manifest.backbone_path(model_dir);
        manifest.validate_artifact_path(&path).map_err(|e| {
            AnalysisError::model_load_error(
                &path,
                "backbone model is not available",
                Some("check model_dir and the 'backbone' entry of manifest.json"),
                Some(e),
            )
        })?;

        let pool_size = session_pool_size.max(1);
        let mut sessions = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            sessions.push(Mutex::new(Self::open_session(&path, ort_session)?));
        }

        let extractor = Self {
            sessions,
            next_idx: AtomicUsize::new(0),
            input_name: manifest.input_name.clone(),
            output_name: manifest.feature_output.clone(),
            layout: manifest.feature_layout,
            model_name: manifest
                .architecture
                .clone()
                .unwrap_or_else(|| manifest.version.clone()),
            model_path: path,
        };
        extractor.check_io_names()?;
        tracing::info!(
            model = %extractor.model_name,
            path = %extractor.model_path.display(),
            pool_size,
            input_shape = ?extractor.primary_input_shape(),
            "loaded backbone"
        );
        Ok(extractor)
    }

    fn open_session(
        path: &Path,
        ort_session: Option<&OrtSessionConfig>,
    ) -> Result<Session, AnalysisError> {
        let load_error = |e: ort::Error| {
            AnalysisError::model_load_error(
                path,
                "failed to create ONNX session",
                Some("check device/EP configuration and model file"),
                Some(e),
            )
        };
        let builder = Session::builder().map_err(load_error)?;
        let builder = match ort_session {
            Some(cfg) => Self::apply_ort_config(builder, cfg).map_err(load_error)?,
            None => builder.with_log_level(LogLevel::Error).map_err(load_error)?,
        };
        builder.commit_from_file(path).map_err(load_error)
    }

    fn apply_ort_config(
        mut builder: SessionBuilder,
        cfg: &OrtSessionConfig,
    ) -> Result<SessionBuilder, ort::Error> {
        builder = builder.with_log_level(LogLevel::Error)?;
        if let Some(intra) = cfg.intra_threads {
            builder = builder.with_intra_threads(intra)?;
        }
        if let Some(inter) = cfg.inter_threads {
            builder = builder.with_inter_threads(inter)?;
        }
        if let Some(par) = cfg.parallel_execution {
            builder = builder.with_parallel_execution(par)?;
        }
        if let Some(level) = cfg.optimization_level {
            use ort::session::builder::GraphOptimizationLevel as GOL;
            let mapped = match level {
                OrtGraphOptimizationLevel::DisableAll => GOL::Disable,
                OrtGraphOptimizationLevel::Level1 => GOL::Level1,
                OrtGraphOptimizationLevel::Level2 => GOL::Level2,
                OrtGraphOptimizationLevel::Level3 => GOL::Level3,
            };
            builder = builder.with_optimization_level(mapped)?;
        }
        if let Some(eps) = &cfg.execution_providers {
            let providers = Self::build_execution_providers(eps);
            if !providers.is_empty() {
                builder = builder.with_execution_providers(providers)?;
            }
        }
        Ok(builder)
    }

    fn build_execution_providers(eps: &[OrtExecutionProvider]) -> Vec<ExecutionProviderDispatch> {
        let mut providers = Vec::new();
        for ep in eps {
            match ep {
                OrtExecutionProvider::CPU => {
                    providers
                        .push(ort::execution_providers::CPUExecutionProvider::default().build());
                }
                #[cfg(feature = "cuda")]
                OrtExecutionProvider::CUDA { device_id } => {
                    let mut cuda = ort::execution_providers::CUDAExecutionProvider::default();
                    if let Some(id) = device_id {
                        cuda = cuda.with_device_id(*id);
                    }
                    providers.push(cuda.build());
                }
                #[cfg(not(feature = "cuda"))]
                OrtExecutionProvider::CUDA { .. } => {
                    tracing::warn!("CUDA execution provider requested but the `cuda` feature is disabled; skipping");
                }
            }
        }
        providers
    }

    fn check_io_names(&self) -> Result<(), AnalysisError> {
        let session = self.sessions[0].lock().map_err(|_| self.lock_error(0))?;
        let has_input = session.inputs.iter().any(|i| i.name == self.input_name);
        let has_output = session.outputs.iter().any(|o| o.name == self.output_name);
        if has_input && has_output {
            return Ok(());
        }
        let inputs: Vec<&str> = session.inputs.iter().map(|i| i.name.as_str()).collect();
        let outputs: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
        Err(AnalysisError::model_load_error(
            &self.model_path,
            format!(
                "expected input '{}' and output '{}', model has inputs {:?} and outputs {:?}",
                self.input_name, self.output_name, inputs, outputs
            ),
            Some("export the backbone with the last convolutional block as a named output"),
            None::<std::io::Error>,
        ))
    }

    /// Input shape declared by the model; dynamic dimensions are `-1`.
    pub fn primary_input_shape(&self) -> Option<Vec<i64>> {
        let session = self.sessions.first()?.lock().ok()?;
        let input = session.inputs.first()?;
        match &input.input_type {
            ValueType::Tensor { shape, .. } => Some(shape.iter().copied().collect()),
            _ => None,
        }
    }

    /// Path of the backbone file.
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn lock_error(&self, idx: usize) -> AnalysisError {
        AnalysisError::Inference {
            model_name: self.model_name.clone(),
            context: format!(
                "failed to acquire session lock for session {}/{}",
                idx,
                self.sessions.len()
            ),
            transient: false,
            source: None,
        }
    }
}

impl FeatureExtractor for OrtFeatureExtractor {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn extract(&self, input: ArrayView4<'_, f32>) -> Result<FeatureMap, AnalysisError> {
        let input_shape = input.shape().to_vec();
        let input_tensor = TensorRef::from_array_view(input).map_err(|e| {
            AnalysisError::inference_error(
                &self.model_name,
                format!("failed to convert input tensor with shape {input_shape:?}"),
                e,
            )
        })?;
        let inputs = ort::inputs![self.input_name.as_str() => input_tensor];

        let idx = self.next_idx.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[idx]
            .lock()
            .map_err(|_| self.lock_error(idx))?;

        let outputs = session.run(inputs).map_err(|e| {
            tracing::error!(
                model = %self.model_name,
                session = idx,
                input_shape = ?input_shape,
                error = %e,
                "ONNX Runtime run failed"
            );
            AnalysisError::transient_inference_error(
                &self.model_name,
                format!(
                    "ONNX Runtime inference failed with input '{}' -> output '{}'",
                    self.input_name, self.output_name
                ),
                e,
            )
        })?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                AnalysisError::inference_error(
                    &self.model_name,
                    format!("failed to extract output '{}' as f32", self.output_name),
                    e,
                )
            })?;

        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        if dims.len() != 4 || dims[0] != 1 {
            return Err(AnalysisError::shape_mismatch(
                &self.model_name,
                "feature output (expected [1, ., ., .])",
                &[1, 0, 0, 0],
                &dims,
            ));
        }
        let view = ArrayView4::from_shape((dims[0], dims[1], dims[2], dims[3]), data)?;
        let chw = match self.layout {
            ChannelOrder::CHW => view.index_axis(Axis(0), 0).to_owned(),
            ChannelOrder::HWC => view
                .index_axis(Axis(0), 0)
                .permuted_axes([2, 0, 1])
                .as_standard_layout()
                .into_owned(),
        };
        Ok(FeatureMap::new(chw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_backbone_is_model_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = ModelManifest::new("v1", 1024);
        let err = OrtFeatureExtractor::from_manifest(dir.path(), &manifest, 2, None).unwrap_err();
        assert!(matches!(err, AnalysisError::ModelLoad { .. }));
        assert!(err.is_startup_fatal());
        assert!(err.to_string().contains("backbone.onnx"));
    }

    #[test]
    fn test_corrupt_backbone_is_model_load_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("backbone.onnx"), b"not an onnx graph").unwrap();
        let manifest = ModelManifest::new("v1", 1024);
        let err = OrtFeatureExtractor::from_manifest(dir.path(), &manifest, 1, None).unwrap_err();
        assert!(matches!(err, AnalysisError::ModelLoad { .. }));
    }

    #[test]
    fn test_cpu_provider_list() {
        let providers = OrtFeatureExtractor::build_execution_providers(&[OrtExecutionProvider::CPU]);
        assert_eq!(providers.len(), 1);
    }
}
