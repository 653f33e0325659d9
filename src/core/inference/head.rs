//! Classifier head: ReLU, global average pooling, and a linear layer per class.
//!
//! The head runs in candle so the gradient of a class logit with respect to the
//! backbone's last convolutional activation comes from autograd. Only this block is
//! differentiated; the backbone itself is never run backwards.

use candle_core::{D, DType, Device, Tensor, Var};
use candle_nn::{Linear, Module, VarBuilder};
use ndarray::{Array1, Array2, Array3};
use std::path::Path;

use super::engine::{FeatureMap, GradientMap};
use crate::core::constants::NUM_CLASSES;
use crate::core::errors::AnalysisError;
use crate::domain::pathology::PathologyClass;
use crate::domain::scores::ScoreVector;

const HEAD_NAME: &str = "classifier-head";

/// Linear multi-label head applied to pooled backbone features.
#[derive(Debug, Clone)]
pub struct ClassifierHead {
    linear: Linear,
    in_features: usize,
    device: Device,
}

impl ClassifierHead {
    /// Loads the head from a safetensors file holding `{prefix}.weight` with shape
    /// `[14, in_features]` and `{prefix}.bias` with shape `[14]`.
    pub fn load(path: &Path, prefix: &str, in_features: usize) -> Result<Self, AnalysisError> {
        let device = Device::Cpu;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[path], DType::F32, &device).map_err(|e| {
                AnalysisError::model_load_error(
                    path,
                    "failed to map classifier head weights",
                    Some("verify the head file exists and is a safetensors archive"),
                    Some(e),
                )
            })?
        };
        let linear = candle_nn::linear(in_features, NUM_CLASSES, vb.pp(prefix)).map_err(|e| {
            AnalysisError::model_load_error(
                path,
                format!("missing or mis-shaped '{prefix}.weight' / '{prefix}.bias'"),
                Some("check head_prefix and feature_channels in manifest.json"),
                Some(e),
            )
        })?;
        tracing::info!(
            path = %path.display(),
            in_features,
            classes = NUM_CLASSES,
            "loaded classifier head"
        );
        Ok(Self {
            linear,
            in_features,
            device,
        })
    }

    /// Builds a head from an in-memory weight matrix `[14, in_features]` and bias `[14]`.
    pub fn from_weights(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self, AnalysisError> {
        let (rows, in_features) = weight.dim();
        if rows != NUM_CLASSES || bias.len() != NUM_CLASSES || in_features == 0 {
            return Err(AnalysisError::config_error(format!(
                "classifier head expects weight [{NUM_CLASSES}, K>0] and bias [{NUM_CLASSES}], got {:?} and [{}]",
                weight.dim(),
                bias.len()
            )));
        }
        let device = Device::Cpu;
        let weight = Tensor::from_vec(
            weight.iter().copied().collect::<Vec<f32>>(),
            (rows, in_features),
            &device,
        )?;
        let bias = Tensor::from_vec(bias.to_vec(), NUM_CLASSES, &device)?;
        Ok(Self {
            linear: Linear::new(weight, Some(bias)),
            in_features,
            device,
        })
    }

    /// Number of feature channels the head consumes.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    fn to_tensor(&self, features: &FeatureMap) -> Result<Tensor, AnalysisError> {
        let (k, h, w) = features.dim();
        if k != self.in_features {
            return Err(AnalysisError::shape_mismatch(
                HEAD_NAME,
                "feature map",
                &[self.in_features, h, w],
                &[k, h, w],
            ));
        }
        Ok(Tensor::from_vec(
            features.view().iter().copied().collect::<Vec<f32>>(),
            (1, k, h, w),
            &self.device,
        )?)
    }

    /// Pre-sigmoid class logits, shape `[1, 14]`.
    fn logits(&self, features: &Tensor) -> candle_core::Result<Tensor> {
        let pooled = features.relu()?.flatten_from(2)?.mean(D::Minus1)?;
        self.linear.forward(&pooled)
    }

    fn scores_from_logits(logits: &Tensor) -> Result<ScoreVector, AnalysisError> {
        let logits = logits.flatten_all()?.to_vec1::<f32>()?;
        let probabilities: Vec<f32> = logits.iter().map(|&z| 1.0 / (1.0 + (-z).exp())).collect();
        ScoreVector::new(&probabilities)
    }

    /// Independent sigmoid probability per class.
    pub fn scores(&self, features: &FeatureMap) -> Result<ScoreVector, AnalysisError> {
        let x = self.to_tensor(features)?;
        Self::scores_from_logits(&self.logits(&x)?)
    }

    /// Gradient of `class`'s logit with respect to `features`.
    pub fn gradients(
        &self,
        features: &FeatureMap,
        class: PathologyClass,
    ) -> Result<GradientMap, AnalysisError> {
        let var = Var::from_tensor(&self.to_tensor(features)?)?;
        let logits = self.logits(var.as_tensor())?;
        let grads = logits.narrow(1, class.index(), 1)?.sum_all()?.backward()?;
        let grad = grads.get(var.as_tensor()).ok_or_else(|| AnalysisError::Inference {
            model_name: HEAD_NAME.to_string(),
            context: format!("no gradient reached the feature map for {class}"),
            transient: false,
            source: None,
        })?;

        let values = grad.flatten_all()?.to_vec1::<f32>()?;
        let data = Array3::from_shape_vec(features.dim(), values)?;
        Ok(GradientMap::new(class, data))
    }
}
