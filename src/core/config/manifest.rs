//! Model artifact manifest.
//!
//! A model directory holds three files:
//!
//! - `manifest.json`: this manifest;
//! - the ONNX backbone, which maps a normalized image to the activation of the last
//!   convolutional block;
//! - the classifier head weights (safetensors), applied as ReLU, global average
//!   pooling, and a linear layer with one output per pathology class.
//!
//! The manifest records the training-time preprocessing contract. Nothing here has a
//! safe default beyond what the original training pipeline used, so every field is
//! explicit in the JSON shipped with the weights.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::errors::{ConfigError, ConfigValidator};
use crate::core::constants::{DEFAULT_INPUT_SIZE, DEFAULT_MAX_INPUT_PIXELS, NUM_CLASSES};
use crate::core::errors::AnalysisError;
use crate::domain::pathology::PathologyClass;
use crate::processors::types::{ChannelOrder, ResizeFilter, ResizePolicy};

/// Preprocessing contract of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Classifier input size as (height, width).
    pub input_size: (u32, u32),
    /// Channels the classifier expects (1 or 3).
    pub channels: usize,
    /// Layout of the input tensor.
    pub channel_order: ChannelOrder,
    /// How the source image is mapped to `input_size`.
    pub resize_policy: ResizePolicy,
    /// Filter used when resizing to `input_size`.
    pub resize_filter: ResizeFilter,
    /// Multiplier applied to 8-bit intensities before mean/std.
    pub scale: f32,
    /// Per-channel mean subtracted after scaling.
    pub mean: Vec<f32>,
    /// Per-channel standard deviation divided after mean subtraction.
    pub std: Vec<f32>,
    /// Upper bound on decoded image area.
    pub max_input_pixels: u64,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            channels: 3,
            channel_order: ChannelOrder::HWC,
            resize_policy: ResizePolicy::Stretch,
            resize_filter: ResizeFilter::Lanczos3,
            scale: 1.0 / 255.0,
            mean: vec![0.0; 3],
            std: vec![1.0; 3],
            max_input_pixels: DEFAULT_MAX_INPUT_PIXELS,
        }
    }
}

impl PreprocessConfig {
    /// Expected input tensor shape including the batch dimension.
    pub fn tensor_shape(&self) -> [usize; 4] {
        let (h, w) = (self.input_size.0 as usize, self.input_size.1 as usize);
        match self.channel_order {
            ChannelOrder::CHW => [1, self.channels, h, w],
            ChannelOrder::HWC => [1, h, w, self.channels],
        }
    }
}

impl ConfigValidator for PreprocessConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_image_dimensions(self.input_size.1, self.input_size.0)?;
        if !matches!(self.channels, 1 | 3) {
            return Err(ConfigError::InvalidConfig {
                message: format!("channels must be 1 or 3, got {}", self.channels),
            });
        }
        if self.mean.len() != self.channels || self.std.len() != self.channels {
            return Err(ConfigError::InvalidConfig {
                message: format!(
                    "mean and std must have {} entries, got {} and {}",
                    self.channels,
                    self.mean.len(),
                    self.std.len()
                ),
            });
        }
        self.validate_positive_f32(self.scale, "scale")?;
        for &s in &self.std {
            self.validate_positive_f32(s, "std")?;
        }
        if self.max_input_pixels == 0 {
            return Err(ConfigError::InvalidConfig {
                message: "max_input_pixels must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Manifest describing a versioned model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    /// Version identifier recorded in every analysis result.
    pub version: String,
    /// Architecture label, informational.
    #[serde(default)]
    pub architecture: Option<String>,
    /// Output class names; must equal the fixed [`PathologyClass`] order.
    pub classes: Vec<String>,
    /// Backbone file name, relative to the model directory.
    #[serde(default = "default_backbone")]
    pub backbone: String,
    /// Name of the backbone's image input.
    #[serde(default = "default_input_name")]
    pub input_name: String,
    /// Name of the backbone output holding the last convolutional activation.
    #[serde(default = "default_feature_output")]
    pub feature_output: String,
    /// Layout of the feature output.
    #[serde(default = "default_feature_layout")]
    pub feature_layout: ChannelOrder,
    /// Number of channels in the feature output.
    pub feature_channels: usize,
    /// Head weights file name, relative to the model directory.
    #[serde(default = "default_head")]
    pub head: String,
    /// Tensor name prefix of the linear layer inside the head file.
    #[serde(default = "default_head_prefix")]
    pub head_prefix: String,
    /// Preprocessing contract.
    #[serde(default)]
    pub preprocess: PreprocessConfig,
}

fn default_backbone() -> String {
    "backbone.onnx".to_string()
}

fn default_input_name() -> String {
    "input".to_string()
}

fn default_feature_output() -> String {
    "features".to_string()
}

fn default_feature_layout() -> ChannelOrder {
    ChannelOrder::HWC
}

fn default_head() -> String {
    "head.safetensors".to_string()
}

fn default_head_prefix() -> String {
    "classifier".to_string()
}

impl ModelManifest {
    /// Manifest for a model with the default file layout.
    pub fn new(version: impl Into<String>, feature_channels: usize) -> Self {
        Self {
            version: version.into(),
            architecture: None,
            classes: PathologyClass::ALL
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            backbone: default_backbone(),
            input_name: default_input_name(),
            feature_output: default_feature_output(),
            feature_layout: default_feature_layout(),
            feature_channels,
            head: default_head(),
            head_prefix: default_head_prefix(),
            preprocess: PreprocessConfig::default(),
        }
    }

    /// Reads and validates `manifest.json`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            AnalysisError::config_error_with_source(
                format!("cannot read model manifest '{}'", path.display()),
                e,
            )
        })?;
        let manifest: Self = serde_json::from_str(&text).map_err(|e| {
            AnalysisError::config_error_with_source(
                format!("model manifest '{}' is malformed", path.display()),
                e,
            )
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Absolute path of the backbone inside `model_dir`.
    pub fn backbone_path(&self, model_dir: &Path) -> PathBuf {
        model_dir.join(&self.backbone)
    }

    /// Absolute path of the head weights inside `model_dir`.
    pub fn head_path(&self, model_dir: &Path) -> PathBuf {
        model_dir.join(&self.head)
    }
}

impl ConfigValidator for ModelManifest {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::InvalidConfig {
                message: "model version must not be empty".to_string(),
            });
        }
        if self.classes.len() != NUM_CLASSES {
            return Err(ConfigError::InvalidConfig {
                message: format!(
                    "model declares {} classes, expected {}",
                    self.classes.len(),
                    NUM_CLASSES
                ),
            });
        }
        for (i, (declared, expected)) in self.classes.iter().zip(PathologyClass::ALL).enumerate()
        {
            let matches = declared
                .parse::<PathologyClass>()
                .is_ok_and(|class| class == expected);
            if !matches {
                return Err(ConfigError::InvalidConfig {
                    message: format!(
                        "class {i} is '{declared}', expected '{}'; output order must match",
                        expected.name()
                    ),
                });
            }
        }
        self.validate_positive_usize(self.feature_channels, "feature_channels")?;
        self.preprocess.validate()
    }

    fn get_defaults() -> Self {
        Self::new("unversioned", 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_source_pipeline() {
        let cfg = PreprocessConfig::default();
        assert_eq!(cfg.input_size, (224, 224));
        assert_eq!(cfg.resize_policy, ResizePolicy::Stretch);
        assert_eq!(cfg.resize_filter, ResizeFilter::Lanczos3);
        assert!((cfg.scale - 1.0 / 255.0).abs() < f32::EPSILON);
        assert_eq!(cfg.channel_order, ChannelOrder::HWC);
        assert_eq!(cfg.tensor_shape(), [1, 224, 224, 3]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_chw_tensor_shape() {
        let cfg = PreprocessConfig {
            channel_order: ChannelOrder::CHW,
            ..Default::default()
        };
        assert_eq!(cfg.tensor_shape(), [1, 3, 224, 224]);
    }

    #[test]
    fn test_minimal_manifest_uses_channels_last() {
        let classes: Vec<String> = PathologyClass::ALL
            .iter()
            .map(|c| format!("\"{}\"", c.name()))
            .collect();
        let manifest: ModelManifest = serde_json::from_str(&format!(
            r#"{{ "version": "v1", "classes": [{}], "feature_channels": 1024 }}"#,
            classes.join(", ")
        ))
        .unwrap();
        assert_eq!(manifest.feature_layout, ChannelOrder::HWC);
        assert_eq!(manifest.preprocess.tensor_shape(), [1, 224, 224, 3]);
        assert_eq!(ModelManifest::new("v1", 1024).feature_layout, ChannelOrder::HWC);
    }

    #[test]
    fn test_preprocess_validation() {
        let cfg = PreprocessConfig {
            channels: 2,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = PreprocessConfig {
            channels: 1,
            ..Default::default()
        };
        assert!(cfg.validate().is_err(), "mean/std still have 3 entries");

        let cfg = PreprocessConfig {
            channels: 1,
            mean: vec![0.5],
            std: vec![0.25],
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_manifest_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let classes: Vec<String> = PathologyClass::ALL
            .iter()
            .map(|c| format!("\"{}\"", c.name()))
            .collect();
        std::fs::write(
            &path,
            format!(
                r#"{{
                    "version": "densenet121-e13-18",
                    "architecture": "DenseNet121",
                    "classes": [{}],
                    "feature_channels": 1024,
                    "feature_layout": "HWC",
                    "preprocess": {{ "channel_order": "HWC" }}
                }}"#,
                classes.join(", ")
            ),
        )
        .unwrap();

        let manifest = ModelManifest::from_path(&path).unwrap();
        assert_eq!(manifest.version, "densenet121-e13-18");
        assert_eq!(manifest.backbone, "backbone.onnx");
        assert_eq!(manifest.feature_layout, ChannelOrder::HWC);
        assert_eq!(manifest.preprocess.channel_order, ChannelOrder::HWC);
        assert_eq!(manifest.preprocess.input_size, (224, 224));
        assert_eq!(
            manifest.head_path(dir.path()),
            dir.path().join("head.safetensors")
        );
    }

    #[test]
    fn test_manifest_rejects_reordered_classes() {
        let mut manifest = ModelManifest::new("v1", 1024);
        manifest.classes.swap(0, 1);
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("Atelectasis"));
    }

    #[test]
    fn test_manifest_rejects_missing_class() {
        let mut manifest = ModelManifest::new("v1", 1024);
        manifest.classes.pop();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_manifest_malformed_json_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = ModelManifest::from_path(&path).unwrap_err();
        assert!(err.is_startup_fatal());
    }
}
