//! Error types for the analysis pipeline.
//!
//! Every fallible operation in this crate returns [`AnalysisError`]. The variants
//! follow the pipeline's failure taxonomy:
//!
//! - [`AnalysisError::InvalidImage`]: the input cannot be decoded or used. User-correctable,
//!   never retried.
//! - [`AnalysisError::Configuration`] / [`AnalysisError::ModelLoad`]: a threshold or model
//!   artifact is missing or malformed. Fatal at start-up.
//! - [`AnalysisError::Inference`]: shape mismatch or runtime failure inside the classifier.
//!   Indicates a deployment defect; retried once only when flagged transient.
//! - [`AnalysisError::Assembly`]: an internal invariant was violated while composing a result.
//! - [`AnalysisError::OverlayEncoding`]: a rendered overlay could not be encoded for export.
//!
//! # Usage
//!
//! ```rust
//! use cxr_analysis::core::errors::{AnalysisError, ErrorKind};
//!
//! let err = AnalysisError::invalid_image("image has zero area");
//! assert_eq!(err.kind(), ErrorKind::InvalidImage);
//! assert!(err.is_user_correctable());
//!
//! let err = AnalysisError::config_error("threshold table is missing 'Hernia'");
//! assert!(err.is_startup_fatal());
//! ```

use std::path::Path;
use thiserror::Error;

/// Boxed error source shared by all variants that wrap an underlying failure.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Convenient result alias for analysis operations.
pub type CxrResult<T> = Result<T, AnalysisError>;

/// Coarse classification of an [`AnalysisError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or undecodable input image.
    InvalidImage,
    /// Missing or malformed threshold/model artifact.
    Configuration,
    /// Failure inside the classifier.
    Inference,
    /// Internal invariant violation while assembling a result.
    Assembly,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidImage => write!(f, "invalid image"),
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::Inference => write!(f, "inference"),
            ErrorKind::Assembly => write!(f, "assembly"),
        }
    }
}

/// Errors produced by the analysis pipeline.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// The input image cannot be decoded, has zero area, or has an unsupported layout.
    #[error("invalid image: {message}")]
    InvalidImage {
        /// What is wrong with the image.
        message: String,
        /// Underlying decoder error, if any.
        #[source]
        source: Option<BoxedSource>,
    },

    /// A configuration or artifact problem detected at load time.
    #[error("configuration: {message}")]
    Configuration {
        /// What is wrong with the configuration.
        message: String,
        /// Underlying parse or IO error, if any.
        #[source]
        source: Option<BoxedSource>,
    },

    /// The model artifact could not be loaded.
    #[error("failed to load model '{model_path}': {reason}")]
    ModelLoad {
        /// Path of the artifact that failed to load.
        model_path: String,
        /// Why loading failed.
        reason: String,
        /// Optional hint for the operator.
        suggestion: Option<String>,
        /// Underlying runtime error.
        #[source]
        source: Option<BoxedSource>,
    },

    /// Inference failed for a loaded model.
    #[error("inference failed for model '{model_name}': {context}")]
    Inference {
        /// Name of the model that failed.
        model_name: String,
        /// Description of the failing operation.
        context: String,
        /// Whether the failure may be caused by transient resource exhaustion.
        transient: bool,
        /// Underlying runtime error.
        #[source]
        source: Option<BoxedSource>,
    },

    /// An internal invariant was violated while composing a result.
    #[error("assembly invariant violated: {message}")]
    Assembly {
        /// The violated invariant.
        message: String,
    },

    /// Error from ndarray shape operations.
    #[error("tensor shape")]
    Tensor(#[from] ndarray::ShapeError),

    /// A rendered overlay could not be encoded as an image file.
    #[error("failed to encode {class} overlay")]
    OverlayEncoding {
        /// Class of the overlay being encoded.
        class: String,
        /// Underlying encoder error.
        #[source]
        source: image::ImageError,
    },
}

impl AnalysisError {
    /// Creates an [`AnalysisError::InvalidImage`] without an underlying source.
    pub fn invalid_image(message: impl Into<String>) -> Self {
        Self::InvalidImage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an [`AnalysisError::InvalidImage`] wrapping a decoder error.
    pub fn invalid_image_with_source(
        message: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::InvalidImage {
            message: message.into(),
            source: Some(Box::new(error)),
        }
    }

    /// Creates an [`AnalysisError::Configuration`] without an underlying source.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an [`AnalysisError::Configuration`] wrapping a parse or IO error.
    pub fn config_error_with_source(
        message: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(Box::new(error)),
        }
    }

    /// Creates an [`AnalysisError::Configuration`] naming the offending field and value.
    pub fn config_error_with_context(field: &str, value: &str, reason: &str) -> Self {
        Self::config_error(format!(
            "field '{}' with value '{}': {}",
            field, value, reason
        ))
    }

    /// Creates an [`AnalysisError::ModelLoad`].
    pub fn model_load_error(
        model_path: impl AsRef<Path>,
        reason: impl Into<String>,
        suggestion: Option<&str>,
        source: Option<impl std::error::Error + Send + Sync + 'static>,
    ) -> Self {
        Self::ModelLoad {
            model_path: model_path.as_ref().display().to_string(),
            reason: reason.into(),
            suggestion: suggestion.map(str::to_string),
            source: source.map(|e| Box::new(e) as BoxedSource),
        }
    }

    /// Creates a non-transient [`AnalysisError::Inference`] wrapping a runtime error.
    pub fn inference_error(
        model_name: &str,
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Inference {
            model_name: model_name.to_string(),
            context: context.into(),
            transient: false,
            source: Some(Box::new(error)),
        }
    }

    /// Creates a transient [`AnalysisError::Inference`]; callers may retry these once.
    pub fn transient_inference_error(
        model_name: &str,
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Inference {
            model_name: model_name.to_string(),
            context: context.into(),
            transient: true,
            source: Some(Box::new(error)),
        }
    }

    /// Creates an [`AnalysisError::Inference`] for a tensor whose shape does not match
    /// what the model expects.
    pub fn shape_mismatch(model_name: &str, what: &str, expected: &[usize], actual: &[usize]) -> Self {
        Self::Inference {
            model_name: model_name.to_string(),
            context: format!("{what}: expected shape {expected:?}, got {actual:?}"),
            transient: false,
            source: None,
        }
    }

    /// Creates an [`AnalysisError::Assembly`].
    pub fn assembly_error(message: impl Into<String>) -> Self {
        Self::Assembly {
            message: message.into(),
        }
    }

    /// Creates an [`AnalysisError::OverlayEncoding`].
    pub fn overlay_encoding_error(class: impl Into<String>, source: image::ImageError) -> Self {
        Self::OverlayEncoding {
            class: class.into(),
            source,
        }
    }

    /// Returns the taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidImage { .. } => ErrorKind::InvalidImage,
            Self::Configuration { .. } | Self::ModelLoad { .. } => ErrorKind::Configuration,
            Self::Inference { .. } | Self::Tensor(_) => ErrorKind::Inference,
            Self::Assembly { .. } | Self::OverlayEncoding { .. } => ErrorKind::Assembly,
        }
    }

    /// True for errors that must block start-up entirely.
    pub fn is_startup_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    /// True for errors the submitter can fix by supplying a different image.
    pub fn is_user_correctable(&self) -> bool {
        self.kind() == ErrorKind::InvalidImage
    }

    /// True when a single retry is appropriate.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Inference { transient: true, .. })
    }
}

impl From<crate::core::config::ConfigError> for AnalysisError {
    fn from(error: crate::core::config::ConfigError) -> Self {
        Self::config_error_with_source("configuration validation failed", error)
    }
}

impl From<candle_core::Error> for AnalysisError {
    fn from(error: candle_core::Error) -> Self {
        Self::inference_error("classifier-head", "tensor operation failed", error)
    }
}
