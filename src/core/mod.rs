//! The core module of the analysis pipeline.
//!
//! This module contains the fundamental components shared by every stage:
//! - Configuration management
//! - Constants used throughout the pipeline
//! - Error handling
//! - Inference engine integration

pub mod config;
pub mod constants;
pub mod errors;
pub mod inference;

pub use config::{
    AnalysisConfig, ConfigError, ConfigValidator, ModelManifest, PreprocessConfig,
    SaliencyConfig, SaliencyTargets,
};
pub use constants::*;
pub use errors::{AnalysisError, CxrResult, ErrorKind};
pub use inference::{ClassifierHead, FeatureExtractor, InferenceEngine, OrtFeatureExtractor};
