//! Configuration for the analysis pipeline.
//!
//! This module provides configuration types, validation traits, and loaders for the
//! model manifest and the process-level analysis settings.

pub mod analysis;
pub mod errors;
pub mod manifest;
pub mod onnx;

// Re-export commonly used types
pub use analysis::{AnalysisConfig, SaliencyConfig, SaliencyTargets};
pub use errors::{ConfigError, ConfigValidator};
pub use manifest::{ModelManifest, PreprocessConfig};
pub use onnx::*;
