//! # CXR Analysis
//!
//! Multi-label classification of frontal chest radiographs with Grad-CAM
//! saliency overlays.
//!
//! An image is decoded, resized, and normalized into the model's input tensor. An
//! ONNX backbone produces the final convolutional activations and a linear head
//! turns them into one sigmoid score per pathology. Scores at or above a
//! per-class threshold become findings, and the gradients of selected class
//! scores with respect to the activations are turned into heatmaps blended over
//! the original image.
//!
//! ## Modules
//!
//! * [`core`] - Configuration, errors, and the inference engine
//! * [`domain`] - Pathology classes, scores, thresholds, findings, and results
//! * [`pipeline`] - The end-to-end analyzer
//! * [`processors`] - Image preprocessing and saliency rendering
//! * [`utils`] - Image decoding and tracing setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cxr_analysis::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let analyzer = ChestXrayAnalyzerBuilder::new("models/densenet121").build()?;
//! let result = analyzer.analyze_path("scan.png")?;
//!
//! for finding in result.findings() {
//!     println!("{} {:.3} (threshold {:.3})", finding.class, finding.score, finding.threshold);
//! }
//! for overlay in result.overlays() {
//!     std::fs::write(format!("{}.png", overlay.class().name()), overlay.encode_png()?)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Model directory
//!
//! A model directory holds `manifest.json` (see [`core::ModelManifest`]), the
//! ONNX backbone, the head weights in safetensors format, and usually
//! `thresholds.json`.

pub mod core;
pub mod domain;
pub mod pipeline;
pub mod processors;
pub mod utils;

/// Prelude module for convenient imports.
///
/// ```rust
/// use cxr_analysis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{AnalysisConfig, AnalysisError, CxrResult, ErrorKind, SaliencyTargets};
    pub use crate::domain::{
        AnalysisResult, Finding, PathologyClass, RankedPrediction, ReferenceAgreement,
        ScoreVector, ThresholdTable,
    };
    pub use crate::pipeline::{ChestXrayAnalyzer, ChestXrayAnalyzerBuilder, SharedAnalyzer};
    pub use crate::processors::SaliencyOverlay;
    pub use crate::utils::load_image;
}
