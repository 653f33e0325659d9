//! Image processing for chest radiographs.
//!
//! This module turns decoded images into classifier inputs and turns class
//! activation gradients back into overlays on the original image.
//!
//! # Modules
//!
//! * `preprocess` - Decoding, validation, resizing, and tensor conversion
//! * `normalization` - Per-channel intensity normalization
//! * `saliency` - Grad-CAM activation maps and overlays
//! * `colormap` - Heat-map coloring and blending
//! * `types` - Type definitions used across the processors module

pub mod colormap;
pub mod normalization;
pub mod preprocess;
pub mod saliency;
pub mod types;

pub use normalization::NormalizeImage;
pub use preprocess::{ImagePreprocessor, ImageTensor, PreparedImage};
pub use saliency::{ActivationMap, SaliencyMapGenerator, SaliencyOverlay, WeightMap};
pub use types::{ChannelOrder, Region, ResizeFilter, ResizePolicy};
