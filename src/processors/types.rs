//! Types used in image processing operations.
//!
//! These enums are part of the model's training-time contract and are read from the
//! model manifest, so all of them are (de)serializable.

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

/// Specifies the order of channels in an image tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelOrder {
    /// Channel, Height, Width order (common in PyTorch)
    #[default]
    CHW,
    /// Height, Width, Channel order (common in TensorFlow)
    HWC,
}

/// How the source image is mapped onto the classifier's fixed input resolution.
///
/// Saliency maps are projected back through the same mapping, so the choice must
/// match the one used when the model was trained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizePolicy {
    /// Resize the whole image to the target size; aspect ratio is not preserved.
    #[default]
    Stretch,
    /// Crop the largest centered region with the target aspect ratio, then resize it.
    CenterCrop,
}

/// Resampling filter, mirroring [`FilterType`] in a serializable form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizeFilter {
    /// Nearest neighbor
    Nearest,
    /// Linear (bilinear) filter
    Triangle,
    /// Cubic filter
    CatmullRom,
    /// Gaussian filter
    Gaussian,
    /// Lanczos with window 3
    #[default]
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Axis-aligned rectangle in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Region {
    /// Region covering a whole `width` x `height` image.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Largest region centered in a `width` x `height` image whose aspect ratio
    /// matches `target` (height, width).
    pub fn centered(width: u32, height: u32, target: (u32, u32)) -> Self {
        let (target_h, target_w) = (u64::from(target.0.max(1)), u64::from(target.1.max(1)));
        let (w, h) = (u64::from(width), u64::from(height));

        // Compare w / h with target_w / target_h without floating point.
        let (crop_w, crop_h) = if w * target_h > h * target_w {
            ((h * target_w / target_h).max(1), h)
        } else {
            (w, (w * target_h / target_w).max(1))
        };

        Self {
            x: ((w - crop_w) / 2) as u32,
            y: ((h - crop_h) / 2) as u32,
            width: crop_w as u32,
            height: crop_h as u32,
        }
    }
}
