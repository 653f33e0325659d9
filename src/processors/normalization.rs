//! Intensity normalization into classifier input tensors.
//!
//! Each channel value `v` in `[0, 255]` becomes `v * scale / std - mean / std`,
//! precomputed as `v * alpha + beta`. The constants are part of the model's
//! training contract; a mismatch silently degrades scores.

use image::DynamicImage;
use ndarray::Array4;

use crate::core::errors::AnalysisError;
use crate::processors::types::ChannelOrder;

/// Per-channel affine normalization producing a batch-of-one tensor.
#[derive(Debug, Clone)]
pub struct NormalizeImage {
    /// Scaling factors for each channel (alpha = scale / std)
    pub alpha: Vec<f32>,
    /// Offset values for each channel (beta = -mean / std)
    pub beta: Vec<f32>,
    /// Channel ordering (CHW or HWC)
    pub order: ChannelOrder,
}

impl NormalizeImage {
    /// Creates a normalizer.
    ///
    /// `mean` and `std` must have one entry per channel (1 or 3); `scale` and every
    /// `std` entry must be positive.
    pub fn new(
        scale: f32,
        mean: &[f32],
        std: &[f32],
        order: ChannelOrder,
    ) -> Result<Self, AnalysisError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(AnalysisError::config_error(format!(
                "normalization scale must be greater than 0, got {scale}"
            )));
        }
        if !matches!(mean.len(), 1 | 3) || mean.len() != std.len() {
            return Err(AnalysisError::config_error(format!(
                "normalization mean/std must both have 1 or 3 entries, got {} and {}",
                mean.len(),
                std.len()
            )));
        }
        for (i, &s) in std.iter().enumerate() {
            if !s.is_finite() || s <= 0.0 {
                return Err(AnalysisError::config_error(format!(
                    "standard deviation at index {i} must be greater than 0, got {s}"
                )));
            }
        }

        let alpha: Vec<f32> = std.iter().map(|s| scale / s).collect();
        let beta: Vec<f32> = mean.iter().zip(std).map(|(m, s)| -m / s).collect();

        Ok(Self { alpha, beta, order })
    }

    /// Plain `[0, 1]` rescaling for `channels` channels.
    pub fn unit_range(channels: usize, order: ChannelOrder) -> Result<Self, AnalysisError> {
        Self::new(1.0 / 255.0, &vec![0.0; channels], &vec![1.0; channels], order)
    }

    /// Number of channels this normalizer produces.
    pub fn channels(&self) -> usize {
        self.alpha.len()
    }

    /// Normalizes an already-resized image into a `(1, C, H, W)` or `(1, H, W, C)` tensor.
    ///
    /// Three-channel normalizers read the image as RGB (grayscale is replicated);
    /// single-channel normalizers read it as luma.
    pub fn normalize_to(&self, img: &DynamicImage) -> Result<Array4<f32>, AnalysisError> {
        let channels = self.channels();
        let (width, height) = (img.width() as usize, img.height() as usize);
        let raw: Vec<u8> = if channels == 3 {
            img.to_rgb8().into_raw()
        } else {
            img.to_luma8().into_raw()
        };

        // `raw` is interleaved HWC.
        let mut result = vec![0.0f32; channels * height * width];
        match self.order {
            ChannelOrder::CHW => {
                for (pixel_idx, pixel) in raw.chunks_exact(channels).enumerate() {
                    for (c, &value) in pixel.iter().enumerate() {
                        result[c * height * width + pixel_idx] =
                            value as f32 * self.alpha[c] + self.beta[c];
                    }
                }
            }
            ChannelOrder::HWC => {
                for (dst, (i, &value)) in result.iter_mut().zip(raw.iter().enumerate()) {
                    let c = i % channels;
                    *dst = value as f32 * self.alpha[c] + self.beta[c];
                }
            }
        }

        let shape = match self.order {
            ChannelOrder::CHW => (1, channels, height, width),
            ChannelOrder::HWC => (1, height, width, channels),
        };
        Ok(Array4::from_shape_vec(shape, result)?)
    }
}
