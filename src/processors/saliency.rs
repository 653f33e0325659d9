//! Gradient-weighted class activation maps (Grad-CAM) and their overlays.
//!
//! For a target class with activation `A` (`K` channels on an `h x w` grid) and
//! gradient `G = dy_c / dA`:
//!
//! 1. channel weight `a_k` = spatial mean of `G_k`;
//! 2. map = `ReLU(sum_k a_k * A_k)`;
//! 3. map is divided by its own maximum, so every non-degenerate map spans `[0, 1]`
//!    regardless of raw magnitude;
//! 4. map is upsampled to the original image resolution and blended over it with
//!    the JET colormap.
//!
//! A map whose maximum is zero (saturated score, dead features, zero gradient)
//! becomes an all-zero overlay.

use image::{ImageBuffer, ImageFormat, Luma, RgbImage, imageops};
use ndarray::{Array2, ArrayView3, Axis};
use serde::Serialize;
use std::io::Cursor;

use crate::core::config::{ConfigValidator, SaliencyConfig};
use crate::core::constants::SALIENCY_EPSILON;
use crate::core::errors::AnalysisError;
use crate::core::inference::{FeatureMap, GradientMap};
use crate::domain::pathology::PathologyClass;
use crate::processors::colormap;
use crate::processors::preprocess::PreparedImage;
use crate::processors::types::{Region, ResizeFilter};

/// Relevance weights in `[0, 1]` at image resolution.
pub type WeightMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Saliency for one class: weights plus the ready-to-render composite.
#[derive(Debug, Clone, Serialize)]
pub struct SaliencyOverlay {
    class: PathologyClass,
    width: u32,
    height: u32,
    /// True when the activation map was uniformly zero.
    degenerate: bool,
    #[serde(skip)]
    weights: WeightMap,
    #[serde(skip)]
    composite: RgbImage,
}

impl SaliencyOverlay {
    pub fn class(&self) -> PathologyClass {
        self.class
    }

    /// (width, height); always the original image size.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    pub fn weights(&self) -> &WeightMap {
        &self.weights
    }

    /// Heat map blended over the original image.
    pub fn composite(&self) -> &RgbImage {
        &self.composite
    }

    /// PNG encoding of the composite.
    pub fn encode_png(&self) -> Result<Vec<u8>, AnalysisError> {
        let mut bytes = Vec::new();
        self.composite
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| AnalysisError::overlay_encoding_error(self.class.name(), e))?;
        Ok(bytes)
    }
}

/// Low-resolution class activation map, before upsampling.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationMap {
    /// Normalized weights on the feature grid, shape `[h, w]`.
    pub values: Array2<f32>,
    pub degenerate: bool,
}

/// Renders Grad-CAM overlays with a fixed colormap, opacity, and upsampling filter.
#[derive(Debug, Clone)]
pub struct SaliencyMapGenerator {
    opacity: f32,
    upsample_filter: ResizeFilter,
}

impl Default for SaliencyMapGenerator {
    fn default() -> Self {
        let config = SaliencyConfig::default();
        Self {
            opacity: config.opacity,
            upsample_filter: config.upsample_filter,
        }
    }
}

impl SaliencyMapGenerator {
    pub fn from_config(config: &SaliencyConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self {
            opacity: config.opacity,
            upsample_filter: config.upsample_filter,
        })
    }

    /// Steps 1-3: weighted channel sum, rectification, and max normalization.
    pub fn activation_map(
        features: ArrayView3<'_, f32>,
        gradients: ArrayView3<'_, f32>,
    ) -> Result<ActivationMap, AnalysisError> {
        if features.dim() != gradients.dim() {
            let (fk, fh, fw) = features.dim();
            let (gk, gh, gw) = gradients.dim();
            return Err(AnalysisError::shape_mismatch(
                "saliency",
                "gradient map",
                &[fk, fh, fw],
                &[gk, gh, gw],
            ));
        }

        let (_, h, w) = features.dim();
        let mut cam = Array2::<f32>::zeros((h, w));
        for (channel, grad) in features.axis_iter(Axis(0)).zip(gradients.axis_iter(Axis(0))) {
            let weight = grad.mean().unwrap_or(0.0);
            if weight != 0.0 {
                cam.scaled_add(weight, &channel);
            }
        }
        cam.mapv_inplace(|v| if v.is_nan() { 0.0 } else { v.max(0.0) });

        let peak = cam.fold(0.0f32, |acc, &v| acc.max(v));
        if !peak.is_finite() || peak <= SALIENCY_EPSILON {
            return Ok(ActivationMap {
                values: Array2::zeros((h, w)),
                degenerate: true,
            });
        }
        cam.mapv_inplace(|v| v / peak);
        Ok(ActivationMap {
            values: cam,
            degenerate: false,
        })
    }

    /// Step 4a: upsamples a grid map onto `region` of a `width` x `height` image.
    /// Pixels outside `region` get zero weight.
    pub fn upsample(
        &self,
        map: &Array2<f32>,
        width: u32,
        height: u32,
        region: Region,
    ) -> Result<WeightMap, AnalysisError> {
        let (h, w) = map.dim();
        let grid = WeightMap::from_raw(w as u32, h as u32, map.iter().copied().collect())
            .ok_or_else(|| AnalysisError::assembly_error("activation map is not a dense grid"))?;

        let mut resized = imageops::resize(
            &grid,
            region.width,
            region.height,
            self.upsample_filter.into(),
        );
        for px in resized.pixels_mut() {
            px[0] = if px[0].is_finite() {
                px[0].clamp(0.0, 1.0)
            } else {
                0.0
            };
        }

        if region == Region::full(width, height) {
            return Ok(resized);
        }
        let mut full = WeightMap::new(width, height);
        imageops::replace(&mut full, &resized, i64::from(region.x), i64::from(region.y));
        Ok(full)
    }

    /// Step 4b: blends the heat map over the original image.
    pub fn composite(&self, base: &RgbImage, weights: &WeightMap) -> RgbImage {
        let opacity = self.opacity;
        imageproc::map::map_colors2(base, weights, |px, w| colormap::blend(px, w, opacity))
    }

    /// Full Grad-CAM overlay for the class of `gradients`, aligned to `image`'s
    /// original geometry.
    pub fn generate(
        &self,
        features: &FeatureMap,
        gradients: &GradientMap,
        image: &PreparedImage,
    ) -> Result<SaliencyOverlay, AnalysisError> {
        let class = gradients.class();
        let cam = Self::activation_map(features.view(), gradients.view())?;
        if cam.degenerate {
            tracing::warn!(
                class = class.name(),
                "degenerate activation map; emitting an all-zero overlay"
            );
        }

        let (width, height) = image.tensor.source_size();
        if image.display.dimensions() != (width, height) {
            return Err(AnalysisError::assembly_error(format!(
                "display image is {:?}, tensor was taken from {}x{}",
                image.display.dimensions(),
                width,
                height
            )));
        }
        let weights = self.upsample(&cam.values, width, height, image.tensor.region())?;
        let composite = self.composite(&image.display, &weights);

        Ok(SaliencyOverlay {
            class,
            width,
            height,
            degenerate: cam.degenerate,
            weights,
            composite,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::preprocess::ImageTensor;
    use crate::processors::types::ChannelOrder;
    use image::Rgb;
    use ndarray::{Array3, Array4};

    fn prepared(width: u32, height: u32, region: Region) -> PreparedImage {
        PreparedImage {
            tensor: ImageTensor::new(
                Array4::zeros((1, 3, 224, 224)),
                ChannelOrder::CHW,
                width,
                height,
                region,
            ),
            display: RgbImage::from_pixel(width, height, Rgb([90, 90, 90])),
        }
    }

    /// One hot cell at (1, 2) on a 4x4 grid in channel 0; channel 1 is uniform.
    fn hot_spot() -> (FeatureMap, GradientMap) {
        let mut features = Array3::<f32>::zeros((2, 4, 4));
        features[[0, 1, 2]] = 3.0;
        features.index_axis_mut(Axis(0), 1).fill(0.5);
        let mut grads = Array3::<f32>::zeros((2, 4, 4));
        grads.index_axis_mut(Axis(0), 0).fill(0.2);
        grads.index_axis_mut(Axis(0), 1).fill(-0.1);
        (
            FeatureMap::new(features),
            GradientMap::new(PathologyClass::Nodule, grads),
        )
    }

    #[test]
    fn test_activation_map_normalized_to_peak() {
        let (features, grads) = hot_spot();
        let cam = SaliencyMapGenerator::activation_map(features.view(), grads.view()).unwrap();
        assert!(!cam.degenerate);
        assert_eq!(cam.values[[1, 2]], 1.0);
        // Elsewhere 0.2 * 0 - 0.1 * 0.5 < 0, rectified to zero.
        assert_eq!(cam.values[[0, 0]], 0.0);
        assert!(cam.values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_zero_gradient_is_degenerate_not_nan() {
        let (features, _) = hot_spot();
        let grads = GradientMap::new(PathologyClass::Edema, Array3::zeros((2, 4, 4)));
        let cam = SaliencyMapGenerator::activation_map(features.view(), grads.view()).unwrap();
        assert!(cam.degenerate);
        assert!(cam.values.iter().all(|&v| v == 0.0));

        let overlay = SaliencyMapGenerator::default()
            .generate(&features, &grads, &prepared(50, 40, Region::full(50, 40)))
            .unwrap();
        assert!(overlay.is_degenerate());
        assert!(overlay.weights().pixels().all(|p| p[0] == 0.0));
    }

    #[test]
    fn test_negative_only_evidence_is_degenerate() {
        let features = FeatureMap::new(Array3::from_elem((1, 3, 3), 2.0));
        let grads = GradientMap::new(PathologyClass::Mass, Array3::from_elem((1, 3, 3), -1.0));
        let cam = SaliencyMapGenerator::activation_map(features.view(), grads.view()).unwrap();
        assert!(cam.degenerate);
    }

    #[test]
    fn test_nan_features_cleaned() {
        let mut data = Array3::from_elem((1, 2, 2), 1.0);
        data[[0, 0, 0]] = f32::NAN;
        let grads = Array3::from_elem((1, 2, 2), 1.0);
        let cam = SaliencyMapGenerator::activation_map(data.view(), grads.view()).unwrap();
        assert!(cam.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let features = Array3::<f32>::zeros((2, 4, 4));
        let grads = Array3::<f32>::zeros((2, 4, 5));
        assert!(SaliencyMapGenerator::activation_map(features.view(), grads.view()).is_err());
    }

    #[test]
    fn test_overlay_matches_original_resolution() {
        let (features, grads) = hot_spot();
        let overlay = SaliencyMapGenerator::default()
            .generate(&features, &grads, &prepared(640, 480, Region::full(640, 480)))
            .unwrap();

        assert_eq!(overlay.dimensions(), (640, 480));
        assert_eq!(overlay.weights().dimensions(), (640, 480));
        assert_eq!(overlay.composite().dimensions(), (640, 480));
        assert_eq!(overlay.class(), PathologyClass::Nodule);

        // Hot cell (row 1, col 2) covers x in 320..480, y in 120..240.
        let hot = overlay.weights().get_pixel(400, 180)[0];
        let cold = overlay.weights().get_pixel(40, 440)[0];
        assert!(hot > 0.5, "hot = {hot}");
        assert_eq!(cold, 0.0);
        assert!(overlay.weights().pixels().all(|p| (0.0..=1.0).contains(&p[0])));
    }

    #[test]
    fn test_center_crop_overlay_maps_into_region() {
        let (features, grads) = hot_spot();
        let region = Region {
            x: 100,
            y: 0,
            width: 200,
            height: 200,
        };
        let overlay = SaliencyMapGenerator::default()
            .generate(&features, &grads, &prepared(400, 200, region))
            .unwrap();
        assert_eq!(overlay.dimensions(), (400, 200));
        // Outside the crop the weight is zero and the composite is the base blended with jet(0).
        assert_eq!(overlay.weights().get_pixel(10, 10)[0], 0.0);
        assert_eq!(overlay.weights().get_pixel(390, 190)[0], 0.0);
        // Hot cell (row 1, col 2) lands at x in 200..250, y in 50..100.
        assert!(overlay.weights().get_pixel(225, 75)[0] > 0.5);
    }

    #[test]
    fn test_composite_blends_with_opacity() {
        let generator = SaliencyMapGenerator::from_config(&SaliencyConfig {
            opacity: 0.0,
            ..Default::default()
        })
        .unwrap();
        let base = RgbImage::from_pixel(3, 3, Rgb([12, 34, 56]));
        let weights = WeightMap::from_pixel(3, 3, Luma([1.0]));
        assert_eq!(generator.composite(&base, &weights), base);
    }

    #[test]
    fn test_encode_png_roundtrip() {
        let (features, grads) = hot_spot();
        let overlay = SaliencyMapGenerator::default()
            .generate(&features, &grads, &prepared(32, 24, Region::full(32, 24)))
            .unwrap();
        let png = overlay.encode_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn test_overlay_serializes_metadata_only() {
        let (features, grads) = hot_spot();
        let overlay = SaliencyMapGenerator::default()
            .generate(&features, &grads, &prepared(8, 8, Region::full(8, 8)))
            .unwrap();
        let json = serde_json::to_value(&overlay).unwrap();
        assert_eq!(json["class"], "Nodule");
        assert_eq!(json["width"], 8);
        assert_eq!(json["degenerate"], false);
        assert!(json.get("weights").is_none());
    }
}
