//! Conversion of a decoded radiograph into the classifier's input tensor.

use image::{DynamicImage, RgbImage};
use ndarray::{Array4, ArrayView4};
use std::path::Path;

use crate::core::config::{ConfigValidator, PreprocessConfig};
use crate::core::errors::AnalysisError;
use crate::processors::normalization::NormalizeImage;
use crate::processors::types::{ChannelOrder, Region, ResizeFilter, ResizePolicy};
use crate::utils::image as image_utils;

/// Normalized classifier input together with the geometry it was taken from.
#[derive(Debug, Clone)]
pub struct ImageTensor {
    data: Array4<f32>,
    order: ChannelOrder,
    source_width: u32,
    source_height: u32,
    region: Region,
}

impl ImageTensor {
    /// Wraps an already-normalized tensor taken from `region` of a
    /// `source_width` x `source_height` image.
    pub fn new(
        data: Array4<f32>,
        order: ChannelOrder,
        source_width: u32,
        source_height: u32,
        region: Region,
    ) -> Self {
        Self {
            data,
            order,
            source_width,
            source_height,
            region,
        }
    }

    /// Tensor shape including the batch dimension.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Borrowed view of the tensor data.
    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// Channel layout of the tensor.
    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    /// Original image size as (width, height).
    pub fn source_size(&self) -> (u32, u32) {
        (self.source_width, self.source_height)
    }

    /// Part of the original image the tensor was resampled from.
    pub fn region(&self) -> Region {
        self.region
    }
}

/// Output of [`ImagePreprocessor::preprocess`].
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// Classifier input.
    pub tensor: ImageTensor,
    /// The original image at full resolution, used as the overlay base.
    pub display: RgbImage,
}

/// Decodes, validates, resizes, and normalizes radiographs.
///
/// The preprocessor holds only immutable configuration and is safe to share
/// between threads.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    input_size: (u32, u32),
    resize_policy: ResizePolicy,
    resize_filter: ResizeFilter,
    max_input_pixels: u64,
    normalize: NormalizeImage,
}

impl ImagePreprocessor {
    /// Builds a preprocessor from a model's preprocessing contract.
    pub fn from_config(config: &PreprocessConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        let normalize = NormalizeImage::new(
            config.scale,
            &config.mean,
            &config.std,
            config.channel_order,
        )?;
        Ok(Self {
            input_size: config.input_size,
            resize_policy: config.resize_policy,
            resize_filter: config.resize_filter,
            max_input_pixels: config.max_input_pixels,
            normalize,
        })
    }

    /// Classifier input size as (height, width).
    pub fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    /// Preprocesses an encoded image (PNG or JPEG bytes).
    pub fn preprocess_bytes(&self, bytes: &[u8]) -> Result<PreparedImage, AnalysisError> {
        let image = image_utils::decode(bytes)?;
        self.preprocess(&image)
    }

    /// Reads and preprocesses an image file.
    pub fn preprocess_path(&self, path: impl AsRef<Path>) -> Result<PreparedImage, AnalysisError> {
        let image = image_utils::load_image(path.as_ref())?;
        self.preprocess(&image)
    }

    /// Preprocesses a decoded image.
    ///
    /// Grayscale radiographs are replicated across channels for three-channel
    /// models; an alpha channel is dropped.
    pub fn preprocess(&self, image: &DynamicImage) -> Result<PreparedImage, AnalysisError> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(AnalysisError::invalid_image(format!(
                "image has zero area ({width}x{height})"
            )));
        }
        let pixels = u64::from(width) * u64::from(height);
        if pixels > self.max_input_pixels {
            return Err(AnalysisError::invalid_image(format!(
                "image is {width}x{height} ({pixels} pixels), limit is {}",
                self.max_input_pixels
            )));
        }
        let channels = image.color().channel_count();
        if !(1..=4).contains(&channels) {
            return Err(AnalysisError::invalid_image(format!(
                "unsupported channel count {channels}"
            )));
        }

        let (target_h, target_w) = self.input_size;
        let region = match self.resize_policy {
            ResizePolicy::Stretch => Region::full(width, height),
            ResizePolicy::CenterCrop => Region::centered(width, height, self.input_size),
        };
        let resized = if region == Region::full(width, height) {
            image.resize_exact(target_w, target_h, self.resize_filter.into())
        } else {
            image
                .crop_imm(region.x, region.y, region.width, region.height)
                .resize_exact(target_w, target_h, self.resize_filter.into())
        };

        let data = self.normalize.normalize_to(&resized)?;
        tracing::debug!(
            width,
            height,
            channels,
            shape = ?data.shape(),
            policy = ?self.resize_policy,
            "preprocessed radiograph"
        );

        Ok(PreparedImage {
            tensor: ImageTensor::new(data, self.normalize.order, width, height, region),
            display: image.to_rgb8(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ModelManifest;
    use crate::core::errors::ErrorKind;
    use image::{GrayImage, ImageFormat, Luma, Rgb, Rgba, RgbaImage};
    use std::io::Cursor;

    fn preprocessor(policy: ResizePolicy) -> ImagePreprocessor {
        ImagePreprocessor::from_config(&PreprocessConfig {
            resize_policy: policy,
            ..Default::default()
        })
        .unwrap()
    }

    fn png_bytes(image: &DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_grayscale_radiograph_to_rgb_tensor() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(1024, 1024, Luma([200])));
        let prepared = preprocessor(ResizePolicy::Stretch)
            .preprocess(&image)
            .unwrap();

        assert_eq!(prepared.tensor.shape(), &[1, 224, 224, 3]);
        assert_eq!(prepared.tensor.source_size(), (1024, 1024));
        assert_eq!(prepared.display.dimensions(), (1024, 1024));
        let expected = 200.0 / 255.0;
        for c in 0..3 {
            assert!((prepared.tensor.view()[[0, 100, 100, c]] - expected).abs() < 5e-3);
        }
    }

    #[test]
    fn test_rgba_alpha_is_dropped() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(64, 32, Rgba([255, 0, 0, 10])));
        let prepared = preprocessor(ResizePolicy::Stretch)
            .preprocess(&image)
            .unwrap();
        let view = prepared.tensor.view();
        assert!((view[[0, 5, 5, 0]] - 1.0).abs() < 5e-3);
        assert!(view[[0, 5, 5, 1]].abs() < 5e-3);
    }

    #[test]
    fn test_zero_area_is_invalid_image() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(0, 10));
        let err = preprocessor(ResizePolicy::Stretch)
            .preprocess(&image)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidImage);
    }

    #[test]
    fn test_undecodable_bytes_are_invalid_image() {
        let err = preprocessor(ResizePolicy::Stretch)
            .preprocess_bytes(b"definitely not a png")
            .unwrap_err();
        assert!(err.is_user_correctable());
    }

    #[test]
    fn test_truncated_png_is_invalid_image() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([9, 9, 9])));
        let bytes = png_bytes(&image);
        let err = preprocessor(ResizePolicy::Stretch)
            .preprocess_bytes(&bytes[..bytes.len() / 2])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidImage);
    }

    #[test]
    fn test_png_bytes_roundtrip() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(300, 200, Luma([0])));
        let prepared = preprocessor(ResizePolicy::Stretch)
            .preprocess_bytes(&png_bytes(&image))
            .unwrap();
        assert_eq!(prepared.tensor.source_size(), (300, 200));
        assert_eq!(prepared.tensor.region(), Region::full(300, 200));
    }

    #[test]
    fn test_pixel_limit() {
        let preprocessor = ImagePreprocessor::from_config(&PreprocessConfig {
            max_input_pixels: 100,
            ..Default::default()
        })
        .unwrap();
        let image = DynamicImage::ImageLuma8(GrayImage::new(20, 20));
        assert!(preprocessor.preprocess(&image).unwrap_err().is_user_correctable());
    }

    #[test]
    fn test_center_crop_records_region() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_fn(400, 200, |x, _| {
            if (100..300).contains(&x) {
                Luma([255])
            } else {
                Luma([0])
            }
        }));
        let prepared = preprocessor(ResizePolicy::CenterCrop)
            .preprocess(&image)
            .unwrap();

        assert_eq!(
            prepared.tensor.region(),
            Region {
                x: 100,
                y: 0,
                width: 200,
                height: 200
            }
        );
        // The cropped band is uniformly bright.
        assert!((prepared.tensor.view()[[0, 112, 0, 0]] - 1.0).abs() < 1e-2);
        assert_eq!(prepared.display.dimensions(), (400, 200));
    }

    #[test]
    fn test_hwc_single_channel_layout() {
        let preprocessor = ImagePreprocessor::from_config(&PreprocessConfig {
            input_size: (64, 32),
            channels: 1,
            channel_order: ChannelOrder::HWC,
            mean: vec![0.5],
            std: vec![0.5],
            ..Default::default()
        })
        .unwrap();
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 10, Luma([255])));
        let prepared = preprocessor.preprocess(&image).unwrap();
        assert_eq!(prepared.tensor.shape(), &[1, 64, 32, 1]);
        assert_eq!(prepared.tensor.order(), ChannelOrder::HWC);
        assert!((prepared.tensor.view()[[0, 3, 3, 0]] - 1.0).abs() < 1e-2);
    }

    #[test]
    fn test_default_manifest_tensor_is_channels_last() {
        let manifest = ModelManifest::new("v1", 1024);
        let preprocessor = ImagePreprocessor::from_config(&manifest.preprocess).unwrap();
        let image = DynamicImage::ImageLuma8(GrayImage::new(512, 512));
        let prepared = preprocessor.preprocess(&image).unwrap();
        assert_eq!(prepared.tensor.shape(), manifest.preprocess.tensor_shape().as_slice());
        assert_eq!(prepared.tensor.shape(), &[1, 224, 224, 3]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = ImagePreprocessor::from_config(&PreprocessConfig {
            input_size: (0, 224),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.is_startup_fatal());
    }
}
