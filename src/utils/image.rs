//! Image loading helpers.
//!
//! Decoding failures map to [`AnalysisError::InvalidImage`]: a file that cannot be
//! read or decoded is a problem with the submitted input, not with the deployment.

use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use std::path::Path;

use crate::core::constants::SUPPORTED_EXTENSIONS;
use crate::core::errors::AnalysisError;

/// Returns true if `path` has an accepted upload extension (png, jpg, jpeg),
/// ignoring case.
pub fn is_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
}

/// Decodes an in-memory image, guessing the format from its content.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, AnalysisError> {
    if bytes.is_empty() {
        return Err(AnalysisError::invalid_image("image payload is empty"));
    }
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| AnalysisError::invalid_image_with_source("cannot detect image format", e))?
        .decode()
        .map_err(|e| AnalysisError::invalid_image_with_source("image could not be decoded", e))
}

/// Loads and decodes an image file.
pub fn load_image(path: &Path) -> Result<DynamicImage, AnalysisError> {
    let bytes = std::fs::read(path).map_err(|e| {
        AnalysisError::invalid_image_with_source(
            format!("cannot read image '{}'", path.display()),
            e,
        )
    })?;
    decode(&bytes)
}
