//! Constants shared across the analysis pipeline.

/// Number of pathology classes scored by the classifier.
pub const NUM_CLASSES: usize = 14;

/// Default classifier input height and width.
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (224, 224);

/// Default number of classes that receive a saliency overlay.
pub const DEFAULT_OVERLAY_TOP_K: usize = 3;

/// Default length of the raw-score ranking attached to each result.
pub const DEFAULT_RANKED_PREDICTIONS: usize = 5;

/// Default heatmap opacity when compositing onto the source image.
pub const DEFAULT_OVERLAY_OPACITY: f32 = 0.5;

/// Default upper bound on decoded image area (width * height).
pub const DEFAULT_MAX_INPUT_PIXELS: u64 = 64 * 1024 * 1024;

/// Maxima at or below this value are treated as an all-zero activation map.
pub const SALIENCY_EPSILON: f32 = 1e-10;

/// File extensions accepted for uploaded radiographs.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
