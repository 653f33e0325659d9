//! Classifier inference: ONNX backbone, candle head, and the engine combining them.

pub mod engine;
pub mod head;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use engine::{
    Activations, FeatureExtractor, FeatureMap, GradientCapture, GradientMap, InferenceEngine,
};
pub use head::ClassifierHead;
pub use session::OrtFeatureExtractor;
