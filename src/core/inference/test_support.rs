//! Deterministic in-memory backbone and head for tests.
//!
//! The synthetic backbone takes channels-last input, average-pools the first channel
//! onto a 7x7 grid, and emits two channels: the pooled intensity and its complement. The head scores
//! brightness as positive evidence for every class (more strongly for later classes)
//! and darkness as negative evidence, so a blank image scores low everywhere and a
//! bright patch drives both scores and saliency.

use ndarray::{Array1, Array2, Array3, Array4, ArrayView4};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::engine::{FeatureExtractor, FeatureMap, InferenceEngine};
use super::head::ClassifierHead;
use crate::core::constants::NUM_CLASSES;
use crate::core::errors::AnalysisError;
use crate::processors::preprocess::ImageTensor;
use crate::processors::types::{ChannelOrder, Region};

pub(crate) const GRID: usize = 7;
pub(crate) const SOURCE_SIZE: u32 = 448;

#[derive(Debug, Default)]
pub(crate) struct SyntheticExtractor;

impl FeatureExtractor for SyntheticExtractor {
    fn name(&self) -> &str {
        "synthetic-backbone"
    }

    fn extract(&self, input: ArrayView4<'_, f32>) -> Result<FeatureMap, AnalysisError> {
        let (_, h, w, _) = input.dim();
        let mut features = Array3::<f32>::zeros((2, GRID, GRID));
        for gy in 0..GRID {
            for gx in 0..GRID {
                let (y0, y1) = (gy * h / GRID, ((gy + 1) * h / GRID).max(gy * h / GRID + 1));
                let (x0, x1) = (gx * w / GRID, ((gx + 1) * w / GRID).max(gx * w / GRID + 1));
                let mut sum = 0.0;
                for y in y0..y1.min(h) {
                    for x in x0..x1.min(w) {
                        sum += input[[0, y, x, 0]];
                    }
                }
                let mean = sum / ((y1 - y0) * (x1 - x0)) as f32;
                features[[0, gy, gx]] = mean;
                features[[1, gy, gx]] = 1.0 - mean;
            }
        }
        Ok(FeatureMap::new(features))
    }
}

/// Fails the first `failures` calls with a transient error, then delegates.
#[derive(Debug)]
pub(crate) struct FlakyExtractor {
    remaining: AtomicUsize,
    pub(crate) calls: Arc<AtomicUsize>,
    transient: bool,
}

impl FlakyExtractor {
    pub(crate) fn new(failures: usize, transient: bool) -> Self {
        Self {
            remaining: AtomicUsize::new(failures),
            calls: Arc::new(AtomicUsize::new(0)),
            transient,
        }
    }
}

impl FeatureExtractor for FlakyExtractor {
    fn name(&self) -> &str {
        "flaky-backbone"
    }

    fn extract(&self, input: ArrayView4<'_, f32>) -> Result<FeatureMap, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AnalysisError::Inference {
                model_name: self.name().to_string(),
                context: "simulated session failure".to_string(),
                transient: self.transient,
                source: None,
            });
        }
        SyntheticExtractor.extract(input)
    }
}

pub(crate) fn synthetic_head() -> ClassifierHead {
    let weight = Array2::from_shape_fn((NUM_CLASSES, 2), |(c, k)| {
        if k == 0 { 2.0 + 0.25 * c as f32 } else { -1.0 }
    });
    ClassifierHead::from_weights(weight, Array1::from_elem(NUM_CLASSES, -3.0))
        .expect("valid synthetic head")
}

pub(crate) fn engine_with(extractor: Box<dyn FeatureExtractor>) -> InferenceEngine {
    InferenceEngine::new(extractor, synthetic_head(), [1, 224, 224, 3], "synthetic-v1")
}

pub(crate) fn synthetic_engine() -> InferenceEngine {
    engine_with(Box::new(SyntheticExtractor))
}

fn image_from(data: Array4<f32>) -> ImageTensor {
    ImageTensor::new(
        data,
        ChannelOrder::HWC,
        SOURCE_SIZE,
        SOURCE_SIZE,
        Region::full(SOURCE_SIZE, SOURCE_SIZE),
    )
}

pub(crate) fn uniform_image(value: f32) -> ImageTensor {
    image_from(Array4::from_elem((1, 224, 224, 3), value))
}

pub(crate) fn bright_image() -> ImageTensor {
    uniform_image(1.0)
}

/// Dark image with a bright top-left quadrant.
pub(crate) fn patch_image() -> ImageTensor {
    image_from(Array4::from_shape_fn((1, 224, 224, 3), |(_, y, x, _)| {
        if y < 112 && x < 112 { 1.0 } else { 0.0 }
    }))
}
