//! Per-class classifier scores.

use serde::{Serialize, Serializer, ser::SerializeMap};

use crate::core::constants::NUM_CLASSES;
use crate::core::errors::AnalysisError;
use crate::domain::pathology::PathologyClass;

/// One independent sigmoid probability per [`PathologyClass`], index-aligned with
/// [`PathologyClass::ALL`].
///
/// Construction validates the invariants: exactly [`NUM_CLASSES`] values, all finite,
/// all in `[0, 1]`. A `ScoreVector` that exists is therefore always well formed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreVector {
    values: [f32; NUM_CLASSES],
}

impl ScoreVector {
    /// Validates and wraps raw classifier probabilities.
    pub fn new(values: &[f32]) -> Result<Self, AnalysisError> {
        let values: [f32; NUM_CLASSES] = values.try_into().map_err(|_| {
            AnalysisError::shape_mismatch("classifier", "score vector", &[NUM_CLASSES], &[values.len()])
        })?;

        if let Some((index, value)) = values
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || !(0.0..=1.0).contains(*v))
        {
            let class = PathologyClass::ALL[index];
            return Err(AnalysisError::Inference {
                model_name: "classifier".to_string(),
                context: format!("score for {class} is outside [0, 1]: {value}"),
                transient: false,
                source: None,
            });
        }

        Ok(Self { values })
    }

    /// Score of a single class.
    pub fn get(&self, class: PathologyClass) -> f32 {
        self.values[class.index()]
    }

    /// Raw values in class order.
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// `(class, score)` pairs in class order.
    pub fn iter(&self) -> impl Iterator<Item = (PathologyClass, f32)> + '_ {
        PathologyClass::ALL.iter().copied().zip(self.values.iter().copied())
    }

    /// All classes sorted by descending score; equal scores keep class order.
    pub fn ranked(&self) -> Vec<(PathologyClass, f32)> {
        let mut ranked: Vec<(PathologyClass, f32)> = self.iter().collect();
        // sort_by is stable, so ties stay in enumeration order.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    /// The `k` highest-scoring classes.
    pub fn top(&self, k: usize) -> Vec<(PathologyClass, f32)> {
        let mut ranked = self.ranked();
        ranked.truncate(k);
        ranked
    }

    /// Highest-scoring class (the first class on ties).
    pub fn primary(&self) -> (PathologyClass, f32) {
        self.ranked()[0]
    }
}

impl Serialize for ScoreVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(NUM_CLASSES))?;
        for (class, score) in self.iter() {
            map.serialize_entry(class.name(), &score)?;
        }
        map.end()
    }
}
