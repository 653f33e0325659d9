//! Domain types of a chest radiograph analysis.
//!
//! The fixed pathology classes, the score and threshold tables indexed by them,
//! threshold classification, and the assembled analysis result.

pub mod agreement;
pub mod finding;
pub mod pathology;
pub mod result;
pub mod scores;
pub mod thresholds;

pub use agreement::ReferenceAgreement;
pub use finding::{Finding, RankedPrediction, classify, rank_predictions};
pub use pathology::PathologyClass;
pub use result::{AnalysisResult, AnalysisResultAssembler};
pub use scores::ScoreVector;
pub use thresholds::ThresholdTable;
