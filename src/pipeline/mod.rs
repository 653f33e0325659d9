//! The analysis pipeline.
//!
//! [`ChestXrayAnalyzer`] runs preprocessing, inference, thresholding, and saliency
//! rendering for one image at a time and assembles an
//! [`AnalysisResult`](crate::domain::AnalysisResult). [`SharedAnalyzer`] defers
//! loading to first use and hands out a single instance to every caller.

pub mod analyzer;
pub mod shared;

pub use analyzer::{ChestXrayAnalyzer, ChestXrayAnalyzerBuilder};
pub use shared::SharedAnalyzer;
