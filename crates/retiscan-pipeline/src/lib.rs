//! retiscan-pipeline: retinal fundus image analysis.
//!
//! Turns a fundus photograph into a [`ClinicalReport`] through:
//! load -> contrast enhancement (CLAHE on Lab lightness) -> classification
//! -> feature detection (abnormal verdicts only) -> recommendation and
//! risk-factor lookup.
//!
//! The classifier and feature detector are pluggable through the
//! [`Classifier`] and [`FeatureDetector`] traits. The bundled
//! implementations are seeded stubs that stand in for a trained model.
//!
//! The crate holds no process-global state. It never installs a logging
//! subscriber; it only emits `tracing` events.

pub mod analyzer;
pub mod clahe;
pub mod classify;
pub mod config;
pub mod diagnostics;
pub mod enhance;
pub mod error;
pub mod features;
pub mod load;
pub mod pipeline;
pub mod recommend;
pub mod risk;
pub mod types;

pub use analyzer::{Analyzer, BatchSummary, CancelToken};
pub use classify::{Classifier, ClassifierKind, Disease};
pub use config::{AnalyzerConfig, MODEL_VERSION, ResizeFilter};
pub use diagnostics::{AnalysisDiagnostics, Clock, StdClock};
pub use error::{AnalysisError, ConfigError, Stage, StageError};
pub use features::{FeatureDetector, FeatureDetectorKind};
pub use pipeline::Pipeline;
pub use types::{
    BatchItemResult, ClassificationVerdict, ClinicalReport, Dimensions, FindingSet, ImageSource,
    NormalizedImage,
};
