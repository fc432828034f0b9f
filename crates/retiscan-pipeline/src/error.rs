//! Error taxonomy for the analysis pipeline.
//!
//! Each stage reports failures as a [`StageError`]. The orchestrator wraps
//! the first failing stage's error exactly once in an [`AnalysisError`]
//! carrying the originating [`Stage`], so callers always see which step
//! failed and the original cause.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A step of the analysis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Reading, decoding and normalizing the source image.
    Load,
    /// Luminance contrast enhancement and intensity normalization.
    Enhance,
    /// Disease classification.
    Classify,
    /// Qualitative feature detection (abnormal verdicts only).
    DetectFeatures,
}

impl Stage {
    /// Stable snake-case name, as used in logs and serialized errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Enhance => "enhance",
            Self::Classify => "classify",
            Self::DetectFeatures => "detect_features",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure raised by a single pipeline stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The image file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// The input exceeds the configured size limit.
    #[error("input image is {size} bytes, exceeding the {limit} byte limit")]
    InputTooLarge {
        /// Size of the rejected input in bytes.
        size: usize,
        /// Configured maximum in bytes.
        limit: usize,
    },

    /// The bytes could not be decoded as a supported raster format.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The image was decoded (or recognized) but cannot be brought into
    /// 3-channel color.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// Contrast enhancement received a malformed buffer.
    #[error("contrast enhancement failed: {0}")]
    Enhancement(String),

    /// A classifier backend failed or produced an invalid verdict.
    #[error("classification failed: {0}")]
    Classification(String),

    /// A feature detector backend failed.
    #[error("feature detection failed: {0}")]
    FeatureDetection(String),

    /// The caller cancelled the analysis before this stage started.
    #[error("analysis cancelled")]
    Cancelled,
}

/// Failure of a whole analysis run, tagged with the stage that raised it.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {source}")]
pub struct AnalysisError {
    /// Stage that failed.
    pub stage: Stage,
    /// The stage's original error.
    #[source]
    pub source: StageError,
}

impl AnalysisError {
    /// Wrap a stage error with its originating stage.
    #[must_use]
    pub const fn new(stage: Stage, source: StageError) -> Self {
        Self { stage, source }
    }

    /// Whether the run was stopped by a cancellation request rather than
    /// by a processing failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.source, StageError::Cancelled)
    }
}

/// Serde proxy for [`AnalysisError`].
///
/// The stage errors wrap `image::ImageError` and `std::io::Error`, neither of
/// which implements serde, so the cause travels as its `Display` string.
#[derive(Serialize)]
struct AnalysisErrorProxy<'a> {
    stage: Stage,
    message: &'a str,
}

impl Serialize for AnalysisError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let message = self.source.to_string();
        AnalysisErrorProxy {
            stage: self.stage,
            message: &message,
        }
        .serialize(serializer)
    }
}

/// Invalid [`AnalyzerConfig`](crate::config::AnalyzerConfig) values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid analyzer configuration: {0}")]
pub struct ConfigError(pub String);
