//! Incremental analysis: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! [`Analyzer::analyze`](crate::Analyzer::analyze) runs everything in one
//! call. [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use retiscan_pipeline::{
//! #     AnalysisError, AnalyzerConfig, ClassifierKind, FeatureDetectorKind, ImageSource, Pipeline,
//! # };
//! # fn run(source: ImageSource) -> Result<(), AnalysisError> {
//! let config = AnalyzerConfig::default();
//! let classified = Pipeline::new(&source, &config)
//!     .load()?
//!     .enhance()?
//!     .classify(&ClassifierKind::SeededStub)?;
//! println!("normal: {}", classified.verdict().is_normal());
//!
//! let report = classified
//!     .detect_features(&FeatureDetectorKind::SeededStub)?
//!     .assemble(&config.model_version, chrono::Utc::now());
//! assert_eq!(report.model_version(), "v2.1");
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state, making it
//! a compile-time error to skip stages or call them out of order. Every
//! failure comes back as an [`AnalysisError`] already tagged with the
//! stage that raised it.
//!
//! # Memory
//!
//! Buffers are dropped as soon as no later stage needs them: the 8-bit
//! RGB image is released by [`Loaded::enhance`], and the normalized image
//! by [`Classified::detect_features`].

use chrono::{DateTime, Utc};
use image::ImageFormat;
use tracing::debug;

use crate::classify::Classifier;
use crate::config::AnalyzerConfig;
use crate::error::{AnalysisError, Stage, StageError};
use crate::features::FeatureDetector;
use crate::load::LoadedImage;
use crate::types::{
    ClassificationVerdict, ClinicalReport, Dimensions, FindingSet, ImageSource, NormalizedImage,
    RgbImage,
};

fn tag(stage: Stage) -> impl FnOnce(StageError) -> AnalysisError {
    move |source| AnalysisError::new(stage, source)
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Analysis state before anything has been read.
#[must_use = "pipeline stages are consumed by advancing; call .load() to continue"]
pub struct Pending<'a> {
    config: &'a AnalyzerConfig,
    source: &'a ImageSource,
}

impl<'a> Pending<'a> {
    /// The image being analyzed.
    #[must_use]
    pub const fn source(&self) -> &ImageSource {
        self.source
    }

    /// Read, decode and resize the source image.
    ///
    /// # Errors
    ///
    /// Any load failure, tagged [`Stage::Load`].
    pub fn load(self) -> Result<Loaded<'a>, AnalysisError> {
        let loaded = crate::load::load(self.source, self.config).map_err(tag(Stage::Load))?;
        debug!(
            image = %self.source.label(),
            format = ?loaded.format,
            width = loaded.source_dimensions.width,
            height = loaded.source_dimensions.height,
            pixels = loaded.source_dimensions.pixel_count(),
            "loaded image"
        );
        Ok(Loaded {
            config: self.config,
            loaded,
        })
    }
}

// ───────────────────────── Stage 1: Loaded ───────────────────────────

/// Analysis state after loading: an 8-bit RGB image at the model input
/// resolution.
#[must_use = "pipeline stages are consumed by advancing; call .enhance() to continue"]
pub struct Loaded<'a> {
    config: &'a AnalyzerConfig,
    loaded: LoadedImage,
}

impl<'a> Loaded<'a> {
    /// The resized RGB image.
    #[must_use]
    pub const fn image(&self) -> &RgbImage {
        &self.loaded.image
    }

    /// Dimensions of the decoded source before resizing.
    #[must_use]
    pub const fn source_dimensions(&self) -> Dimensions {
        self.loaded.source_dimensions
    }

    /// Detected container format.
    #[must_use]
    pub const fn format(&self) -> ImageFormat {
        self.loaded.format
    }

    /// Size of the encoded input in bytes.
    #[must_use]
    pub const fn input_bytes(&self) -> usize {
        self.loaded.input_bytes
    }

    /// Apply luminance CLAHE and normalize to `[0, 1]`.
    ///
    /// # Errors
    ///
    /// [`StageError::Enhancement`] tagged [`Stage::Enhance`].
    pub fn enhance(self) -> Result<Enhanced<'a>, AnalysisError> {
        let normalized = crate::enhance::enhance(
            &self.loaded.image,
            self.config.clip_limit,
            self.config.tile_grid,
        )
        .map_err(tag(Stage::Enhance))?;
        debug!(
            clip_limit = self.config.clip_limit,
            cols = self.config.tile_grid.0,
            rows = self.config.tile_grid.1,
            "enhanced image"
        );
        Ok(Enhanced {
            config: self.config,
            normalized,
        })
    }
}

// ───────────────────────── Stage 2: Enhanced ─────────────────────────

/// Analysis state after enhancement.
#[must_use = "pipeline stages are consumed by advancing; call .classify() to continue"]
pub struct Enhanced<'a> {
    config: &'a AnalyzerConfig,
    normalized: NormalizedImage,
}

impl<'a> Enhanced<'a> {
    /// The enhanced image with channels in `[0, 1]`.
    #[must_use]
    pub const fn normalized(&self) -> &NormalizedImage {
        &self.normalized
    }

    /// Run a classifier over the enhanced image.
    ///
    /// # Errors
    ///
    /// The classifier's error, tagged [`Stage::Classify`].
    pub fn classify<C: Classifier + ?Sized>(
        self,
        classifier: &C,
    ) -> Result<Classified<'a>, AnalysisError> {
        let verdict = classifier
            .classify(&self.normalized)
            .map_err(tag(Stage::Classify))?;
        debug!(
            classifier = classifier.name(),
            is_normal = verdict.is_normal(),
            disease = verdict.disease_name().unwrap_or("-"),
            confidence = verdict.confidence(),
            "classified image"
        );
        Ok(Classified {
            config: self.config,
            normalized: self.normalized,
            verdict,
        })
    }
}

// ───────────────────────── Stage 3: Classified ───────────────────────

/// Analysis state after classification.
#[must_use = "pipeline stages are consumed by advancing; call .detect_features() to continue"]
pub struct Classified<'a> {
    config: &'a AnalyzerConfig,
    normalized: NormalizedImage,
    verdict: ClassificationVerdict,
}

impl<'a> Classified<'a> {
    /// The enhanced image.
    #[must_use]
    pub const fn normalized(&self) -> &NormalizedImage {
        &self.normalized
    }

    /// The classifier's verdict.
    #[must_use]
    pub const fn verdict(&self) -> &ClassificationVerdict {
        &self.verdict
    }

    /// Whether [`detect_features`](Self::detect_features) will invoke the
    /// detector (only for abnormal verdicts).
    #[must_use]
    pub const fn needs_features(&self) -> bool {
        !self.verdict.is_normal()
    }

    /// Run the detector for abnormal verdicts; normal verdicts get an
    /// empty finding set without calling it. The normalized image is
    /// dropped either way.
    ///
    /// # Errors
    ///
    /// The detector's error, tagged [`Stage::DetectFeatures`].
    pub fn detect_features<D: FeatureDetector + ?Sized>(
        self,
        detector: &D,
    ) -> Result<Detected<'a>, AnalysisError> {
        let findings = if self.needs_features() {
            let findings = detector
                .detect(&self.normalized)
                .map_err(tag(Stage::DetectFeatures))?;
            debug!(
                detector = detector.name(),
                count = findings.len(),
                "detected features"
            );
            findings
        } else {
            FindingSet::empty()
        };
        Ok(Detected {
            config: self.config,
            verdict: self.verdict,
            findings,
        })
    }
}

// ───────────────────────── Stage 4: Detected ─────────────────────────

/// Analysis state with every model output in hand.
#[must_use = "pipeline stages are consumed by advancing; call .assemble() to finish"]
pub struct Detected<'a> {
    config: &'a AnalyzerConfig,
    verdict: ClassificationVerdict,
    findings: FindingSet,
}

impl Detected<'_> {
    /// The classifier's verdict.
    #[must_use]
    pub const fn verdict(&self) -> &ClassificationVerdict {
        &self.verdict
    }

    /// Detected findings (empty for normal verdicts).
    #[must_use]
    pub const fn findings(&self) -> &FindingSet {
        &self.findings
    }

    /// The configuration this analysis runs under.
    #[must_use]
    pub const fn config(&self) -> &AnalyzerConfig {
        self.config
    }

    /// Look up recommendations and risk factors and build the report.
    #[must_use]
    pub fn assemble(self, model_version: &str, timestamp: DateTime<Utc>) -> ClinicalReport {
        let recommendations = crate::recommend::recommend(&self.verdict);
        let risk_factors = crate::risk::risk_factors(&self.verdict);
        ClinicalReport::assemble(
            self.verdict,
            self.findings,
            recommendations,
            risk_factors,
            model_version,
            timestamp,
        )
    }
}

// ───────────────────────── Entry point ───────────────────────────────

/// Entry point for stage-by-stage analysis.
pub struct Pipeline;

impl Pipeline {
    /// Start an analysis. Nothing is read until
    /// [`.load()`](Pending::load) is called.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new<'a>(source: &'a ImageSource, config: &'a AnalyzerConfig) -> Pending<'a> {
        Pending { config, source }
    }
}
