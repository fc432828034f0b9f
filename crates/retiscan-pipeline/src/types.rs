//! Shared types for the retiscan analysis pipeline.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, StageError};

/// Re-export `RgbImage` so downstream crates can reference the normalized
/// 8-bit input buffer without depending on `image` directly.
pub use image::RgbImage;

/// Enhanced image with every channel normalized to `[0, 1]`.
///
/// This is the buffer handed to classifiers and feature detectors.
pub type NormalizedImage = image::Rgb32FImage;

/// A readable image resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// An image file on disk.
    Path(PathBuf),
    /// Image bytes already resident in memory.
    Memory {
        /// Caller-chosen reference used in logs and batch results.
        name: String,
        /// Encoded image bytes (PNG, JPEG, BMP, TIFF, WebP).
        bytes: Vec<u8>,
    },
}

impl ImageSource {
    /// Convenience constructor for in-memory images.
    #[must_use]
    pub fn memory(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::Memory {
            name: name.into(),
            bytes,
        }
    }

    /// Stable reference string identifying this source.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Memory { name, .. } => name.clone(),
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// The classifier's disease/severity/confidence output for one image.
///
/// Fields are private: a verdict is either built through
/// [`normal`](Self::normal) or [`abnormal`](Self::abnormal), or
/// deserialized through the same checks. `disease_name` and `severity`
/// are present if and only if the verdict is abnormal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VerdictRepr", into = "VerdictRepr")]
pub struct ClassificationVerdict {
    is_normal: bool,
    disease_name: Option<String>,
    confidence: f64,
    severity: Option<String>,
    severity_levels: Vec<String>,
}

impl ClassificationVerdict {
    /// A verdict with no disease detected.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Classification`] if `confidence` is not a
    /// finite value in `[0, 1]`.
    pub fn normal(confidence: f64) -> Result<Self, StageError> {
        check_confidence(confidence)?;
        Ok(Self {
            is_normal: true,
            disease_name: None,
            confidence,
            severity: None,
            severity_levels: Vec::new(),
        })
    }

    /// A verdict naming a disease and its severity.
    ///
    /// `severity_levels` is the ordered severity scale of the disease; when
    /// it is non-empty, `severity` must be one of its entries.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Classification`] if the confidence is out of
    /// range, the disease or severity name is blank, or the severity is not
    /// part of the given scale.
    pub fn abnormal(
        disease_name: impl Into<String>,
        severity: impl Into<String>,
        confidence: f64,
        severity_levels: Vec<String>,
    ) -> Result<Self, StageError> {
        let disease_name = disease_name.into();
        let severity = severity.into();
        check_confidence(confidence)?;
        if disease_name.trim().is_empty() {
            return Err(StageError::Classification(
                "abnormal verdict requires a disease name".to_string(),
            ));
        }
        if severity.trim().is_empty() {
            return Err(StageError::Classification(
                "abnormal verdict requires a severity".to_string(),
            ));
        }
        if !severity_levels.is_empty() && !severity_levels.contains(&severity) {
            return Err(StageError::Classification(format!(
                "severity {severity:?} is not one of {severity_levels:?} for {disease_name}"
            )));
        }
        Ok(Self {
            is_normal: false,
            disease_name: Some(disease_name),
            confidence,
            severity: Some(severity),
            severity_levels,
        })
    }

    /// Whether no disease was detected.
    #[must_use]
    pub const fn is_normal(&self) -> bool {
        self.is_normal
    }

    /// Detected disease, `None` for normal verdicts.
    #[must_use]
    pub fn disease_name(&self) -> Option<&str> {
        self.disease_name.as_deref()
    }

    /// Classifier confidence in `[0, 1]`.
    #[must_use]
    pub const fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Severity of the detected disease, `None` for normal verdicts.
    #[must_use]
    pub fn severity(&self) -> Option<&str> {
        self.severity.as_deref()
    }

    /// Ordered severity scale of the detected disease (empty when normal).
    #[must_use]
    pub fn severity_levels(&self) -> &[String] {
        &self.severity_levels
    }
}

fn check_confidence(confidence: f64) -> Result<(), StageError> {
    if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(StageError::Classification(format!(
            "confidence {confidence} is outside [0, 1]"
        )))
    }
}

/// Wire form of [`ClassificationVerdict`].
#[derive(Serialize, Deserialize)]
struct VerdictRepr {
    is_normal: bool,
    disease_name: Option<String>,
    confidence: f64,
    severity: Option<String>,
    #[serde(default)]
    severity_levels: Vec<String>,
}

impl TryFrom<VerdictRepr> for ClassificationVerdict {
    type Error = StageError;

    fn try_from(repr: VerdictRepr) -> Result<Self, Self::Error> {
        match (repr.is_normal, repr.disease_name, repr.severity) {
            (true, None, None) => Self::normal(repr.confidence),
            (false, Some(disease), Some(severity)) => {
                Self::abnormal(disease, severity, repr.confidence, repr.severity_levels)
            }
            (true, _, _) => Err(StageError::Classification(
                "normal verdict must not carry a disease or severity".to_string(),
            )),
            (false, _, _) => Err(StageError::Classification(
                "abnormal verdict requires both a disease name and a severity".to_string(),
            )),
        }
    }
}

impl From<ClassificationVerdict> for VerdictRepr {
    fn from(verdict: ClassificationVerdict) -> Self {
        Self {
            is_normal: verdict.is_normal,
            disease_name: verdict.disease_name,
            confidence: verdict.confidence,
            severity: verdict.severity,
            severity_levels: verdict.severity_levels,
        }
    }
}

/// Ordered sequence of distinct qualitative finding labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>")]
pub struct FindingSet(Vec<String>);

impl FindingSet {
    /// The empty finding set reported for normal verdicts.
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build a finding set, dropping repeated labels while keeping the
    /// first occurrence's position.
    #[must_use]
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for label in labels {
            let label = label.into();
            if !out.contains(&label) {
                out.push(label);
            }
        }
        Self(out)
    }

    /// Returns `true` if there are no findings.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of findings.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// The finding labels in order.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.0
    }

    /// Consumes the set and returns the labels.
    #[must_use]
    pub fn into_labels(self) -> Vec<String> {
        self.0
    }
}

impl From<Vec<String>> for FindingSet {
    fn from(labels: Vec<String>) -> Self {
        Self::from_labels(labels)
    }
}

/// The fully assembled per-image analysis result.
///
/// Created once per successful pipeline run and never modified afterwards.
/// Persisting it (and choosing a wire format) is the caller's concern; the
/// serde derives use snake-case field names, and deserialization re-checks
/// the invariants [`assemble`](Self::assemble) guarantees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ReportRepr")]
pub struct ClinicalReport {
    is_normal: bool,
    disease_detected: bool,
    disease_name: Option<String>,
    confidence: f64,
    severity: Option<String>,
    severity_levels: Vec<String>,
    detected_features: Vec<String>,
    recommendations: Vec<String>,
    risk_factors: Vec<String>,
    model_version: String,
    analysis_timestamp: DateTime<Utc>,
}

impl ClinicalReport {
    /// Assemble a report from the outputs of every pipeline stage.
    #[must_use]
    pub fn assemble(
        verdict: ClassificationVerdict,
        findings: FindingSet,
        recommendations: Vec<String>,
        risk_factors: Vec<String>,
        model_version: impl Into<String>,
        analysis_timestamp: DateTime<Utc>,
    ) -> Self {
        let ClassificationVerdict {
            is_normal,
            disease_name,
            confidence,
            severity,
            severity_levels,
        } = verdict;
        Self {
            is_normal,
            disease_detected: !is_normal,
            disease_name,
            confidence,
            severity,
            severity_levels,
            detected_features: findings.into_labels(),
            recommendations,
            risk_factors,
            model_version: model_version.into(),
            analysis_timestamp,
        }
    }

    /// Whether no disease was detected.
    #[must_use]
    pub const fn is_normal(&self) -> bool {
        self.is_normal
    }

    /// Whether a disease was detected (the negation of [`is_normal`](Self::is_normal)).
    #[must_use]
    pub const fn disease_detected(&self) -> bool {
        self.disease_detected
    }

    /// Detected disease name.
    #[must_use]
    pub fn disease_name(&self) -> Option<&str> {
        self.disease_name.as_deref()
    }

    /// Classifier confidence in `[0, 1]`.
    #[must_use]
    pub const fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Severity of the detected disease.
    #[must_use]
    pub fn severity(&self) -> Option<&str> {
        self.severity.as_deref()
    }

    /// Ordered severity scale of the detected disease.
    #[must_use]
    pub fn severity_levels(&self) -> &[String] {
        &self.severity_levels
    }

    /// Qualitative findings (empty for normal reports).
    #[must_use]
    pub fn detected_features(&self) -> &[String] {
        &self.detected_features
    }

    /// Ordered clinical recommendations.
    #[must_use]
    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }

    /// Associated risk factors (empty for normal reports).
    #[must_use]
    pub fn risk_factors(&self) -> &[String] {
        &self.risk_factors
    }

    /// Model version that produced the verdict.
    #[must_use]
    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// When the report was assembled.
    #[must_use]
    pub const fn analysis_timestamp(&self) -> DateTime<Utc> {
        self.analysis_timestamp
    }

    /// Compare two reports ignoring `analysis_timestamp`.
    #[must_use]
    pub fn same_findings_as(&self, other: &Self) -> bool {
        Self {
            analysis_timestamp: other.analysis_timestamp,
            ..self.clone()
        } == *other
    }
}

/// Wire form of [`ClinicalReport`], validated on the way in.
#[derive(Deserialize)]
struct ReportRepr {
    is_normal: bool,
    disease_detected: bool,
    disease_name: Option<String>,
    confidence: f64,
    severity: Option<String>,
    #[serde(default)]
    severity_levels: Vec<String>,
    #[serde(default)]
    detected_features: Vec<String>,
    recommendations: Vec<String>,
    #[serde(default)]
    risk_factors: Vec<String>,
    model_version: String,
    analysis_timestamp: DateTime<Utc>,
}

impl TryFrom<ReportRepr> for ClinicalReport {
    type Error = StageError;

    fn try_from(repr: ReportRepr) -> Result<Self, Self::Error> {
        if repr.disease_detected == repr.is_normal {
            return Err(StageError::Classification(
                "disease_detected must be the negation of is_normal".to_string(),
            ));
        }
        let verdict = ClassificationVerdict::try_from(VerdictRepr {
            is_normal: repr.is_normal,
            disease_name: repr.disease_name,
            confidence: repr.confidence,
            severity: repr.severity,
            severity_levels: repr.severity_levels,
        })?;
        if verdict.is_normal()
            && !(repr.detected_features.is_empty() && repr.risk_factors.is_empty())
        {
            return Err(StageError::Classification(
                "normal report must not carry findings or risk factors".to_string(),
            ));
        }
        Ok(Self::assemble(
            verdict,
            FindingSet::from_labels(repr.detected_features),
            repr.recommendations,
            repr.risk_factors,
            repr.model_version,
            repr.analysis_timestamp,
        ))
    }
}

/// Outcome of analyzing one image within a batch.
///
/// One result is produced per input, in input order.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchItemResult {
    /// The image was analyzed.
    Success {
        /// Reference of the analyzed image.
        image: String,
        /// The assembled report.
        report: ClinicalReport,
    },
    /// The image failed at some stage; other items are unaffected.
    Failure {
        /// Reference of the failed image.
        image: String,
        /// The failing stage and its cause.
        error: AnalysisError,
    },
}

impl BatchItemResult {
    /// Reference of the image this result belongs to.
    #[must_use]
    pub fn image(&self) -> &str {
        match self {
            Self::Success { image, .. } | Self::Failure { image, .. } => image,
        }
    }

    /// Returns `true` for [`Success`](Self::Success).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The report, if the item succeeded.
    #[must_use]
    pub const fn report(&self) -> Option<&ClinicalReport> {
        match self {
            Self::Success { report, .. } => Some(report),
            Self::Failure { .. } => None,
        }
    }

    /// The error, if the item failed.
    #[must_use]
    pub const fn error(&self) -> Option<&AnalysisError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }
}
