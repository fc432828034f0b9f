//! Disease classification: turn a normalized image into a verdict.
//!
//! This module defines the [`Classifier`] trait for pluggable
//! classification backends and the [`ClassifierKind`] enum for selecting
//! the bundled backend at runtime.
//!
//! # Strategy pattern
//!
//! A real model and the seeded stub satisfy the same trait, so the
//! [`Analyzer`](crate::Analyzer) never knows which one it is driving. Tests
//! plug in scripted classifiers the same way.

use std::fmt;
use std::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::error::StageError;
use crate::types::{ClassificationVerdict, NormalizedImage};

/// Retinal diseases known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Disease {
    /// Diabetic retinopathy.
    DiabeticRetinopathy,
    /// Glaucoma.
    Glaucoma,
    /// Age-related macular degeneration.
    MacularDegeneration,
    /// Hypertensive retinopathy. Supported by the catalogue but never
    /// produced by the seeded stub.
    HypertensiveRetinopathy,
}

impl Disease {
    /// Every supported disease, in catalogue order.
    pub const ALL: [Self; 4] = [
        Self::DiabeticRetinopathy,
        Self::Glaucoma,
        Self::MacularDegeneration,
        Self::HypertensiveRetinopathy,
    ];

    /// Display name as it appears in reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DiabeticRetinopathy => "Diabetic Retinopathy",
            Self::Glaucoma => "Glaucoma",
            Self::MacularDegeneration => "Age-related Macular Degeneration",
            Self::HypertensiveRetinopathy => "Hypertensive Retinopathy",
        }
    }

    /// Ordered severity scale, mildest first. Empty when the catalogue
    /// defines no grading.
    #[must_use]
    pub const fn severity_levels(self) -> &'static [&'static str] {
        match self {
            Self::DiabeticRetinopathy => &["Mild", "Moderate", "Severe", "Proliferative"],
            Self::Glaucoma => &["Mild", "Moderate", "Severe"],
            Self::MacularDegeneration => &["Early", "Intermediate", "Advanced"],
            Self::HypertensiveRetinopathy => &[],
        }
    }

    /// Look up a disease by its exact display name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.name() == name)
    }
}

impl fmt::Display for Disease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Selects which bundled classifier backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClassifierKind {
    /// Deterministic placeholder keyed on the image shape.
    ///
    /// Every image of the same dimensions gets the same verdict. It stands
    /// in for a trained model and carries no diagnostic value.
    #[default]
    SeededStub,
}

/// Trait for classification backends.
///
/// Input: an enhanced image with channels in `[0, 1]`.
/// Output: a validated [`ClassificationVerdict`].
pub trait Classifier {
    /// Short backend name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Classify one image.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Classification`] if the backend fails.
    fn classify(&self, image: &NormalizedImage) -> Result<ClassificationVerdict, StageError>;
}

impl Classifier for ClassifierKind {
    fn name(&self) -> &str {
        match *self {
            Self::SeededStub => "seeded-stub",
        }
    }

    fn classify(&self, image: &NormalizedImage) -> Result<ClassificationVerdict, StageError> {
        match *self {
            Self::SeededStub => classify_seeded_stub(image),
        }
    }
}

/// Probability that the stub reports an abnormal verdict.
const ABNORMAL_RATE: f64 = 0.7;

/// Confidence range of normal verdicts.
const NORMAL_CONFIDENCE: (f64, f64) = (0.85, 0.98);

/// Diseases the stub chooses from, with their confidence ranges.
const STUB_DISEASES: [(Disease, f64, f64); 3] = [
    (Disease::DiabeticRetinopathy, 0.65, 0.95),
    (Disease::Glaucoma, 0.60, 0.90),
    (Disease::MacularDegeneration, 0.55, 0.85),
];

/// Seed derived from the image shape only, reduced modulo 1000.
///
/// SipHash-1-3 with zero keys keeps the seed stable across processes and
/// platforms.
#[must_use]
pub fn shape_seed(image: &NormalizedImage) -> u64 {
    let mut hasher = SipHasher13::new();
    (image.height(), image.width(), 3u32).hash(&mut hasher);
    hasher.finish() % 1000
}

fn classify_seeded_stub(image: &NormalizedImage) -> Result<ClassificationVerdict, StageError> {
    let mut rng = StdRng::seed_from_u64(shape_seed(image));

    if rng.r#gen::<f64>() >= ABNORMAL_RATE {
        let (lo, hi) = NORMAL_CONFIDENCE;
        return ClassificationVerdict::normal(rng.gen_range(lo..=hi));
    }

    let &(disease, lo, hi) = STUB_DISEASES
        .choose(&mut rng)
        .ok_or_else(|| StageError::Classification("stub disease table is empty".to_string()))?;
    let levels = disease.severity_levels();
    let severity = levels.choose(&mut rng).ok_or_else(|| {
        StageError::Classification(format!("{disease} has no severity levels"))
    })?;
    let confidence = rng.gen_range(lo..=hi);

    ClassificationVerdict::abnormal(
        disease.name(),
        *severity,
        confidence,
        levels.iter().map(|s| (*s).to_string()).collect(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn blank(w: u32, h: u32) -> NormalizedImage {
        NormalizedImage::new(w, h)
    }

    #[test]
    fn default_is_seeded_stub() {
        assert_eq!(ClassifierKind::default(), ClassifierKind::SeededStub);
        assert_eq!(ClassifierKind::SeededStub.name(), "seeded-stub");
    }

    #[test]
    fn stub_is_deterministic() {
        let img = blank(64, 64);
        let a = ClassifierKind::SeededStub.classify(&img).unwrap();
        let b = ClassifierKind::SeededStub.classify(&img).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn stub_ignores_pixel_content() {
        let dark = blank(32, 32);
        let bright = NormalizedImage::from_pixel(32, 32, image::Rgb([1.0, 0.5, 0.25]));
        assert_eq!(
            ClassifierKind::SeededStub.classify(&dark).unwrap(),
            ClassifierKind::SeededStub.classify(&bright).unwrap(),
        );
    }

    #[test]
    fn shape_seed_is_below_one_thousand() {
        for (w, h) in [(1, 1), (512, 512), (640, 480), (3, 7000)] {
            assert!(shape_seed(&blank(w, h)) < 1000);
        }
    }

    #[test]
    fn stub_verdicts_respect_catalogue() {
        // Sweep a range of shapes so both normal and abnormal paths run.
        let mut normal = 0;
        let mut abnormal = 0;
        for side in 1..=60 {
            let v = ClassifierKind::SeededStub.classify(&blank(side, 1)).unwrap();
            if v.is_normal() {
                normal += 1;
                assert!((0.85..=0.98).contains(&v.confidence()));
                continue;
            }
            abnormal += 1;
            let name = v.disease_name().unwrap();
            let (disease, lo, hi) = STUB_DISEASES
                .into_iter()
                .find(|(d, _, _)| d.name() == name)
                .unwrap();
            assert!((lo..=hi).contains(&v.confidence()), "{name}: {}", v.confidence());
            assert!(disease.severity_levels().contains(&v.severity().unwrap()));
            assert_eq!(v.severity_levels().len(), disease.severity_levels().len());
        }
        assert!(normal > 0, "expected some normal verdicts");
        assert!(abnormal > normal, "expected abnormal to dominate");
    }

    #[test]
    fn stub_never_picks_hypertensive_retinopathy() {
        for side in 1..=60 {
            let v = ClassifierKind::SeededStub.classify(&blank(side, side)).unwrap();
            assert_ne!(v.disease_name(), Some("Hypertensive Retinopathy"));
        }
    }

    #[test]
    fn disease_lookup_by_name() {
        for disease in Disease::ALL {
            assert_eq!(Disease::from_name(disease.name()), Some(disease));
        }
        assert_eq!(Disease::from_name("Retinitis"), None);
    }
}
