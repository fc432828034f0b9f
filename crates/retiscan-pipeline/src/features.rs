//! Qualitative feature detection for abnormal verdicts.
//!
//! Same shape as [`classify`](crate::classify): a [`FeatureDetector`] trait
//! plus a [`FeatureDetectorKind`] enum naming the bundled backends.

use std::hash::Hasher;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::error::StageError;
use crate::types::{FindingSet, NormalizedImage};

/// Finding labels the seeded stub samples from.
pub const FINDING_CATALOG: [&str; 8] = [
    "Microaneurysms present",
    "Hard exudates detected",
    "Cotton wool spots identified",
    "Neovascularization observed",
    "Hemorrhages detected",
    "Venous beading present",
    "Optic disc abnormalities",
    "Macular edema indicators",
];

/// Selects which bundled feature detector to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeatureDetectorKind {
    /// Picks 2 to 4 distinct catalogue labels with a generator seeded from
    /// the image content.
    ///
    /// Each call builds its own generator, so the result depends only on
    /// the pixels and never on call order.
    #[default]
    SeededStub,
}

/// Trait for feature detection backends.
///
/// Only invoked for abnormal verdicts.
pub trait FeatureDetector {
    /// Short backend name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Detect qualitative findings in one image.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::FeatureDetection`] if the backend fails.
    fn detect(&self, image: &NormalizedImage) -> Result<FindingSet, StageError>;
}

impl FeatureDetector for FeatureDetectorKind {
    fn name(&self) -> &str {
        match *self {
            Self::SeededStub => "seeded-stub",
        }
    }

    fn detect(&self, image: &NormalizedImage) -> Result<FindingSet, StageError> {
        match *self {
            Self::SeededStub => Ok(detect_seeded_stub(image)),
        }
    }
}

/// Stable seed over the image dimensions and the bit patterns of every
/// sample.
#[must_use]
pub fn content_seed(image: &NormalizedImage) -> u64 {
    let mut hasher = SipHasher13::new();
    hasher.write_u32(image.width());
    hasher.write_u32(image.height());
    for sample in image.as_raw() {
        hasher.write_u32(sample.to_bits());
    }
    hasher.finish()
}

fn detect_seeded_stub(image: &NormalizedImage) -> FindingSet {
    let mut rng = StdRng::seed_from_u64(content_seed(image));
    let count = rng.gen_range(2..=4);
    FindingSet::from_labels(FINDING_CATALOG.choose_multiple(&mut rng, count).copied())
}
