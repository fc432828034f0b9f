//! Risk-factor lookup.

use crate::types::ClassificationVerdict;

/// Diabetic retinopathy risk factors.
pub const DIABETIC_RETINOPATHY: [&str; 3] = ["Diabetes Mellitus", "Hypertension", "Hyperlipidemia"];

/// Glaucoma risk factors.
pub const GLAUCOMA: [&str; 3] = ["Elevated IOP", "Family History", "Age > 60"];

/// Macular degeneration risk factors.
pub const MACULAR_DEGENERATION: [&str; 4] =
    ["Age > 50", "Smoking", "Family History", "Cardiovascular Disease"];

/// Risk factors for any other abnormal finding.
pub const FALLBACK: [&str; 2] = ["Age-related changes", "Systemic conditions"];

/// Ordered risk factors associated with a verdict; empty when normal.
///
/// Matching follows the same substring order as
/// [`recommend`](crate::recommend::recommend).
#[must_use]
pub fn risk_factors(verdict: &ClassificationVerdict) -> Vec<String> {
    let Some(disease) = verdict.disease_name().filter(|_| !verdict.is_normal()) else {
        return Vec::new();
    };

    let factors: &[&str] = if disease.contains("Diabetic Retinopathy") {
        &DIABETIC_RETINOPATHY
    } else if disease.contains("Glaucoma") {
        &GLAUCOMA
    } else if disease.contains("Macular Degeneration") {
        &MACULAR_DEGENERATION
    } else {
        &FALLBACK
    };
    factors.iter().map(|s| (*s).to_string()).collect()
}
