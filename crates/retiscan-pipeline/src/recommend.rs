//! Clinical recommendation table.
//!
//! A fixed branch table keyed on the verdict. Only diabetic retinopathy is
//! split by severity; every other disease maps to one list regardless of
//! grade.

use crate::types::ClassificationVerdict;

/// Routine care for normal verdicts.
pub const NORMAL: [&str; 3] = [
    "Continue routine annual eye examinations",
    "Maintain healthy lifestyle and blood sugar control if diabetic",
    "Monitor for any vision changes and report immediately",
];

/// Diabetic retinopathy graded Mild or Moderate.
pub const DIABETIC_RETINOPATHY_ROUTINE: [&str; 4] = [
    "Consult with ophthalmologist within 2-4 weeks",
    "Optimize blood glucose control (HbA1c < 7%)",
    "Monitor blood pressure and lipid levels",
    "Schedule follow-up examination in 3-6 months",
];

/// Diabetic retinopathy graded Severe or Proliferative.
pub const DIABETIC_RETINOPATHY_URGENT: [&str; 4] = [
    "URGENT: Consult retinal specialist within 1 week",
    "Consider anti-VEGF therapy or laser treatment",
    "Strict glycemic control required",
    "Monthly follow-up examinations recommended",
];

/// Glaucoma, any severity.
pub const GLAUCOMA: [&str; 4] = [
    "Consult with glaucoma specialist within 2 weeks",
    "Consider intraocular pressure lowering treatment",
    "Visual field testing recommended",
    "Regular monitoring every 3-4 months",
];

/// Macular degeneration, any severity.
pub const MACULAR_DEGENERATION: [&str; 4] = [
    "Consult with retinal specialist within 1-2 weeks",
    "Consider anti-VEGF injections if wet AMD",
    "AREDS2 vitamin supplementation if appropriate",
    "Regular OCT monitoring recommended",
];

/// Any other disease.
pub const FALLBACK: [&str; 3] = [
    "Consult with ophthalmologist for further evaluation",
    "Additional imaging studies may be required",
    "Follow-up examination in 1-2 weeks",
];

/// Severities that keep diabetic retinopathy on the routine list.
const ROUTINE_DR_SEVERITIES: [&str; 2] = ["Mild", "Moderate"];

/// Ordered recommendations for a verdict.
///
/// Disease names are matched by substring in the order diabetic
/// retinopathy, glaucoma, macular degeneration.
#[must_use]
pub fn recommend(verdict: &ClassificationVerdict) -> Vec<String> {
    to_owned(select(verdict))
}

fn select(verdict: &ClassificationVerdict) -> &'static [&'static str] {
    let Some(disease) = verdict.disease_name().filter(|_| !verdict.is_normal()) else {
        return &NORMAL;
    };

    if disease.contains("Diabetic Retinopathy") {
        let routine = verdict
            .severity()
            .is_some_and(|s| ROUTINE_DR_SEVERITIES.contains(&s));
        if routine {
            &DIABETIC_RETINOPATHY_ROUTINE
        } else {
            &DIABETIC_RETINOPATHY_URGENT
        }
    } else if disease.contains("Glaucoma") {
        &GLAUCOMA
    } else if disease.contains("Macular Degeneration") {
        &MACULAR_DEGENERATION
    } else {
        &FALLBACK
    }
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn abnormal(disease: &str, severity: &str) -> ClassificationVerdict {
        ClassificationVerdict::abnormal(disease, severity, 0.8, vec![]).unwrap()
    }

    #[test]
    fn normal_gets_routine_care() {
        let v = ClassificationVerdict::normal(0.9).unwrap();
        assert_eq!(recommend(&v), NORMAL);
    }

    #[test]
    fn mild_and_moderate_dr_are_routine() {
        for severity in ["Mild", "Moderate"] {
            let recs = recommend(&abnormal("Diabetic Retinopathy", severity));
            assert_eq!(recs, DIABETIC_RETINOPATHY_ROUTINE, "{severity}");
        }
    }

    #[test]
    fn severe_and_proliferative_dr_are_urgent() {
        for severity in ["Severe", "Proliferative"] {
            let recs = recommend(&abnormal("Diabetic Retinopathy", severity));
            assert_eq!(recs, DIABETIC_RETINOPATHY_URGENT, "{severity}");
            assert!(recs[0].starts_with("URGENT"));
        }
    }

    #[test]
    fn glaucoma_ignores_severity() {
        for severity in ["Mild", "Severe"] {
            assert_eq!(recommend(&abnormal("Glaucoma", severity)), GLAUCOMA);
        }
    }

    #[test]
    fn macular_degeneration_matches_by_substring() {
        let recs = recommend(&abnormal("Age-related Macular Degeneration", "Advanced"));
        assert_eq!(recs, MACULAR_DEGENERATION);
    }

    #[test]
    fn unknown_disease_falls_back() {
        let recs = recommend(&abnormal("Hypertensive Retinopathy", "Grade 2"));
        assert_eq!(recs, FALLBACK);
    }

    #[test]
    fn recommend_is_pure() {
        let v = abnormal("Diabetic Retinopathy", "Moderate");
        assert_eq!(recommend(&v), recommend(&v.clone()));
    }
}
