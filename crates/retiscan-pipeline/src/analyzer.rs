//! The analysis orchestrator.
//!
//! [`Analyzer`] owns a validated configuration plus one classifier and one
//! feature detector, and runs the stage chain of [`Pipeline`] for single
//! images and batches. A failing batch item becomes a
//! [`BatchItemResult::Failure`] and never stops the rest of the batch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::classify::{Classifier, ClassifierKind};
use crate::config::AnalyzerConfig;
use crate::diagnostics::{AnalysisDiagnostics, Clock, StageDiagnostics, StageMetrics};
use crate::error::{AnalysisError, ConfigError, Stage, StageError};
use crate::features::{FeatureDetector, FeatureDetectorKind};
use crate::pipeline::Pipeline;
use crate::types::{BatchItemResult, ClinicalReport, ImageSource};

/// Cooperative cancellation flag shared between a caller and a running
/// analysis.
///
/// Clones share the same flag. The analyzer checks it before every stage;
/// a stage already running is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn check(&self, stage: Stage) -> Result<(), AnalysisError> {
        if self.is_cancelled() {
            Err(AnalysisError::new(stage, StageError::Cancelled))
        } else {
            Ok(())
        }
    }
}

/// Runs the full analysis for single images and batches.
///
/// The classifier and detector default to the bundled seeded stubs; swap
/// them with [`with_classifier`](Self::with_classifier) and
/// [`with_detector`](Self::with_detector).
#[derive(Debug, Clone)]
pub struct Analyzer<C = ClassifierKind, D = FeatureDetectorKind> {
    config: AnalyzerConfig,
    classifier: C,
    detector: D,
}

impl Analyzer {
    /// Build an analyzer with the bundled classifier and detector.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(config: AnalyzerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            classifier: ClassifierKind::default(),
            detector: FeatureDetectorKind::default(),
        })
    }
}

impl<C, D> Analyzer<C, D> {
    /// Replace the classifier.
    #[must_use]
    pub fn with_classifier<C2: Classifier>(self, classifier: C2) -> Analyzer<C2, D> {
        Analyzer {
            config: self.config,
            classifier,
            detector: self.detector,
        }
    }

    /// Replace the feature detector.
    #[must_use]
    pub fn with_detector<D2: FeatureDetector>(self, detector: D2) -> Analyzer<C, D2> {
        Analyzer {
            config: self.config,
            classifier: self.classifier,
            detector,
        }
    }

    /// The validated configuration.
    #[must_use]
    pub const fn config(&self) -> &AnalyzerConfig {
        &self.config
    }
}

impl<C: Classifier, D: FeatureDetector> Analyzer<C, D> {
    /// Analyze one image.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError`] carrying the first failing stage and its
    /// original cause.
    pub fn analyze(&self, source: &ImageSource) -> Result<ClinicalReport, AnalysisError> {
        self.run(source, None)
    }

    /// Analyze one image, checking `cancel` before each stage.
    ///
    /// # Errors
    ///
    /// As [`analyze`](Self::analyze), plus [`StageError::Cancelled`]
    /// tagged with the stage that was about to start.
    pub fn analyze_cancellable(
        &self,
        source: &ImageSource,
        cancel: &CancelToken,
    ) -> Result<ClinicalReport, AnalysisError> {
        self.run(source, Some(cancel))
    }

    /// Analyze one image and record per-stage timings and metrics.
    ///
    /// # Errors
    ///
    /// As [`analyze`](Self::analyze).
    pub fn analyze_with_diagnostics<K: Clock>(
        &self,
        source: &ImageSource,
        clock: &K,
    ) -> Result<(ClinicalReport, AnalysisDiagnostics), AnalysisError> {
        let start = clock.now();

        let t = clock.now();
        let loaded = Pipeline::new(source, &self.config).load()?;
        let load = StageDiagnostics {
            duration: clock.elapsed(&t),
            metrics: StageMetrics::Load {
                input_bytes: loaded.input_bytes(),
                format: format!("{:?}", loaded.format()),
                source_width: loaded.source_dimensions().width,
                source_height: loaded.source_dimensions().height,
                input_size: self.config.input_size,
            },
        };

        let t = clock.now();
        let enhanced = loaded.enhance()?;
        let enhance = StageDiagnostics {
            duration: clock.elapsed(&t),
            metrics: StageMetrics::Enhance {
                clip_limit: self.config.clip_limit,
                tile_grid: self.config.tile_grid,
                mean_intensity: crate::diagnostics::mean_intensity(enhanced.normalized()),
            },
        };

        let t = clock.now();
        let classified = enhanced.classify(&self.classifier)?;
        let classify = StageDiagnostics {
            duration: clock.elapsed(&t),
            metrics: StageMetrics::Classify {
                classifier: self.classifier.name().to_string(),
                is_normal: classified.verdict().is_normal(),
                confidence: classified.verdict().confidence(),
            },
        };

        let ran_detector = classified.needs_features();
        let t = clock.now();
        let detected = classified.detect_features(&self.detector)?;
        let detect_features = ran_detector.then(|| StageDiagnostics {
            duration: clock.elapsed(&t),
            metrics: StageMetrics::DetectFeatures {
                detector: self.detector.name().to_string(),
                finding_count: detected.findings().len(),
            },
        });

        let t = clock.now();
        let report = detected.assemble(&self.config.model_version, Utc::now());
        let assemble = StageDiagnostics {
            duration: clock.elapsed(&t),
            metrics: StageMetrics::Assemble {
                recommendation_count: report.recommendations().len(),
                risk_factor_count: report.risk_factors().len(),
            },
        };

        log_report(source, &report);
        let diagnostics = AnalysisDiagnostics {
            load,
            enhance,
            classify,
            detect_features,
            assemble,
            total_duration: clock.elapsed(&start),
        };
        Ok((report, diagnostics))
    }

    /// Analyze every source in order, one at a time.
    ///
    /// Always returns exactly one result per input, in input order.
    #[must_use]
    pub fn analyze_batch(&self, sources: &[ImageSource]) -> Vec<BatchItemResult> {
        sources.iter().map(|source| self.batch_item(source)).collect()
    }

    fn batch_item(&self, source: &ImageSource) -> BatchItemResult {
        let image = source.label();
        match self.analyze(source) {
            Ok(report) => BatchItemResult::Success { image, report },
            Err(error) => {
                warn!(image = %image, stage = %error.stage, "batch item failed: {}", error.source);
                BatchItemResult::Failure { image, error }
            }
        }
    }

    fn run(
        &self,
        source: &ImageSource,
        cancel: Option<&CancelToken>,
    ) -> Result<ClinicalReport, AnalysisError> {
        let check = |stage| cancel.map_or(Ok(()), |token| token.check(stage));

        check(Stage::Load)?;
        let loaded = Pipeline::new(source, &self.config).load()?;
        check(Stage::Enhance)?;
        let enhanced = loaded.enhance()?;
        check(Stage::Classify)?;
        let classified = enhanced.classify(&self.classifier)?;
        if classified.needs_features() {
            check(Stage::DetectFeatures)?;
        }
        let report = classified
            .detect_features(&self.detector)?
            .assemble(&self.config.model_version, Utc::now());

        log_report(source, &report);
        Ok(report)
    }
}

impl<C, D> Analyzer<C, D>
where
    C: Classifier + Sync,
    D: FeatureDetector + Sync,
{
    /// Analyze every source on the rayon thread pool.
    ///
    /// Produces the same results, in the same order, as
    /// [`analyze_batch`](Self::analyze_batch).
    #[must_use]
    pub fn analyze_batch_parallel(&self, sources: &[ImageSource]) -> Vec<BatchItemResult> {
        sources
            .par_iter()
            .map(|source| self.batch_item(source))
            .collect()
    }
}

fn log_report(source: &ImageSource, report: &ClinicalReport) {
    info!(
        image = %source.label(),
        is_normal = report.is_normal(),
        disease = report.disease_name().unwrap_or("-"),
        severity = report.severity().unwrap_or("-"),
        confidence = report.confidence(),
        "analysis complete"
    );
}

/// Counts over a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Number of inputs.
    pub total: usize,
    /// Items that produced a report.
    pub succeeded: usize,
    /// Items that failed at some stage.
    pub failed: usize,
    /// Successful reports with a normal verdict.
    pub normal: usize,
    /// Successful reports with a disease detected.
    pub abnormal: usize,
}

impl BatchSummary {
    /// Tally a slice of batch results.
    #[must_use]
    pub fn from_results(results: &[BatchItemResult]) -> Self {
        results.iter().fold(Self::default(), |mut acc, item| {
            acc.total += 1;
            match item.report() {
                Some(report) if report.is_normal() => {
                    acc.succeeded += 1;
                    acc.normal += 1;
                }
                Some(_) => {
                    acc.succeeded += 1;
                    acc.abnormal += 1;
                }
                None => acc.failed += 1,
            }
            acc
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use super::*;
    use crate::types::{ClassificationVerdict, NormalizedImage};

    #[allow(clippy::cast_possible_truncation)]
    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_fn(w, h, |x, y| {
            image::Rgba([(x * 5) as u8, (y * 3) as u8, 60, 255])
        });
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(
            encoder,
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgba8,
        )
        .unwrap();
        buf
    }

    fn analyzer() -> Analyzer {
        Analyzer::new(AnalyzerConfig {
            input_size: 32,
            tile_grid: (4, 4),
            ..AnalyzerConfig::default()
        })
        .unwrap()
    }

    struct AlwaysAbnormal;

    impl Classifier for AlwaysAbnormal {
        fn name(&self) -> &str {
            "always-abnormal"
        }

        fn classify(&self, _: &NormalizedImage) -> Result<ClassificationVerdict, StageError> {
            ClassificationVerdict::abnormal("Diabetic Retinopathy", "Severe", 0.8, vec![])
        }
    }

    /// Clock advancing one millisecond per reading.
    struct TickClock(Cell<u64>);

    impl Clock for TickClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.0.get() + 1;
            self.0.set(t);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.now() - since)
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = AnalyzerConfig {
            clip_limit: 0.0,
            ..AnalyzerConfig::default()
        };
        assert!(Analyzer::new(config).is_err());
    }

    #[test]
    fn analyze_stamps_model_version() {
        let report = analyzer()
            .analyze(&ImageSource::memory("a", png_bytes(10, 10)))
            .unwrap();
        assert_eq!(report.model_version(), "v2.1");
    }

    #[test]
    fn cancelled_before_start_fails_at_load() {
        let token = CancelToken::new();
        token.cancel();
        let err = analyzer()
            .analyze_cancellable(&ImageSource::memory("a", png_bytes(4, 4)), &token)
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.stage, Stage::Load);
    }

    #[test]
    fn uncancelled_token_runs_to_completion() {
        let token = CancelToken::new();
        let result = analyzer().analyze_cancellable(&ImageSource::memory("a", png_bytes(4, 4)), &token);
        assert!(result.is_ok());
        assert!(!token.is_cancelled());
    }

    /// Requests cancellation while classifying, then returns its verdict.
    struct CancellingClassifier {
        token: CancelToken,
        verdict: ClassificationVerdict,
    }

    impl Classifier for CancellingClassifier {
        fn name(&self) -> &str {
            "cancelling"
        }

        fn classify(&self, _: &NormalizedImage) -> Result<ClassificationVerdict, StageError> {
            self.token.cancel();
            Ok(self.verdict.clone())
        }
    }

    #[test]
    fn cancel_during_classify_stops_before_feature_detection() {
        let token = CancelToken::new();
        let verdict =
            ClassificationVerdict::abnormal("Diabetic Retinopathy", "Severe", 0.8, vec![]).unwrap();
        let analyzer = analyzer().with_classifier(CancellingClassifier {
            token: token.clone(),
            verdict,
        });
        let err = analyzer
            .analyze_cancellable(&ImageSource::memory("a", png_bytes(4, 4)), &token)
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.stage, Stage::DetectFeatures);
    }

    #[test]
    fn cancel_during_classify_of_normal_verdict_still_completes() {
        let token = CancelToken::new();
        let analyzer = analyzer().with_classifier(CancellingClassifier {
            token: token.clone(),
            verdict: ClassificationVerdict::normal(0.95).unwrap(),
        });
        let report = analyzer
            .analyze_cancellable(&ImageSource::memory("a", png_bytes(4, 4)), &token)
            .unwrap();
        assert!(token.is_cancelled());
        assert!(report.is_normal());
        assert!(report.detected_features().is_empty());
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn diagnostics_cover_detector_for_abnormal() {
        let analyzer = analyzer().with_classifier(AlwaysAbnormal);
        let clock = TickClock(Cell::new(0));
        let (report, diag) = analyzer
            .analyze_with_diagnostics(&ImageSource::memory("a", png_bytes(12, 9)), &clock)
            .unwrap();
        assert!(report.disease_detected());
        assert!(diag.detect_features.is_some());
        assert!(diag.total_duration >= diag.load.duration + diag.enhance.duration);
        match diag.load.metrics {
            StageMetrics::Load {
                source_width,
                source_height,
                input_size,
                ..
            } => assert_eq!((source_width, source_height, input_size), (12, 9, 32)),
            ref other => unreachable!("unexpected metrics {other:?}"),
        }
    }

    #[test]
    fn batch_isolates_failures() {
        let sources = vec![
            ImageSource::memory("ok-1", png_bytes(6, 6)),
            ImageSource::memory("broken", vec![0xDE, 0xAD, 0xBE, 0xEF]),
            ImageSource::memory("ok-2", png_bytes(7, 5)),
        ];
        let results = analyzer().analyze_batch(&sources);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert!(!results[1].is_success());
        assert_eq!(results[1].image(), "broken");
        assert_eq!(results[1].error().unwrap().stage, Stage::Load);
        assert!(results[2].is_success());
    }

    #[test]
    fn parallel_batch_matches_sequential() {
        let sources: Vec<ImageSource> = (1..=6)
            .map(|i| ImageSource::memory(format!("img-{i}"), png_bytes(i * 3, i * 2)))
            .collect();
        let analyzer = analyzer();
        let sequential = analyzer.analyze_batch(&sources);
        let parallel = analyzer.analyze_batch_parallel(&sources);
        assert_eq!(sequential.len(), parallel.len());
        for (a, b) in sequential.iter().zip(&parallel) {
            assert_eq!(a.image(), b.image());
            assert!(a.report().unwrap().same_findings_as(b.report().unwrap()));
        }
    }

    #[test]
    fn summary_counts_outcomes() {
        let analyzer = analyzer().with_classifier(AlwaysAbnormal);
        let sources = vec![
            ImageSource::memory("a", png_bytes(5, 5)),
            ImageSource::memory("b", Vec::new()),
            ImageSource::memory("c", png_bytes(8, 8)),
        ];
        let summary = BatchSummary::from_results(&analyzer.analyze_batch(&sources));
        assert_eq!(
            summary,
            BatchSummary {
                total: 3,
                succeeded: 2,
                failed: 1,
                normal: 0,
                abnormal: 2,
            }
        );
    }

    #[test]
    fn empty_batch_yields_empty_results() {
        assert!(analyzer().analyze_batch(&[]).is_empty());
        assert_eq!(BatchSummary::from_results(&[]), BatchSummary::default());
    }
}
