//! Analysis diagnostics: timing and per-stage metrics.
//!
//! Collected by
//! [`Analyzer::analyze_with_diagnostics`](crate::Analyzer::analyze_with_diagnostics)
//! alongside the report. Timing goes through the [`Clock`] trait so tests
//! can supply a deterministic clock.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom("duration seconds must be finite and non-negative")
        })
    }
}

/// Source of monotonic time for stage measurements.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// Current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Diagnostics collected from a single analysis.
///
/// `detect_features` is `None` when the verdict was normal and the
/// detector never ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisDiagnostics {
    /// Reading, decoding and resizing.
    pub load: StageDiagnostics,
    /// Lab conversion, CLAHE and normalization.
    pub enhance: StageDiagnostics,
    /// Classification.
    pub classify: StageDiagnostics,
    /// Feature detection (abnormal verdicts only).
    pub detect_features: Option<StageDiagnostics>,
    /// Recommendation and risk lookup plus report assembly.
    pub assemble: StageDiagnostics,
    /// Total wall-clock duration of the analysis (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Load stage metrics.
    Load {
        /// Size of the encoded input.
        input_bytes: usize,
        /// Detected container format.
        format: String,
        /// Decoded width before resizing.
        source_width: u32,
        /// Decoded height before resizing.
        source_height: u32,
        /// Side length after resizing.
        input_size: u32,
    },
    /// Enhance stage metrics.
    Enhance {
        /// CLAHE clip limit.
        clip_limit: f32,
        /// CLAHE tile grid `(columns, rows)`.
        tile_grid: (u32, u32),
        /// Mean normalized intensity over all channels.
        mean_intensity: f64,
    },
    /// Classify stage metrics.
    Classify {
        /// Backend name.
        classifier: String,
        /// Whether the verdict was normal.
        is_normal: bool,
        /// Verdict confidence.
        confidence: f64,
    },
    /// Feature detection metrics.
    DetectFeatures {
        /// Backend name.
        detector: String,
        /// Number of findings.
        finding_count: usize,
    },
    /// Assembly metrics.
    Assemble {
        /// Number of recommendations.
        recommendation_count: usize,
        /// Number of risk factors.
        risk_factor_count: usize,
    },
}

impl AnalysisDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Analysis Diagnostics\n{}", "=".repeat(60)));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration)
        ));
        lines.push(String::new());
        lines.push(format!(
            "{:<18} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let mut stages = vec![
            ("Load", &self.load),
            ("Enhance", &self.enhance),
            ("Classify", &self.classify),
        ];
        if let Some(ref detect) = self.detect_features {
            stages.push(("Detect Features", detect));
        }
        stages.push(("Assemble", &self.assemble));

        for (name, diag) in stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<18} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Load {
            input_bytes,
            format,
            source_width,
            source_height,
            input_size,
        } => format!(
            "{format} {input_bytes} bytes, {source_width}x{source_height} -> {input_size}x{input_size}"
        ),
        StageMetrics::Enhance {
            clip_limit,
            tile_grid: (cols, rows),
            mean_intensity,
        } => format!("clip={clip_limit:.2} grid={cols}x{rows} mean={mean_intensity:.3}"),
        StageMetrics::Classify {
            classifier,
            is_normal,
            confidence,
        } => {
            let verdict = if *is_normal { "normal" } else { "abnormal" };
            format!("{classifier}: {verdict} ({confidence:.2})")
        }
        StageMetrics::DetectFeatures {
            detector,
            finding_count,
        } => format!("{detector}: {finding_count} findings"),
        StageMetrics::Assemble {
            recommendation_count,
            risk_factor_count,
        } => format!("{recommendation_count} recommendations, {risk_factor_count} risk factors"),
    }
}

/// Mean of every channel sample.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn mean_intensity(image: &crate::types::NormalizedImage) -> f64 {
    let samples = image.as_raw();
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| f64::from(s)).sum();
    sum / samples.len() as f64
}
