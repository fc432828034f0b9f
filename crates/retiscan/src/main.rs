//! retiscan: analyze retinal fundus images from the command line.
//!
//! One image runs a single analysis and exits non-zero if it fails.
//! Several images (or `--batch`) run a batch: every image gets a result
//! line, failures do not stop the rest, and a summary closes the output.
//!
//! # Usage
//!
//! ```text
//! retiscan [OPTIONS] <IMAGES>...
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `retiscan=info`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::{Parser, ValueEnum};
use retiscan_pipeline::{
    AnalysisError, Analyzer, AnalyzerConfig, BatchItemResult, BatchSummary, ClinicalReport,
    ImageSource, ResizeFilter, StdClock,
};
use tracing_subscriber::EnvFilter;

/// Default `RUST_LOG` filter.
const DEFAULT_LOG_FILTER: &str = "retiscan=info,retiscan_pipeline=info";

/// Retinal fundus image analysis.
///
/// Loads each image, enhances contrast, classifies it and prints a
/// clinical report with recommendations and risk factors.
#[derive(Parser)]
#[command(name = "retiscan", version)]
struct Cli {
    /// Input images (PNG, JPEG, BMP, TIFF, WebP).
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Treat the input as a batch even when only one image is given.
    #[arg(long)]
    batch: bool,

    /// Analyze batch items on all cores.
    #[arg(long)]
    parallel: bool,

    /// Print JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,

    /// Print per-stage timings (single-image mode).
    #[arg(long)]
    diagnostics: bool,

    /// Side length of the square model input in pixels.
    #[arg(long, default_value_t = AnalyzerConfig::DEFAULT_INPUT_SIZE, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..=u64::from(AnalyzerConfig::MAX_INPUT_SIZE)))]
    input_size: u32,

    /// Resampling filter for the resize to the model input.
    #[arg(long, value_enum, default_value_t = CLI_DEFAULT_FILTER)]
    resize_filter: Filter,

    /// CLAHE clip limit.
    #[arg(long, default_value_t = AnalyzerConfig::DEFAULT_CLIP_LIMIT)]
    clip_limit: f32,

    /// CLAHE tile grid as COLSxROWS.
    #[arg(long, default_value_t = TileGrid::from(AnalyzerConfig::DEFAULT_TILE_GRID))]
    tile_grid: TileGrid,

    /// Largest accepted image file in bytes.
    #[arg(long, default_value_t = AnalyzerConfig::DEFAULT_MAX_INPUT_BYTES)]
    max_input_bytes: usize,

    /// Model version recorded in every report.
    #[arg(long, default_value = retiscan_pipeline::MODEL_VERSION)]
    model_version: String,

    /// Analyzer config as a JSON file.
    ///
    /// When provided, all other analyzer parameter flags are ignored.
    #[arg(long, conflicts_with = "config_json")]
    config: Option<PathBuf>,

    /// Analyzer config as a JSON string.
    ///
    /// When provided, all other analyzer parameter flags are ignored.
    /// Missing fields take their default values.
    #[arg(long)]
    config_json: Option<String>,
}

/// Resize filter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Filter {
    /// Bilinear interpolation.
    Triangle,
    /// Bicubic Catmull-Rom.
    CatmullRom,
    /// Gaussian.
    Gaussian,
    /// Lanczos with 3 lobes.
    Lanczos3,
}

/// Maps a [`ResizeFilter`] to the local CLI [`Filter`] enum.
const fn filter_from_pipeline(f: ResizeFilter) -> Filter {
    match f {
        ResizeFilter::Triangle => Filter::Triangle,
        ResizeFilter::CatmullRom => Filter::CatmullRom,
        ResizeFilter::Gaussian => Filter::Gaussian,
        ResizeFilter::Lanczos3 => Filter::Lanczos3,
    }
}

/// The CLI default filter, derived from
/// [`AnalyzerConfig::DEFAULT_RESIZE_FILTER`] so the two cannot silently
/// diverge.
const CLI_DEFAULT_FILTER: Filter = filter_from_pipeline(AnalyzerConfig::DEFAULT_RESIZE_FILTER);

/// CLAHE grid parsed from `COLSxROWS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TileGrid(u32, u32);

impl From<(u32, u32)> for TileGrid {
    fn from((cols, rows): (u32, u32)) -> Self {
        Self(cols, rows)
    }
}

impl fmt::Display for TileGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.0, self.1)
    }
}

impl FromStr for TileGrid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cols, rows) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected COLSxROWS, got {s:?}"))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|e| format!("invalid tile count {v:?}: {e}"))
        };
        Ok(Self(parse(cols)?, parse(rows)?))
    }
}

/// Build an [`AnalyzerConfig`] from CLI arguments.
///
/// A `--config` file or `--config-json` string replaces the individual
/// flags wholesale.
fn config_from_cli(cli: &Cli) -> Result<AnalyzerConfig, String> {
    if let Some(ref path) = cli.config {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Error reading config {}: {e}", path.display()))?;
        return serde_json::from_str(&text)
            .map_err(|e| format!("Error parsing config {}: {e}", path.display()));
    }
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(AnalyzerConfig {
        input_size: cli.input_size,
        resize_filter: match cli.resize_filter {
            Filter::Triangle => ResizeFilter::Triangle,
            Filter::CatmullRom => ResizeFilter::CatmullRom,
            Filter::Gaussian => ResizeFilter::Gaussian,
            Filter::Lanczos3 => ResizeFilter::Lanczos3,
        },
        clip_limit: cli.clip_limit,
        tile_grid: (cli.tile_grid.0, cli.tile_grid.1),
        max_input_bytes: cli.max_input_bytes,
        model_version: cli.model_version.clone(),
    })
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    let analyzer = match Analyzer::new(config) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let sources: Vec<ImageSource> = cli.images.iter().cloned().map(ImageSource::from).collect();
    tracing::debug!(config = ?analyzer.config(), images = sources.len(), "starting");

    match sources.as_slice() {
        [source] if !cli.batch => run_single(&analyzer, source, &cli),
        _ => run_batch(&analyzer, &sources, &cli),
    }
}

fn run_single(analyzer: &Analyzer, source: &ImageSource, cli: &Cli) -> ExitCode {
    let outcome = if cli.diagnostics {
        analyzer
            .analyze_with_diagnostics(source, &StdClock)
            .map(|(report, diag)| (report, Some(diag)))
    } else {
        analyzer.analyze(source).map(|report| (report, None))
    };

    match outcome {
        Ok((report, diagnostics)) => {
            if cli.json {
                let value = serde_json::json!({
                    "image": source.label(),
                    "report": report,
                    "diagnostics": diagnostics,
                });
                return print_json(&value);
            }
            println!("{}", format_report(&source.label(), &report));
            if let Some(diag) = diagnostics {
                println!();
                println!("{}", diag.report());
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            if cli.json {
                let _ = print_json(&serde_json::json!({ "image": source.label(), "error": err }));
            }
            eprintln!("{}", format_error(&source.label(), &err));
            ExitCode::FAILURE
        }
    }
}

fn run_batch(analyzer: &Analyzer, sources: &[ImageSource], cli: &Cli) -> ExitCode {
    if cli.diagnostics {
        tracing::warn!("--diagnostics only applies to single-image runs; ignoring");
    }

    let results = if cli.parallel {
        analyzer.analyze_batch_parallel(sources)
    } else {
        analyzer.analyze_batch(sources)
    };
    let summary = BatchSummary::from_results(&results);

    if cli.json {
        let code = print_json(&serde_json::json!({ "results": results, "summary": summary }));
        if code != ExitCode::SUCCESS {
            return code;
        }
    } else {
        for item in &results {
            match item {
                BatchItemResult::Success { image, report } => {
                    println!("{}", format_report(image, report));
                }
                BatchItemResult::Failure { image, error } => {
                    println!("{}", format_error(image, error));
                }
            }
            println!();
        }
        println!(
            "Summary: {} images, {} analyzed ({} normal, {} abnormal), {} failed",
            summary.total, summary.succeeded, summary.normal, summary.abnormal, summary.failed,
        );
    }

    if summary.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_json(value: &serde_json::Value) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error serializing output: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Render a report as indented text.
fn format_report(image: &str, report: &ClinicalReport) -> String {
    let mut lines = vec![image.to_string()];

    let verdict = match (report.disease_name(), report.severity()) {
        (Some(disease), Some(severity)) => format!("Abnormal: {disease} ({severity})"),
        (Some(disease), None) => format!("Abnormal: {disease}"),
        _ => "Normal".to_string(),
    };
    lines.push(format!("  Verdict:         {verdict}"));
    lines.push(format!("  Confidence:      {:.2}", report.confidence()));
    if !report.severity_levels().is_empty() {
        lines.push(format!(
            "  Severity scale:  {}",
            report.severity_levels().join(" < ")
        ));
    }
    if !report.detected_features().is_empty() {
        lines.push("  Findings:".to_string());
        lines.extend(report.detected_features().iter().map(|f| format!("    - {f}")));
    }
    lines.push("  Recommendations:".to_string());
    lines.extend(
        report
            .recommendations()
            .iter()
            .enumerate()
            .map(|(i, r)| format!("    {}. {r}", i + 1)),
    );
    if !report.risk_factors().is_empty() {
        lines.push(format!(
            "  Risk factors:    {}",
            report.risk_factors().join(", ")
        ));
    }
    lines.push(format!(
        "  Model:           {} ({})",
        report.model_version(),
        report.analysis_timestamp().to_rfc3339()
    ));

    lines.join("\n")
}

fn format_error(image: &str, err: &AnalysisError) -> String {
    format!("{image}\n  Failed at {} stage: {}", err.stage, err.source)
}
