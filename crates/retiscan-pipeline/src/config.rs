//! Analyzer configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Model version declared by the bundled pipeline.
pub const MODEL_VERSION: &str = "v2.1";

/// Resampling filter used to bring images to the model input resolution.
///
/// Every variant is deterministic; nearest-neighbor is deliberately not
/// offered because the model input must be at least bilinear quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizeFilter {
    /// Bilinear interpolation.
    #[default]
    Triangle,
    /// Bicubic (Catmull-Rom).
    CatmullRom,
    /// Gaussian.
    Gaussian,
    /// Lanczos with 3 lobes.
    Lanczos3,
}

impl ResizeFilter {
    /// Convert to the `image` crate's `FilterType`.
    #[must_use]
    pub const fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            Self::Triangle => image::imageops::FilterType::Triangle,
            Self::CatmullRom => image::imageops::FilterType::CatmullRom,
            Self::Gaussian => image::imageops::FilterType::Gaussian,
            Self::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

impl fmt::Display for ResizeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Triangle => f.write_str("Triangle"),
            Self::CatmullRom => f.write_str("CatmullRom"),
            Self::Gaussian => f.write_str("Gaussian"),
            Self::Lanczos3 => f.write_str("Lanczos3"),
        }
    }
}

/// Configuration for the analysis pipeline.
///
/// Deserialization fills missing fields from [`Default`], so a JSON config
/// only needs to name the values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Side length of the square model input, in pixels.
    pub input_size: u32,

    /// Resampling filter for the resize to `input_size`.
    pub resize_filter: ResizeFilter,

    /// CLAHE clip limit. Higher values allow more local contrast.
    pub clip_limit: f32,

    /// CLAHE tile grid as `(columns, rows)`.
    ///
    /// Exactly this many tiles are used. When `input_size` is not a multiple
    /// of a grid dimension, the leftover pixels are spread one each over the
    /// leading tiles.
    pub tile_grid: (u32, u32),

    /// Largest accepted encoded input, in bytes.
    pub max_input_bytes: usize,

    /// Version string surfaced verbatim in every report.
    pub model_version: String,
}

impl AnalyzerConfig {
    /// Default model input resolution.
    pub const DEFAULT_INPUT_SIZE: u32 = 512;
    /// Default resampling filter (bilinear).
    pub const DEFAULT_RESIZE_FILTER: ResizeFilter = ResizeFilter::Triangle;
    /// Default CLAHE clip limit.
    pub const DEFAULT_CLIP_LIMIT: f32 = 2.0;
    /// Default CLAHE tile grid.
    pub const DEFAULT_TILE_GRID: (u32, u32) = (8, 8);
    /// Default input size limit (10 MiB).
    pub const DEFAULT_MAX_INPUT_BYTES: usize = 10 * 1024 * 1024;
    /// Largest accepted `input_size`.
    pub const MAX_INPUT_SIZE: u32 = 4096;

    /// Check every field against its valid range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=Self::MAX_INPUT_SIZE).contains(&self.input_size) {
            return Err(ConfigError(format!(
                "input_size must be between 1 and {}, got {}",
                Self::MAX_INPUT_SIZE,
                self.input_size
            )));
        }
        if !(self.clip_limit.is_finite() && self.clip_limit > 0.0) {
            return Err(ConfigError(format!(
                "clip_limit must be a positive number, got {}",
                self.clip_limit
            )));
        }
        let (cols, rows) = self.tile_grid;
        if cols == 0 || rows == 0 {
            return Err(ConfigError(format!(
                "tile_grid must be at least 1x1, got {cols}x{rows}"
            )));
        }
        if cols > self.input_size || rows > self.input_size {
            return Err(ConfigError(format!(
                "tile_grid {cols}x{rows} exceeds input_size {}",
                self.input_size
            )));
        }
        if self.max_input_bytes == 0 {
            return Err(ConfigError("max_input_bytes must be at least 1".to_string()));
        }
        if self.model_version.trim().is_empty() {
            return Err(ConfigError("model_version must not be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            input_size: Self::DEFAULT_INPUT_SIZE,
            resize_filter: Self::DEFAULT_RESIZE_FILTER,
            clip_limit: Self::DEFAULT_CLIP_LIMIT,
            tile_grid: Self::DEFAULT_TILE_GRID,
            max_input_bytes: Self::DEFAULT_MAX_INPUT_BYTES,
            model_version: MODEL_VERSION.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_model_contract() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.input_size, 512);
        assert_eq!(config.resize_filter, ResizeFilter::Triangle);
        assert!((config.clip_limit - 2.0).abs() < f32::EPSILON);
        assert_eq!(config.tile_grid, (8, 8));
        assert_eq!(config.model_version, "v2.1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_input_size_is_invalid() {
        let config = AnalyzerConfig {
            input_size: 0,
            ..AnalyzerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_input_size_is_invalid() {
        for input_size in [AnalyzerConfig::MAX_INPUT_SIZE + 1, u32::MAX] {
            let config = AnalyzerConfig {
                input_size,
                ..AnalyzerConfig::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("input_size"), "{err}");
        }

        let config = AnalyzerConfig {
            input_size: AnalyzerConfig::MAX_INPUT_SIZE,
            ..AnalyzerConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn non_positive_clip_limit_is_invalid() {
        for clip_limit in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let config = AnalyzerConfig {
                clip_limit,
                ..AnalyzerConfig::default()
            };
            assert!(config.validate().is_err(), "clip_limit {clip_limit} accepted");
        }
    }

    #[test]
    fn degenerate_tile_grid_is_invalid() {
        let config = AnalyzerConfig {
            tile_grid: (0, 8),
            ..AnalyzerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AnalyzerConfig {
            input_size: 4,
            tile_grid: (8, 8),
            ..AnalyzerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn blank_model_version_is_invalid() {
        let config = AnalyzerConfig {
            model_version: " ".to_string(),
            ..AnalyzerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("model_version"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: AnalyzerConfig =
            serde_json::from_str(r#"{"clip_limit": 3.0, "resize_filter": "Lanczos3"}"#).unwrap();
        assert!((config.clip_limit - 3.0).abs() < f32::EPSILON);
        assert_eq!(config.resize_filter, ResizeFilter::Lanczos3);
        assert_eq!(config.input_size, 512);
        assert_eq!(config.tile_grid, (8, 8));
    }

    #[test]
    fn config_serde_round_trip() {
        let config = AnalyzerConfig {
            input_size: 256,
            resize_filter: ResizeFilter::CatmullRom,
            clip_limit: 1.5,
            tile_grid: (4, 6),
            max_input_bytes: 1024,
            model_version: "test-model".to_string(),
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: AnalyzerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
