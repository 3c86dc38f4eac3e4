use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::columns::{ATD, DROPOFF_DISTANCE, PICKUP_DISTANCE, TOTAL_DISTANCE_KM};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("winsorize quantiles must satisfy 0 <= low < high <= 1 (got low {low}, high {high})")]
    InvalidQuantiles { low: f64, high: f64 },
    #[error("peak window [{start}, {end}] must satisfy start <= end <= 23")]
    InvalidPeakWindow { start: u32, end: u32 },
}

/// Everything the stages need besides the batch itself. Passed explicitly into
/// each stage; nothing here is read from global state.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Emits `is_high_traffic_suspected` and `speed_below_threshold`.
    pub extended_features: bool,
    pub winsorize: WinsorizeConfig,
    pub peak_hours: PeakHoursConfig,
    pub courier_flow: ComplexityConfig,
    pub weather: WeatherPaths,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extended_features: true,
            winsorize: WinsorizeConfig::default(),
            peak_hours: PeakHoursConfig::default(),
            courier_flow: ComplexityConfig::default(),
            weather: WeatherPaths::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let WinsorizeConfig {
            quantile_low: low,
            quantile_high: high,
            ..
        } = self.winsorize;
        if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low >= high {
            return Err(ConfigError::InvalidQuantiles { low, high });
        }

        for window in &self.peak_hours.windows {
            if window.start > window.end || window.end > 23 {
                return Err(ConfigError::InvalidPeakWindow {
                    start: window.start,
                    end: window.end,
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WinsorizeConfig {
    pub quantile_low: f64,
    pub quantile_high: f64,
    /// Columns clipped when present in the batch; absent ones are skipped.
    pub columns: Vec<String>,
}

impl Default for WinsorizeConfig {
    fn default() -> Self {
        Self {
            quantile_low: 0.01,
            quantile_high: 0.99,
            columns: [ATD, PICKUP_DISTANCE, DROPOFF_DISTANCE, TOTAL_DISTANCE_KM]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Inclusive hour range, written as `[start, end]` in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "(u32, u32)")]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl From<(u32, u32)> for HourWindow {
    fn from((start, end): (u32, u32)) -> Self {
        Self { start, end }
    }
}

impl HourWindow {
    pub fn contains(&self, hour: u32) -> bool {
        (self.start..=self.end).contains(&hour)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PeakHoursConfig {
    pub windows: Vec<HourWindow>,
}

impl Default for PeakHoursConfig {
    fn default() -> Self {
        Self {
            windows: vec![HourWindow::from((12, 14)), HourWindow::from((18, 21))],
        }
    }
}

impl PeakHoursConfig {
    pub fn is_peak(&self, hour: u32) -> bool {
        self.windows.iter().any(|window| window.contains(hour))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ComplexityConfig {
    pub scores: BTreeMap<String, i32>,
    /// Score for labels missing from `scores`, including null labels.
    pub default_score: i32,
}

impl Default for ComplexityConfig {
    fn default() -> Self {
        let scores = [("Motorbike", 1), ("Bicycle", 2), ("Foot", 3)]
            .into_iter()
            .map(|(label, score)| (label.to_string(), score))
            .collect();
        Self {
            scores,
            default_score: 4,
        }
    }
}

impl ComplexityConfig {
    pub fn score(&self, courier_flow: Option<&str>) -> i32 {
        courier_flow
            .and_then(|label| self.scores.get(label))
            .copied()
            .unwrap_or(self.default_score)
    }
}

pub const DEFAULT_RAIN_PATH: &str = "data/weather/rain.csv";
pub const DEFAULT_TEMP_PATH: &str = "data/weather/temp.csv";

/// Monthly weather sources. Both are always loaded; a missing file fails the
/// run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WeatherPaths {
    pub rain_path: PathBuf,
    pub temp_path: PathBuf,
}

impl Default for WeatherPaths {
    fn default() -> Self {
        Self {
            rain_path: PathBuf::from(DEFAULT_RAIN_PATH),
            temp_path: PathBuf::from(DEFAULT_TEMP_PATH),
        }
    }
}
