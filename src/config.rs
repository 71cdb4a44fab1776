// src/config.rs

use crate::global_variables::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Signal timing options, all in time units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub min_green: f64,
    pub max_green: f64,
    pub green: f64,
    pub yellow: f64,
    pub red: f64,
    pub override_duration: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_green: MIN_GREEN_TIME,
            max_green: MAX_GREEN_TIME,
            green: DEFAULT_GREEN_DURATION,
            yellow: DEFAULT_YELLOW_DURATION,
            red: DEFAULT_RED_DURATION,
            override_duration: DEFAULT_OVERRIDE_DURATION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub locations: Vec<String>,
    pub min_interval: f64,
    pub max_interval: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            locations: DEFAULT_SENSOR_LOCATIONS.iter().map(|s| s.to_string()).collect(),
            min_interval: SENSOR_MIN_INTERVAL,
            max_interval: SENSOR_MAX_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum confidence for an emergency-vehicle detection to count.
    pub emergency_confidence_threshold: f32,
    /// Pacing of the simulated frame analyzer.
    pub frame_interval: f64,
    /// When set, detections are read from this JSON-lines file instead of the simulator.
    pub feed_path: Option<PathBuf>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            emergency_confidence_threshold: EMERGENCY_CONFIDENCE_THRESHOLD,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            feed_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub history_csv: Option<PathBuf>,
    pub plot_png: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            history_csv: Some(PathBuf::from(HISTORY_CSV)),
            plot_png: Some(PathBuf::from(HISTORY_PLOT)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub intersection: String,
    pub time_unit_ms: u64,
    pub emergency_preemption: bool,
    /// Seeds the simulators for reproducible runs.
    pub seed: Option<u64>,
    /// Stop on our own after this many time units instead of waiting for Ctrl-C.
    pub run_for: Option<f64>,
    pub timing: TimingConfig,
    pub sensors: SensorConfig,
    pub detection: DetectionConfig,
    pub report: ReportConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            intersection: DEFAULT_INTERSECTION.to_string(),
            time_unit_ms: DEFAULT_TIME_UNIT_MS,
            emergency_preemption: true,
            seed: None,
            run_for: None,
            timing: TimingConfig::default(),
            sensors: SensorConfig::default(),
            detection: DetectionConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl SystemConfig {
    /// Loads a JSON config file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SystemConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timing;
        let positive = [
            ("timing.min_green", t.min_green),
            ("timing.green", t.green),
            ("timing.yellow", t.yellow),
            ("timing.red", t.red),
            ("timing.override_duration", t.override_duration),
            ("sensors.min_interval", self.sensors.min_interval),
            ("detection.frame_interval", self.detection.frame_interval),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        if !(t.max_green.is_finite() && t.max_green >= t.min_green) {
            return Err(ConfigError::Invalid(format!(
                "timing.max_green ({}) must not be below timing.min_green ({})",
                t.max_green, t.min_green
            )));
        }
        if !(self.sensors.max_interval.is_finite()
            && self.sensors.max_interval >= self.sensors.min_interval)
        {
            return Err(ConfigError::Invalid(format!(
                "sensors.max_interval ({}) must not be below sensors.min_interval ({})",
                self.sensors.max_interval, self.sensors.min_interval
            )));
        }
        if !(0.0..=1.0).contains(&self.detection.emergency_confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "detection.emergency_confidence_threshold must be within [0, 1], got {}",
                self.detection.emergency_confidence_threshold
            )));
        }
        if self.time_unit_ms == 0 {
            return Err(ConfigError::Invalid("time_unit_ms must be at least 1".into()));
        }
        if let Some(run_for) = self.run_for {
            if !(run_for.is_finite() && run_for > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "run_for must be a positive number, got {}",
                    run_for
                )));
            }
        }
        Ok(())
    }

    pub fn time_unit(&self) -> Duration {
        Duration::from_millis(self.time_unit_ms)
    }

    /// Converts a span in time units into wall-clock time.
    pub fn units(&self, units: f64) -> Duration {
        to_duration(self.time_unit(), units)
    }
}

pub fn to_duration(time_unit: Duration, units: f64) -> Duration {
    Duration::from_secs_f64(time_unit.as_secs_f64() * units.max(0.0))
}
