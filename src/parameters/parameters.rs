use std::{fs, path::Path, time::Duration};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    calibration::{CalibrationError, SwingDurations, duration_from_secs},
    core::time::sec_f64_to_delta,
    utils::capacity::Capacity,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Error deserializing parameters")]
    Deserialize(#[from] toml::de::Error),

    #[error("Error reading parameter file")]
    Io(#[from] std::io::Error),

    #[error("Invalid value for parameter '{path}': {reason}")]
    InvalidValue { path: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BellframeParams {
    pub calibration: CalibrationParams,
    pub pipeline: PipelineParams,
    pub serial: SerialParams,
}

/// Window lengths, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrationParams {
    pub baseline_s: f64,
    pub swing_s: f64,
    pub offset_s: f64,
    pub null_s: f64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            baseline_s: 0.5,
            swing_s: 10.0,
            offset_s: 0.5,
            null_s: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineParams {
    pub rate_window_s: f64,
    /// Maximum queued output messages, 0 for unbounded
    pub sink_capacity: usize,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            rate_window_s: 2.0,
            sink_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialParams {
    pub port: Option<String>,
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115200,
            timeout_ms: 1000,
        }
    }
}

impl BellframeParams {
    pub fn from_toml(toml: &str) -> Result<Self, Error> {
        let params: BellframeParams = toml::from_str(toml)?;
        params.validate()?;

        Ok(params)
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        Self::from_toml(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let c = &self.calibration;

        for (name, secs) in [
            ("calibration.baseline_s", c.baseline_s),
            ("calibration.swing_s", c.swing_s),
            ("calibration.offset_s", c.offset_s),
            ("calibration.null_s", c.null_s),
        ] {
            duration_from_secs(secs).map_err(|e| invalid(name, e))?;
        }

        let window = self.pipeline.rate_window_s;
        if !window.is_finite() || window <= 0.0 {
            return Err(Error::InvalidValue {
                path: "pipeline.rate_window_s".to_string(),
                reason: format!("window must be positive, got {window}"),
            });
        }

        if self.serial.baud_rate == 0 {
            return Err(Error::InvalidValue {
                path: "serial.baud_rate".to_string(),
                reason: "baud rate cannot be 0".to_string(),
            });
        }

        Ok(())
    }
}

impl CalibrationParams {
    pub fn swing_durations(&self) -> Result<SwingDurations, CalibrationError> {
        SwingDurations::from_secs(self.swing_s, self.baseline_s, self.offset_s)
    }

    pub fn null(&self) -> Result<Duration, CalibrationError> {
        duration_from_secs(self.null_s)
    }
}

impl PipelineParams {
    pub fn rate_window(&self) -> TimeDelta {
        sec_f64_to_delta(self.rate_window_s)
    }

    pub fn sink_capacity(&self) -> Capacity {
        self.sink_capacity.into()
    }
}

impl SerialParams {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn invalid(path: &str, e: impl ToString) -> Error {
    Error::InvalidValue {
        path: path.to_string(),
        reason: e.to_string(),
    }
}
