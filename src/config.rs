//! Capture settings applied to a camera in one go.

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::traits::{BitDepth, FliError, FrameType, Result};
use crate::validation::{validate_binning, validate_flushes, validate_temperature};

/// Imaging parameters for a capture.
///
/// Missing fields take their [`Default`] values when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Horizontal binning factor.
    pub hbin: i64,
    /// Vertical binning factor.
    pub vbin: i64,
    /// Exposure time in milliseconds.
    pub exposure_ms: u64,
    /// Shutter behaviour.
    pub frame_type: FrameType,
    /// Readout depth.
    pub bit_depth: BitDepth,
    /// Pre-exposure flush count.
    pub flushes: i64,
    /// Cooler setpoint in degrees Celsius, left untouched when absent.
    pub temperature: Option<f64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            hbin: 1,
            vbin: 1,
            exposure_ms: 100,
            frame_type: FrameType::Normal,
            bit_depth: BitDepth::Sixteen,
            flushes: 0,
            temperature: None,
        }
    }
}

impl CaptureConfig {
    /// Reads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the file cannot be read, does not parse,
    /// or holds out-of-range values.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("loading capture configuration from {}", path.display());
        let text = fs::read_to_string(path).map_err(|err| {
            FliError::Configuration(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_json(&text)
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` on malformed JSON or out-of-range values.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|err| FliError::Configuration(format!("malformed configuration: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field without touching hardware.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for the first out-of-range field.
    pub fn validate(&self) -> Result<()> {
        validate_binning(self.hbin, self.vbin)?;
        validate_flushes(self.flushes)?;
        if let Some(celsius) = self.temperature {
            validate_temperature(celsius)?;
        }
        Ok(())
    }

    /// Exposure time as a duration.
    #[must_use]
    pub const fn exposure(&self) -> Duration {
        Duration::from_millis(self.exposure_ms)
    }

    /// Set both binning factors.
    #[must_use]
    pub const fn with_binning(mut self, hbin: i64, vbin: i64) -> Self {
        self.hbin = hbin;
        self.vbin = vbin;
        self
    }

    /// Set the exposure time.
    #[must_use]
    pub const fn with_exposure_ms(mut self, exposure_ms: u64) -> Self {
        self.exposure_ms = exposure_ms;
        self
    }

    /// Set the frame type.
    #[must_use]
    pub const fn with_frame_type(mut self, frame_type: FrameType) -> Self {
        self.frame_type = frame_type;
        self
    }

    /// Set the bit depth.
    #[must_use]
    pub const fn with_bit_depth(mut self, bit_depth: BitDepth) -> Self {
        self.bit_depth = bit_depth;
        self
    }

    /// Set the flush count.
    #[must_use]
    pub const fn with_flushes(mut self, flushes: i64) -> Self {
        self.flushes = flushes;
        self
    }

    /// Set a cooler setpoint.
    #[must_use]
    pub const fn with_temperature(mut self, celsius: f64) -> Self {
        self.temperature = Some(celsius);
        self
    }
}
