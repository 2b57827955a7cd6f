//! User settings read from a JSON file.

use crate::calibration::DensityCalibrator;
use crate::enums::{Interpolation, Rotation};
use crate::error::{ConfigurationError, Error};
use crate::resampler::{DisplayTransformParams, ResampleOptions};

use serde::Deserialize;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CalibrationSettings {
    pub hu: Vec<f64>,
    pub red: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// HU → RED table. The built-in table is used when absent or invalid.
    pub calibration: Option<CalibrationSettings>,
    pub interpolation: Interpolation,
    pub fill_value: f64,
    /// Display spacing in mm, applied only with `use_config_voxel_spacing`.
    pub voxel_spacing: Option<[f64; 3]>,
    pub use_config_voxel_spacing: bool,
    pub rotation: Rotation,
    pub flip_lr: bool,
    pub flip_ap: bool,
    pub flip_si: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            calibration: None,
            interpolation: Interpolation::Linear,
            fill_value: -1000.0,
            voxel_spacing: None,
            use_config_voxel_spacing: false,
            rotation: Rotation::None,
            flip_lr: false,
            flip_ap: false,
            flip_si: false,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_json_str(&text)?;
        debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    pub fn from_json_str(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn calibrator(&self) -> DensityCalibrator {
        match &self.calibration {
            Some(table) => DensityCalibrator::from_values(
                Some(table.hu.as_slice()),
                Some(table.red.as_slice()),
            ),
            None => DensityCalibrator::from_values(None, None),
        }
    }

    pub fn resample_options(&self) -> ResampleOptions {
        ResampleOptions {
            interpolation: self.interpolation,
            fill_value: self.fill_value,
        }
    }

    pub fn display_params(&self) -> Result<DisplayTransformParams, ConfigurationError> {
        let spacing = if self.use_config_voxel_spacing {
            self.voxel_spacing
        } else {
            None
        };
        let params = DisplayTransformParams {
            spacing,
            rotation: self.rotation,
            flip_lr: self.flip_lr,
            flip_ap: self.flip_ap,
            flip_si: self.flip_si,
        };
        params.validate()?;
        Ok(params)
    }
}
