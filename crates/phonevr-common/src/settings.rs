use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::helpers::{env_bool, env_f32};
use crate::{Error, Result};

pub const ENV_CAMERA_TRACKING: &str = "PHONEVR_CAMERA_TRACKING";
pub const ENV_CAMERA_ORIENTATION: &str = "PHONEVR_CAMERA_ORIENTATION";
pub const ENV_BAROMETER: &str = "PHONEVR_BAROMETER";
pub const ENV_REFRESH_RATE: &str = "PHONEVR_REFRESH_RATE";

/// Client-side tuning for tracking and session behaviour.
///
/// Every field has a default, so a settings file only needs to name the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Nominal display refresh rate. Tracking is dispatched at three times this.
    pub refresh_rate_hz: f32,
    /// Enable the camera (6-DoF) tracker.
    pub camera_tracking: bool,
    /// Use the camera tracker's orientation instead of the head tracker's.
    /// More accurate, but lags by roughly half a second.
    pub use_camera_orientation: bool,
    /// Replace the camera tracker's height with barometric altitude.
    pub barometer_altitude: bool,
    pub sea_level_pressure_hpa: f32,
    /// Height of the eyes above the floor, added back to every eye pose.
    pub floor_height_m: f32,
    /// Prediction horizon used for lobby rendering.
    pub vsync_queue_interval_ms: u64,
    pub barometer_sample_rate_hz: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            refresh_rate_hz: 60.0,
            camera_tracking: false,
            use_camera_orientation: false,
            barometer_altitude: true,
            sea_level_pressure_hpa: 1013.25,
            floor_height_m: 1.5,
            vsync_queue_interval_ms: 50,
            barometer_sample_rate_hz: 10,
        }
    }
}

impl ClientSettings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        debug!("loading client settings from {}", path.display());
        Self::from_json_str(&raw)
    }

    /// Applies `PHONEVR_*` environment overrides on top of the current values.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        self.camera_tracking = env_bool(ENV_CAMERA_TRACKING, self.camera_tracking);
        self.use_camera_orientation = env_bool(ENV_CAMERA_ORIENTATION, self.use_camera_orientation);
        self.barometer_altitude = env_bool(ENV_BAROMETER, self.barometer_altitude);
        if let Some(rate) = env_f32(ENV_REFRESH_RATE) {
            self.refresh_rate_hz = rate;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.refresh_rate_hz.is_finite() && self.refresh_rate_hz > 0.0) {
            return Err(Error::config(format!(
                "refresh_rate_hz must be positive, got {}",
                self.refresh_rate_hz
            )));
        }
        if !(self.sea_level_pressure_hpa.is_finite() && self.sea_level_pressure_hpa > 0.0) {
            return Err(Error::config(format!(
                "sea_level_pressure_hpa must be positive, got {}",
                self.sea_level_pressure_hpa
            )));
        }
        if self.barometer_sample_rate_hz == 0 {
            return Err(Error::config("barometer_sample_rate_hz must be non-zero"));
        }
        Ok(())
    }

    /// Camera orientation is only meaningful when camera tracking is on.
    pub fn camera_orientation_active(&self) -> bool {
        self.camera_tracking && self.use_camera_orientation
    }
}
