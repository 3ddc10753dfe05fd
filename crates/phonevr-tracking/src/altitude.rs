//! Barometer based altitude tracking.
//!
//! The first pressure sample after the sensor is enabled is taken as the
//! floor. Later samples are reported relative to it.

use std::sync::Mutex;

use tracing::{debug, info};

use crate::lock_or_recover;

pub const SEA_LEVEL_PRESSURE_HPA: f32 = 1013.25;

/// International barometric formula, in meters.
pub fn pressure_to_altitude(p0: f32, p: f32) -> f32 {
    let coef = 1.0f32 / 5.255f32;
    44330.0f32 * (1.0f32 - (p / p0).powf(coef))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AltitudeCalibration {
    pub calibrated: bool,
    pub floor_altitude: f32,
    pub current_pressure: f32,
    pub min_pressure: Option<f32>,
    pub max_pressure: Option<f32>,
}

#[derive(Debug)]
pub struct AltitudeEstimator {
    sea_level_hpa: f32,
    state: Mutex<AltitudeCalibration>,
}

impl Default for AltitudeEstimator {
    fn default() -> Self {
        Self::new(SEA_LEVEL_PRESSURE_HPA)
    }
}

impl AltitudeEstimator {
    pub fn new(sea_level_hpa: f32) -> Self {
        Self {
            sea_level_hpa,
            state: Mutex::new(AltitudeCalibration::default()),
        }
    }

    /// Forgets the floor calibration. Call when the sensor is (re)enabled.
    pub fn reset(&self) {
        *lock_or_recover(&self.state) = AltitudeCalibration::default();
    }

    pub fn on_pressure_sample(&self, pressure: f32) {
        if !(pressure.is_finite() && pressure > 0.0) {
            debug!("ignoring invalid pressure sample {pressure}");
            return;
        }

        let mut state = lock_or_recover(&self.state);
        if !state.calibrated {
            state.floor_altitude = pressure_to_altitude(self.sea_level_hpa, pressure);
            state.calibrated = true;
            info!("floor altitude set to {:.3} m", state.floor_altitude);
        }
        state.current_pressure = pressure;
        state.min_pressure = Some(state.min_pressure.map_or(pressure, |p| p.min(pressure)));
        state.max_pressure = Some(state.max_pressure.map_or(pressure, |p| p.max(pressure)));
    }

    /// Altitude above the calibrated floor. Zero until the first sample arrives.
    pub fn current_altitude(&self) -> f32 {
        let state = lock_or_recover(&self.state);
        if !state.calibrated {
            return 0.0;
        }
        pressure_to_altitude(self.sea_level_hpa, state.current_pressure) - state.floor_altitude
    }

    pub fn is_calibrated(&self) -> bool {
        lock_or_recover(&self.state).calibrated
    }

    pub fn calibration(&self) -> AltitudeCalibration {
        *lock_or_recover(&self.state)
    }
}
