#![forbid(unsafe_code)]

pub mod altitude;
pub mod clock;
pub mod device;
pub mod dispatcher;
pub mod fusion;
pub mod orientation;
pub mod position;
pub mod types;
pub mod view;

pub use altitude::{pressure_to_altitude, AltitudeCalibration, AltitudeEstimator};
pub use clock::{Clock, MonotonicClock};
pub use device::{
    CameraFeatures, CameraSession, CameraTrackingState, ContextGuard, ContextProbe, FrameStatus,
    HeadTracker, OffscreenContextFactory, PlaneFinding, TrackingSink,
};
pub use dispatcher::{
    dispatch_interval, DispatchError, DispatchInputs, DispatcherConfig, TrackingDispatcher,
};
pub use fusion::{FusionConfig, FusionStats, PoseFusionEngine, PoseOutcome, TrackingState};
pub use orientation::OrientationSource;
pub use position::{CameraSample, PositionSource};
pub use types::{head_id, path_string_to_id, DeviceMotion, Eye, Fov, Pose, ViewParams, HEAD_PATH};
pub use view::{compute_view_params, offset_pos_with_quat, EyeGeometry, SharedEyeGeometry};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackingError {
    /// A source could not produce a pose this tick. Callers use the last known pose.
    #[error("tracking unavailable: {0}")]
    TrackingUnavailable(String),
    /// No graphics context is current on the calling thread. This is a host
    /// integration bug, not a runtime tracking condition.
    #[error("no graphics context current: {0}")]
    ContextMissing(&'static str),
}

impl TrackingError {
    pub fn unavailable(msg: impl std::fmt::Display) -> Self {
        Self::TrackingUnavailable(msg.to_string())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ContextMissing(_))
    }
}

pub type TrackingResult<T> = Result<T, TrackingError>;

/// Locks a mutex, recovering the data if another thread panicked while holding it.
pub(crate) fn lock_or_recover<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
