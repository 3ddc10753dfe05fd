use std::sync::{Arc, Mutex};

use glam::{Quat, Vec3};

use crate::altitude::AltitudeEstimator;
use crate::device::{CameraFeatures, CameraSession, CameraTrackingState, ContextProbe, FrameStatus};
use crate::{lock_or_recover, TrackingError, TrackingResult};

/// One successful camera tracking read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSample {
    pub position: Vec3,
    /// Present only when camera orientation is preferred over the head tracker.
    pub orientation: Option<Quat>,
}

/// Absolute position (and optionally orientation) from the camera tracker.
pub struct PositionSource {
    session: Mutex<Box<dyn CameraSession>>,
    context: Arc<dyn ContextProbe>,
    altitude: Option<Arc<AltitudeEstimator>>,
    prefer_camera_orientation: bool,
}

impl PositionSource {
    /// Configures the session with `features`. A session that rejects its
    /// configuration is returned as an error so the caller can run without it.
    pub fn new(
        mut session: Box<dyn CameraSession>,
        features: &CameraFeatures,
        context: Arc<dyn ContextProbe>,
    ) -> TrackingResult<Self> {
        session.configure(features)?;
        Ok(Self {
            session: Mutex::new(session),
            context,
            altitude: None,
            prefer_camera_orientation: false,
        })
    }

    /// Overrides the vertical position with barometric altitude.
    pub fn with_altitude(mut self, altitude: Arc<AltitudeEstimator>) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_camera_orientation(mut self, prefer: bool) -> Self {
        self.prefer_camera_orientation = prefer;
        self
    }

    pub fn provides_orientation(&self) -> bool {
        self.prefer_camera_orientation
    }

    /// Reads the latest camera pose. `_target_timestamp_ns` is accepted for
    /// symmetry with the head tracker; the camera only reports its latest frame.
    pub fn get_pose(&self, _target_timestamp_ns: u64) -> TrackingResult<CameraSample> {
        if !self.context.context_current() {
            return Err(TrackingError::ContextMissing(
                "camera tracking requires a current graphics context",
            ));
        }

        let mut session = lock_or_recover(&self.session);
        if let FrameStatus::Failed(code) = session.advance_frame() {
            return Err(TrackingError::unavailable(format!(
                "camera session update failed ({code})"
            )));
        }

        let state = session.tracking_state();
        if state != CameraTrackingState::Tracking {
            return Err(TrackingError::unavailable(format!(
                "camera is not tracking ({state:?})"
            )));
        }

        let raw = session.camera_pose();
        let mut position = Vec3::new(raw[4], raw[5], raw[6]);
        if let Some(altitude) = self.altitude.as_ref() {
            position.y = altitude.current_altitude();
        }

        let orientation = self
            .prefer_camera_orientation
            .then(|| Quat::from_xyzw(raw[0], raw[1], raw[2], raw[3]).normalize());

        Ok(CameraSample {
            position,
            orientation,
        })
    }

    pub fn set_display_geometry(&self, rotation: i32, width: u32, height: u32) {
        lock_or_recover(&self.session).set_display_geometry(rotation, width, height);
    }

    pub fn set_camera_texture(&self, texture: u32) {
        lock_or_recover(&self.session).set_camera_texture(texture);
    }

    pub fn resume(&self) {
        lock_or_recover(&self.session).resume();
    }

    pub fn pause(&self) {
        lock_or_recover(&self.session).pause();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::Ordering;

    fn camera_source(script: Vec<CameraStep>) -> (PositionSource, Arc<FlagContext>) {
        let (camera, _, _) = ScriptedCamera::new(script);
        let context = FlagContext::current();
        let source =
            PositionSource::new(Box::new(camera), &CameraFeatures::default(), context.clone())
                .unwrap();
        (source, context)
    }

    #[test]
    fn test_missing_context_is_fatal() {
        let (source, context) = camera_source(vec![CameraStep::Ok([0.0; 7])]);
        context.0.store(false, Ordering::SeqCst);
        let err = source.get_pose(0).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_update_failure_is_recoverable() {
        let (source, _) = camera_source(vec![CameraStep::UpdateFails]);
        let err = source.get_pose(0).unwrap_err();
        assert!(matches!(err, TrackingError::TrackingUnavailable(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_not_tracking_is_recoverable() {
        let (source, _) = camera_source(vec![CameraStep::NotTracking]);
        assert!(matches!(
            source.get_pose(0),
            Err(TrackingError::TrackingUnavailable(_))
        ));
    }

    #[test]
    fn test_position_without_orientation_by_default() {
        let raw = raw_pose(Quat::from_rotation_x(0.2), Vec3::new(1.0, 2.0, 3.0));
        let (source, _) = camera_source(vec![CameraStep::Ok(raw)]);
        let sample = source.get_pose(0).unwrap();
        assert_eq!(sample.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(sample.orientation, None);
    }

    #[test]
    fn test_camera_orientation_when_preferred() {
        let q = Quat::from_rotation_x(0.2);
        let (source, _) = camera_source(vec![CameraStep::Ok(raw_pose(q, Vec3::ZERO))]);
        let source = source.with_camera_orientation(true);
        let sample = source.get_pose(0).unwrap();
        assert!(sample.orientation.unwrap().abs_diff_eq(q, 1e-6));
    }

    #[test]
    fn test_altitude_overrides_height() {
        let altitude = Arc::new(AltitudeEstimator::default());
        altitude.on_pressure_sample(1013.25);
        altitude.on_pressure_sample(1012.0);
        let expected = altitude.current_altitude();

        let raw = raw_pose(Quat::IDENTITY, Vec3::new(1.0, 7.0, 3.0));
        let (source, _) = camera_source(vec![CameraStep::Ok(raw)]);
        let source = source.with_altitude(altitude);
        let sample = source.get_pose(0).unwrap();
        assert_eq!(sample.position, Vec3::new(1.0, expected, 3.0));
    }
}
