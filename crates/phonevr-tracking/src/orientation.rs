use std::sync::Mutex;

use glam::Quat;

use crate::device::HeadTracker;
use crate::{lock_or_recover, TrackingResult};

/// Absolute head orientation from the phone's head tracker.
pub struct OrientationSource {
    tracker: Mutex<Box<dyn HeadTracker>>,
}

impl OrientationSource {
    pub fn new(tracker: Box<dyn HeadTracker>) -> Self {
        Self {
            tracker: Mutex::new(tracker),
        }
    }

    /// Orientation predicted for `target_timestamp_ns`, converted to the pose
    /// frame convention.
    pub fn get_orientation(&self, target_timestamp_ns: u64) -> TrackingResult<Quat> {
        let (_, raw) = lock_or_recover(&self.tracker).predict_pose(target_timestamp_ns)?;
        Ok(invert_unit_quat(raw.normalize()))
    }

    pub fn resume(&self) {
        lock_or_recover(&self.tracker).resume();
    }

    pub fn pause(&self) {
        lock_or_recover(&self.tracker).pause();
    }
}

/// Inverse of a unit quaternion (its conjugate).
pub fn invert_unit_quat(q: Quat) -> Quat {
    Quat::from_xyzw(-q.x, -q.y, -q.z, q.w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackingError;
    use glam::Vec3;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct FixedTracker {
        orientation: Quat,
        fail: bool,
        last_request: Arc<AtomicU64>,
    }

    impl HeadTracker for FixedTracker {
        fn predict_pose(&mut self, timestamp_ns: u64) -> TrackingResult<(Vec3, Quat)> {
            self.last_request.store(timestamp_ns, Ordering::SeqCst);
            if self.fail {
                return Err(TrackingError::unavailable("tracker offline"));
            }
            Ok((Vec3::ZERO, self.orientation))
        }

        fn resume(&mut self) {}

        fn pause(&mut self) {}
    }

    fn source(orientation: Quat, fail: bool) -> (OrientationSource, Arc<AtomicU64>) {
        let last_request = Arc::new(AtomicU64::new(0));
        let tracker = FixedTracker {
            orientation,
            fail,
            last_request: last_request.clone(),
        };
        (OrientationSource::new(Box::new(tracker)), last_request)
    }

    #[test]
    fn test_orientation_is_inverted() {
        let raw = Quat::from_rotation_y(0.4);
        let (source, _) = source(raw, false);
        let q = source.get_orientation(10).unwrap();
        assert!(q.abs_diff_eq(raw.inverse(), 1e-6));
    }

    #[test]
    fn test_inversion_round_trip() {
        for angle in [0.0f32, 0.3, 1.2, -2.5, 3.1] {
            let q = Quat::from_euler(glam::EulerRot::YXZ, angle, angle * 0.5, -angle * 0.25);
            let back = invert_unit_quat(invert_unit_quat(q));
            assert!(back.abs_diff_eq(q, 1e-6));
        }
    }

    #[test]
    fn test_requests_target_timestamp() {
        let (source, last_request) = source(Quat::IDENTITY, false);
        source.get_orientation(123_456_789).unwrap();
        assert_eq!(last_request.load(Ordering::SeqCst), 123_456_789);
    }

    #[test]
    fn test_tracker_failure_propagates() {
        let (source, _) = source(Quat::IDENTITY, true);
        assert!(matches!(
            source.get_orientation(1),
            Err(TrackingError::TrackingUnavailable(_))
        ));
    }

    #[test]
    fn test_result_is_normalized() {
        let (source, _) = source(Quat::from_xyzw(0.0, 0.0, 0.0, 3.0), false);
        assert!(source.get_orientation(1).unwrap().is_normalized());
    }
}
