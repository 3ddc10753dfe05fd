//! Pose fusion.
//!
//! Combines the head tracker, the optional camera tracker and the barometer
//! into one head pose per timestamp. Precedence:
//!
//! | camera | camera orientation | result                                    |
//! |--------|--------------------|-------------------------------------------|
//! | off    | -                  | head orientation + last known position    |
//! | on     | no                 | head orientation + camera position        |
//! | on     | yes                | camera orientation + camera position      |
//!
//! Any recoverable failure along the selected row falls back to the last
//! known good pose as a whole. Orientation and position are never mixed
//! across fresh and stale reads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{error, warn};

use crate::orientation::OrientationSource;
use crate::position::PositionSource;
use crate::types::Pose;
use crate::{lock_or_recover, TrackingError, TrackingResult};

/// Last known good head pose.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackingState {
    pub pose: Pose,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FusionConfig {
    /// Take orientation from the camera tracker instead of the head tracker.
    pub use_camera_orientation: bool,
}

#[derive(Debug, Default)]
pub struct FusionStats {
    pub fresh: AtomicU64,
    pub fallbacks: AtomicU64,
}

/// Result of one pass over the decision table.
#[derive(Debug, Clone, PartialEq)]
pub enum PoseOutcome {
    Fresh(Pose),
    /// Some source failed; the last known pose should be used.
    Fallback(TrackingError),
}

pub struct PoseFusionEngine {
    orientation: OrientationSource,
    position: Option<PositionSource>,
    config: FusionConfig,
    cache: Mutex<TrackingState>,
    stats: FusionStats,
}

impl PoseFusionEngine {
    pub fn new(orientation: OrientationSource, config: FusionConfig) -> Self {
        Self {
            orientation,
            position: None,
            config,
            cache: Mutex::new(TrackingState::default()),
            stats: FusionStats::default(),
        }
    }

    pub fn with_position(mut self, position: PositionSource) -> Self {
        self.position = Some(position.with_camera_orientation(self.config.use_camera_orientation));
        self
    }

    pub fn camera_enabled(&self) -> bool {
        self.position.is_some()
    }

    pub fn position_source(&self) -> Option<&PositionSource> {
        self.position.as_ref()
    }

    pub fn orientation_source(&self) -> &OrientationSource {
        &self.orientation
    }

    /// Fused pose for `target_timestamp_ns`. Never fails.
    pub fn get_pose(&self, target_timestamp_ns: u64) -> Pose {
        match self.try_get_pose(target_timestamp_ns) {
            Ok(pose) => pose,
            Err(err) => {
                error!("pose fusion: {err}, using last known pose");
                self.last_known()
            }
        }
    }

    /// Fused pose, or `ContextMissing` when the calling thread has no graphics
    /// context for the camera tracker. Recoverable tracking loss is absorbed.
    pub fn try_get_pose(&self, target_timestamp_ns: u64) -> TrackingResult<Pose> {
        match self.resolve(target_timestamp_ns) {
            PoseOutcome::Fresh(pose) => {
                lock_or_recover(&self.cache).pose = pose;
                self.stats.fresh.fetch_add(1, Ordering::Relaxed);
                Ok(pose)
            }
            PoseOutcome::Fallback(err) if err.is_fatal() => {
                self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
            PoseOutcome::Fallback(err) => {
                warn!("pose fusion: {err}, using last known pose");
                self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
                Ok(self.last_known())
            }
        }
    }

    /// Walks the decision table without touching the cache.
    pub fn resolve(&self, target_timestamp_ns: u64) -> PoseOutcome {
        let cached = self.last_known();

        let camera_orientation = self.position.is_some() && self.config.use_camera_orientation;
        let head_orientation = if camera_orientation {
            None
        } else {
            match self.orientation.get_orientation(target_timestamp_ns) {
                Ok(q) => Some(q),
                Err(err) => return PoseOutcome::Fallback(err),
            }
        };

        let Some(position_source) = self.position.as_ref() else {
            // Without a camera the device stays where it was last tracked.
            return match head_orientation {
                Some(orientation) => PoseOutcome::Fresh(Pose {
                    orientation,
                    position: cached.position,
                }),
                None => PoseOutcome::Fallback(TrackingError::unavailable("no orientation source")),
            };
        };

        let sample = match position_source.get_pose(target_timestamp_ns) {
            Ok(sample) => sample,
            Err(err) => return PoseOutcome::Fallback(err),
        };

        let orientation = match (head_orientation, sample.orientation) {
            (Some(q), _) => q,
            (None, Some(q)) => q,
            (None, None) => {
                return PoseOutcome::Fallback(TrackingError::unavailable(
                    "camera returned no orientation",
                ))
            }
        };

        PoseOutcome::Fresh(Pose {
            orientation,
            position: sample.position,
        })
    }

    pub fn last_known(&self) -> Pose {
        lock_or_recover(&self.cache).pose
    }

    pub fn stats(&self) -> &FusionStats {
        &self.stats
    }

    pub fn resume(&self) {
        self.orientation.resume();
        if let Some(position) = self.position.as_ref() {
            position.resume();
        }
    }

    pub fn pause(&self) {
        self.orientation.pause();
        if let Some(position) = self.position.as_ref() {
            position.pause();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CameraFeatures;
    use crate::position::testing::*;
    use glam::{Quat, Vec3};
    use std::sync::Arc;

    fn head_only(script: Vec<Option<Quat>>) -> PoseFusionEngine {
        let (tracker, _) = ScriptedTracker::new(script);
        PoseFusionEngine::new(
            OrientationSource::new(Box::new(tracker)),
            FusionConfig::default(),
        )
    }

    fn with_camera(
        head: Vec<Option<Quat>>,
        camera: Vec<CameraStep>,
        use_camera_orientation: bool,
    ) -> (PoseFusionEngine, Arc<std::sync::atomic::AtomicUsize>, Arc<FlagContext>) {
        let (tracker, head_calls) = ScriptedTracker::new(head);
        let (camera, _, _) = ScriptedCamera::new(camera);
        let context = FlagContext::current();
        let position =
            PositionSource::new(Box::new(camera), &CameraFeatures::default(), context.clone())
                .unwrap();
        let engine = PoseFusionEngine::new(
            OrientationSource::new(Box::new(tracker)),
            FusionConfig {
                use_camera_orientation,
            },
        )
        .with_position(position);
        (engine, head_calls, context)
    }

    #[test]
    fn test_head_only_keeps_last_position() {
        let q = Quat::from_rotation_y(0.5);
        let engine = head_only(vec![Some(q)]);
        let pose = engine.get_pose(1);
        assert!(pose.orientation.abs_diff_eq(q.inverse(), 1e-6));
        assert_eq!(pose.position, Vec3::ZERO);
    }

    #[test]
    fn test_head_failure_returns_cached_pose() {
        let q = Quat::from_rotation_y(0.5);
        let engine = head_only(vec![Some(q), None, None]);
        let first = engine.get_pose(1);
        assert_eq!(engine.get_pose(2), first);
        assert_eq!(engine.get_pose(3), first);
        assert_eq!(engine.stats().fallbacks.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_camera_position_with_head_orientation() {
        let head = Quat::from_rotation_z(0.3);
        let raw = raw_pose(Quat::from_rotation_x(1.0), Vec3::new(0.5, 1.0, -0.5));
        let (engine, head_calls, _) =
            with_camera(vec![Some(head)], vec![CameraStep::Ok(raw)], false);
        let pose = engine.get_pose(1);
        assert!(pose.orientation.abs_diff_eq(head.inverse(), 1e-6));
        assert_eq!(pose.position, Vec3::new(0.5, 1.0, -0.5));
        assert_eq!(head_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_camera_orientation_skips_head_tracker() {
        let cam_q = Quat::from_rotation_x(1.0);
        let raw = raw_pose(cam_q, Vec3::new(0.5, 1.0, -0.5));
        let (engine, head_calls, _) =
            with_camera(vec![Some(Quat::IDENTITY)], vec![CameraStep::Ok(raw)], true);
        let pose = engine.get_pose(1);
        assert!(pose.orientation.abs_diff_eq(cam_q, 1e-6));
        assert_eq!(head_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_camera_failures_return_last_success_exactly() {
        let raw = raw_pose(Quat::IDENTITY, Vec3::new(0.25, 1.75, 2.0));
        let head: Vec<Option<Quat>> = (0..6)
            .map(|i| Some(Quat::from_rotation_y(0.1 * i as f32)))
            .collect();
        let (engine, _, _) = with_camera(
            head,
            vec![
                CameraStep::Ok(raw),
                CameraStep::UpdateFails,
                CameraStep::NotTracking,
                CameraStep::UpdateFails,
                CameraStep::NotTracking,
            ],
            false,
        );

        let good = engine.get_pose(1);
        for ts in 2..6 {
            // Fresh head orientation is discarded along with the stale position.
            assert_eq!(engine.get_pose(ts), good);
        }
    }

    #[test]
    fn test_missing_context_surfaces_from_try_get_pose() {
        let (engine, _, context) = with_camera(
            vec![Some(Quat::IDENTITY)],
            vec![CameraStep::Ok([0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0])],
            false,
        );
        let good = engine.get_pose(1);
        context.0.store(false, Ordering::SeqCst);

        assert!(matches!(
            engine.try_get_pose(2),
            Err(TrackingError::ContextMissing(_))
        ));
        assert_eq!(engine.get_pose(3), good);
    }

    #[test]
    fn test_resolve_does_not_mutate_cache() {
        let engine = head_only(vec![Some(Quat::from_rotation_y(0.9))]);
        assert!(matches!(engine.resolve(1), PoseOutcome::Fresh(_)));
        assert_eq!(engine.last_known(), Pose::IDENTITY);
    }

    #[test]
    fn test_concurrent_callers_see_coherent_poses() {
        let engine = Arc::new(head_only(vec![Some(Quat::from_rotation_y(0.2))]));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    for ts in 0..500 {
                        let pose = engine.get_pose(ts);
                        assert!(pose.orientation.is_normalized());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(engine.stats().fresh.load(Ordering::Relaxed), 2000);
    }
}
