//! Contracts for the sensor, graphics-context and transport collaborators the
//! tracking core consumes.

use glam::{Quat, Vec3};

use crate::types::{DeviceMotion, ViewParams};
use crate::TrackingResult;

/// Orientation-only head tracker (phone IMU).
pub trait HeadTracker: Send {
    /// Predicted head pose at `timestamp_ns`. Returned orientation uses the
    /// tracker's own (inverse) rotation convention.
    fn predict_pose(&mut self, timestamp_ns: u64) -> TrackingResult<(Vec3, Quat)>;
    fn resume(&mut self);
    fn pause(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Success,
    /// Any non-success code returned by the session update.
    Failed(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraTrackingState {
    Tracking,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneFinding {
    Disabled,
    HorizontalAndVertical,
}

/// Feature switches applied to the camera session when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraFeatures {
    pub depth: bool,
    pub light_estimation: bool,
    pub plane_finding: PlaneFinding,
    /// Return the latest camera image immediately instead of blocking on a new one.
    pub latest_camera_image: bool,
}

impl Default for CameraFeatures {
    fn default() -> Self {
        Self {
            depth: false,
            light_estimation: false,
            plane_finding: PlaneFinding::HorizontalAndVertical,
            latest_camera_image: true,
        }
    }
}

/// Camera based 6-DoF tracking session.
pub trait CameraSession: Send {
    fn configure(&mut self, features: &CameraFeatures) -> TrackingResult<()>;
    fn advance_frame(&mut self) -> FrameStatus;
    fn tracking_state(&self) -> CameraTrackingState;
    /// Camera pose as `[qx, qy, qz, qw, tx, ty, tz]`.
    fn camera_pose(&self) -> [f32; 7];
    fn set_display_geometry(&mut self, rotation: i32, width: u32, height: u32);
    fn set_camera_texture(&mut self, texture: u32);
    fn resume(&mut self);
    fn pause(&mut self);
}

/// Answers whether a graphics context is current on the calling thread.
pub trait ContextProbe: Send + Sync {
    fn context_current(&self) -> bool;
}

/// Released when dropped.
pub trait ContextGuard: Send {}

/// Creates an offscreen graphics context bound to the calling thread.
pub trait OffscreenContextFactory: Send + Sync {
    fn acquire(&self) -> TrackingResult<Box<dyn ContextGuard>>;
}

/// Receives tracking samples bound for the remote peer.
pub trait TrackingSink: Send + Sync {
    fn send_tracking(&self, target_timestamp_ns: u64, views: &[ViewParams; 2], motion: &DeviceMotion);
    fn prediction_offset_ns(&self) -> u64;
}
