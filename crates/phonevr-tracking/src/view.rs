use std::sync::{Arc, Mutex};

use glam::{Quat, Vec3};

use crate::lock_or_recover;
use crate::types::{Eye, Fov, Pose, ViewParams};

pub const DEFAULT_FLOOR_HEIGHT_M: f32 = 1.5;

/// Static per-eye geometry derived from the lens calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeGeometry {
    /// Head-to-eye translation along x, per eye.
    pub eye_offsets: [f32; 2],
    pub fovs: [Fov; 2],
    pub floor_height: f32,
}

impl Default for EyeGeometry {
    fn default() -> Self {
        Self {
            eye_offsets: [0.0; 2],
            fovs: [Fov::default(); 2],
            floor_height: DEFAULT_FLOOR_HEIGHT_M,
        }
    }
}

impl EyeGeometry {
    pub fn view_params(&self, head: &Pose) -> [ViewParams; 2] {
        compute_view_params(head, self.eye_offsets, self.fovs, self.floor_height)
    }
}

/// Eye geometry shared between the render path and the tracking dispatcher.
#[derive(Debug, Clone, Default)]
pub struct SharedEyeGeometry(Arc<Mutex<EyeGeometry>>);

impl SharedEyeGeometry {
    pub fn new(geometry: EyeGeometry) -> Self {
        Self(Arc::new(Mutex::new(geometry)))
    }

    pub fn get(&self) -> EyeGeometry {
        *lock_or_recover(&self.0)
    }

    pub fn set(&self, geometry: EyeGeometry) {
        *lock_or_recover(&self.0) = geometry;
    }

    pub fn set_fovs(&self, fovs: [Fov; 2]) {
        lock_or_recover(&self.0).fovs = fovs;
    }
}

/// Moves `position` from the head to an eye: subtracts the rotated offset and
/// lifts the result by `floor_height` so the local origin sits at eye height.
pub fn offset_pos_with_quat(q: Quat, offset: Vec3, position: Vec3, floor_height: f32) -> Vec3 {
    let rotated = q * offset;
    let mut eye = position - rotated;
    eye.y += floor_height;
    eye
}

pub fn compute_view_params(
    head: &Pose,
    eye_offsets: [f32; 2],
    fovs: [Fov; 2],
    floor_height: f32,
) -> [ViewParams; 2] {
    Eye::BOTH.map(|eye| {
        let offset = Vec3::new(eye_offsets[eye.index()], 0.0, 0.0);
        ViewParams {
            pose: Pose {
                orientation: head.orientation,
                position: offset_pos_with_quat(
                    head.orientation,
                    offset,
                    head.position,
                    floor_height,
                ),
            },
            fov: fovs[eye.index()],
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_head_eye_position() {
        let views = compute_view_params(
            &Pose::IDENTITY,
            [0.03, -0.03],
            [Fov::default(); 2],
            1.5,
        );
        assert!(views[0]
            .pose
            .position
            .abs_diff_eq(Vec3::new(-0.03, 1.5, 0.0), 1e-6));
        assert!(views[1]
            .pose
            .position
            .abs_diff_eq(Vec3::new(0.03, 1.5, 0.0), 1e-6));
    }

    #[test]
    fn test_eye_orientation_matches_head() {
        let head = Pose::new(Quat::from_rotation_y(0.7), Vec3::new(1.0, 0.2, -1.0));
        let views = compute_view_params(&head, [0.03, -0.03], [Fov::default(); 2], 1.5);
        for view in views {
            assert_eq!(view.pose.orientation, head.orientation);
        }
    }

    #[test]
    fn test_offset_follows_head_rotation() {
        // A quarter turn about y maps +x onto -z.
        let head = Pose::new(
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
            Vec3::ZERO,
        );
        let views = compute_view_params(&head, [0.03, 0.0], [Fov::default(); 2], 0.0);
        assert!(views[0]
            .pose
            .position
            .abs_diff_eq(Vec3::new(0.0, 0.0, 0.03), 1e-6));
    }

    #[test]
    fn test_fov_passed_through_per_eye() {
        let left = Fov::from_lens_angles([0.8, 0.7, 0.9, 0.9]);
        let right = Fov::from_lens_angles([0.7, 0.8, 0.9, 0.9]);
        let views = compute_view_params(&Pose::IDENTITY, [0.0; 2], [left, right], 1.5);
        assert_eq!(views[0].fov, left);
        assert_eq!(views[1].fov, right);
    }

    #[test]
    fn test_shared_geometry_updates() {
        let shared = SharedEyeGeometry::default();
        let fov = Fov::from_lens_angles([1.0; 4]);
        shared.set_fovs([fov; 2]);
        assert_eq!(shared.get().fovs, [fov; 2]);
        assert_eq!(shared.get().floor_height, DEFAULT_FLOOR_HEIGHT_M);
    }
}
