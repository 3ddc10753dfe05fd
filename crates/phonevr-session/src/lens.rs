//! Viewer calibration and lens geometry.

use phonevr_tracking::{Eye, Fov};

use crate::SessionResult;

/// Saved viewer parameters (scanned from the viewer's QR code).
pub trait CalibrationStore: Send {
    /// Encoded device parameters, `None` when nothing has been saved.
    fn saved_device_params(&self) -> Option<Vec<u8>>;
    /// Ask the user to scan a viewer. Completes asynchronously.
    fn request_scan(&mut self);
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistortionMesh {
    pub indices: Vec<u32>,
    pub vertices: Vec<f32>,
    pub uvs: Vec<f32>,
}

/// Lens model for one viewer at one screen size.
pub trait LensDistortion: Send {
    /// `[left, right, bottom, top]` angles in radians, all positive.
    fn field_of_view(&self, eye: Eye) -> [f32; 4];
    /// X translation of the eye-from-head transform.
    fn eye_from_head_offset(&self, eye: Eye) -> f32;
    fn distortion_mesh(&self, eye: Eye) -> DistortionMesh;
}

pub trait LensFactory: Send {
    fn create(
        &self,
        device_params: &[u8],
        screen_width: u32,
        screen_height: u32,
    ) -> SessionResult<Box<dyn LensDistortion>>;
}

pub fn lens_fovs(lens: &dyn LensDistortion) -> [Fov; 2] {
    Eye::BOTH.map(|eye| Fov::from_lens_angles(lens.field_of_view(eye)))
}

pub fn lens_eye_offsets(lens: &dyn LensDistortion) -> [f32; 2] {
    Eye::BOTH.map(|eye| lens.eye_from_head_offset(eye))
}
