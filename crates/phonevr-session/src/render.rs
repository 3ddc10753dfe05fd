use phonevr_tracking::{Eye, ViewParams};

use crate::client::DecodedFrame;
use crate::foveation::FoveationParams;
use crate::lens::DistortionMesh;
use crate::textures::TextureSet;
use crate::SessionResult;

/// Configuration for the stream renderer, built when streaming starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamConfig {
    pub view_width: u32,
    pub view_height: u32,
    pub targets: [u32; 2],
    pub foveation: Option<FoveationParams>,
}

/// GPU side of the session. Only ever called from the render tick.
pub trait RenderBackend: Send {
    fn create_textures(&mut self, width: u32, height: u32) -> SessionResult<TextureSet>;
    fn delete_textures(&mut self, textures: TextureSet);
    /// Texture the camera tracker draws its background image into.
    fn create_camera_texture(&mut self) -> SessionResult<u32>;
    fn delete_camera_texture(&mut self, texture: u32);

    fn pause_lobby(&mut self);
    fn resume_lobby(&mut self, targets: &TextureSet);
    fn set_distortion_mesh(&mut self, eye: Eye, mesh: &DistortionMesh);
    fn update_hud_message(&mut self, message: &str);
    fn start_stream(&mut self, config: &StreamConfig);

    fn render_lobby(&mut self, views: &[ViewParams; 2]);
    fn render_stream(&mut self, frame: &DecodedFrame);
    /// Distorts both eye textures onto the display.
    fn present(&mut self, textures: &TextureSet, screen_width: u32, screen_height: u32);
}
