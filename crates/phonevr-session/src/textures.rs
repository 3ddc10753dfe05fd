use phonevr_tracking::Eye;

/// One render target per eye, all at the same size.
///
/// Not `Clone`: a set is owned by whoever must eventually hand it back to
/// [`RenderBackend::delete_textures`](crate::RenderBackend::delete_textures).
#[derive(Debug, PartialEq, Eq)]
pub struct TextureSet {
    pub handles: [u32; 2],
    pub width: u32,
    pub height: u32,
}

impl TextureSet {
    pub fn handle(&self, eye: Eye) -> u32 {
        self.handles[eye.index()]
    }
}

/// Lobby targets cover half the screen each, side by side.
pub fn lobby_texture_size(screen_width: u32, screen_height: u32) -> (u32, u32) {
    (screen_width / 2, screen_height)
}

/// Per-eye view size advertised to the server before it picks a stream
/// resolution. Independent of screen orientation.
pub fn default_view_size(screen_width: u32, screen_height: u32) -> (u32, u32) {
    (
        screen_width.max(screen_height) / 2,
        screen_width.min(screen_height),
    )
}
