//! Lobby / streaming session.
//!
//! A [`Session`] owns the render targets, the lens model and the tracking
//! dispatcher. The host calls [`Session::render_tick`] once per display frame
//! on the thread that owns the display context. The other entry points only
//! record state for the next tick or forward to a collaborator.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use phonevr_common::ClientSettings;
use phonevr_tracking::{
    head_id, AltitudeEstimator, CameraFeatures, CameraSession, Clock, ContextProbe,
    DispatchInputs, DispatcherConfig, Eye, EyeGeometry, FusionConfig, HeadTracker,
    OffscreenContextFactory, OrientationSource, PoseFusionEngine, PositionSource,
    SharedEyeGeometry, TrackingDispatcher,
};

use crate::client::{ClientCapabilities, ClientSink, StreamClient, StreamEvent};
use crate::foveation::foveation_from_settings;
use crate::lens::{lens_eye_offsets, lens_fovs, CalibrationStore, LensDistortion, LensFactory};
use crate::render::{RenderBackend, StreamConfig};
use crate::textures::{lobby_texture_size, TextureSet};
use crate::{SessionError, SessionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No lobby targets yet.
    Idle,
    Lobby,
    Streaming,
}

/// Work requested by the host since the last completed rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyFlags {
    /// Screen size, rotation or viewer changed.
    pub geometry_changed: bool,
    /// The display context was recreated and took its resources with it.
    pub gl_context_recreated: bool,
}

impl DirtyFlags {
    pub fn any(&self) -> bool {
        self.geometry_changed || self.gl_context_recreated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    /// No viewer calibration saved; nothing was rendered.
    AwaitingCalibration,
    Lobby,
    Streamed,
    /// Streaming, but the decoder had no frame ready.
    NoFrame,
}

/// Platform collaborators a session is built from.
pub struct SessionParts {
    pub head_tracker: Box<dyn HeadTracker>,
    pub camera: Option<Box<dyn CameraSession>>,
    pub context_probe: Arc<dyn ContextProbe>,
    pub offscreen_context: Arc<dyn OffscreenContextFactory>,
    pub client: Arc<dyn StreamClient>,
    pub renderer: Box<dyn RenderBackend>,
    pub calibration: Box<dyn CalibrationStore>,
    pub lens_factory: Box<dyn LensFactory>,
    pub clock: Arc<dyn Clock>,
    pub barometer_available: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Screen {
    width: u32,
    height: u32,
    rotation: i32,
}

impl Screen {
    fn is_known(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

pub struct Session {
    settings: ClientSettings,
    state: SessionState,
    flags: DirtyFlags,
    screen: Screen,
    running: bool,

    engine: Arc<PoseFusionEngine>,
    altitude: Option<Arc<AltitudeEstimator>>,
    geometry: SharedEyeGeometry,
    lens: Option<Box<dyn LensDistortion>>,

    lobby_textures: Option<TextureSet>,
    stream_textures: Option<TextureSet>,
    camera_texture: Option<u32>,
    dispatcher: Option<TrackingDispatcher>,

    client: Arc<dyn StreamClient>,
    renderer: Box<dyn RenderBackend>,
    calibration: Box<dyn CalibrationStore>,
    lens_factory: Box<dyn LensFactory>,
    clock: Arc<dyn Clock>,
    offscreen_context: Arc<dyn OffscreenContextFactory>,
}

impl Session {
    /// Builds the tracking pipeline. A camera session that cannot be
    /// configured, or a missing pressure sensor, only disables that source.
    pub fn new(parts: SessionParts, settings: ClientSettings) -> Self {
        let altitude = match (settings.barometer_altitude, parts.barometer_available) {
            (true, true) => Some(Arc::new(AltitudeEstimator::new(
                settings.sea_level_pressure_hpa,
            ))),
            (true, false) => {
                warn!("no pressure sensor, barometric altitude disabled");
                None
            }
            (false, _) => None,
        };

        let mut engine = PoseFusionEngine::new(
            OrientationSource::new(parts.head_tracker),
            FusionConfig {
                use_camera_orientation: settings.camera_orientation_active(),
            },
        );
        match (settings.camera_tracking, parts.camera) {
            (true, Some(camera)) => {
                match PositionSource::new(camera, &CameraFeatures::default(), parts.context_probe) {
                    Ok(position) => {
                        let position = match altitude.as_ref() {
                            Some(altitude) => position.with_altitude(altitude.clone()),
                            None => position,
                        };
                        engine = engine.with_position(position);
                        info!(
                            "camera tracking enabled (camera orientation: {})",
                            settings.camera_orientation_active()
                        );
                    }
                    Err(err) => {
                        error!("could not configure camera session, continuing without it: {err}")
                    }
                }
            }
            (true, None) => warn!("camera tracking requested but no camera session available"),
            (false, _) => {}
        }

        let geometry = SharedEyeGeometry::new(EyeGeometry {
            floor_height: settings.floor_height_m,
            ..EyeGeometry::default()
        });

        Self {
            settings,
            state: SessionState::Idle,
            // Nothing has been laid out yet.
            flags: DirtyFlags {
                geometry_changed: true,
                gl_context_recreated: false,
            },
            screen: Screen::default(),
            running: false,
            engine: Arc::new(engine),
            altitude,
            geometry,
            lens: None,
            lobby_textures: None,
            stream_textures: None,
            camera_texture: None,
            dispatcher: None,
            client: parts.client,
            renderer: parts.renderer,
            calibration: parts.calibration,
            lens_factory: parts.lens_factory,
            clock: parts.clock,
            offscreen_context: parts.offscreen_context,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn flags(&self) -> DirtyFlags {
        self.flags
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn engine(&self) -> &Arc<PoseFusionEngine> {
        &self.engine
    }

    pub fn eye_geometry(&self) -> EyeGeometry {
        self.geometry.get()
    }

    pub fn altitude(&self) -> Option<&Arc<AltitudeEstimator>> {
        self.altitude.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.dispatcher.is_some()
    }

    pub fn dispatcher_iterations(&self) -> Option<u64> {
        self.dispatcher.as_ref().map(TrackingDispatcher::iterations)
    }

    /// How often the host should deliver pressure samples, `None` when
    /// barometric altitude is off.
    pub fn barometer_sample_period(&self) -> Option<Duration> {
        self.altitude.as_ref().map(|_| {
            Duration::from_micros(1_000_000 / u64::from(self.settings.barometer_sample_rate_hz))
        })
    }

    /// Capabilities to announce for the current screen.
    pub fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities::for_screen(
            self.screen.width,
            self.screen.height,
            self.settings.refresh_rate_hz,
        )
    }

    pub fn resume(&mut self) {
        self.engine.resume();
        if let Some(altitude) = self.altitude.as_ref() {
            // The sensor is re-registered; its first sample is the new floor.
            altitude.reset();
        }
        self.flags.geometry_changed = true;
        if self.saved_device_params().is_none() {
            info!("no viewer calibration saved, requesting a scan");
            self.calibration.request_scan();
        }
        self.running = true;
        self.client.resume();
    }

    /// Streaming, if active, keeps running until the client reports it stopped.
    pub fn pause(&mut self) {
        self.client.pause();
        self.running = false;
        self.engine.pause();
    }

    pub fn surface_created(&mut self) {
        self.flags.gl_context_recreated = true;
    }

    pub fn set_screen_resolution(&mut self, width: u32, height: u32) {
        self.screen.width = width;
        self.screen.height = height;
        self.flags.geometry_changed = true;
    }

    pub fn set_screen_rotation(&mut self, rotation: i32) {
        self.screen.rotation = rotation;
        self.flags.geometry_changed = true;
    }

    /// Barometer callback. Ignored when barometric altitude is off.
    pub fn on_pressure_sample(&self, pressure_hpa: f32) {
        if let Some(altitude) = self.altitude.as_ref() {
            altitude.on_pressure_sample(pressure_hpa);
        }
    }

    pub fn send_battery(&self, level: f32, plugged: bool) {
        self.client.send_battery(head_id(), level, plugged);
    }

    /// Starts a viewer scan. The new calibration is applied on the next resume.
    pub fn switch_viewer(&mut self) {
        self.calibration.request_scan();
    }

    pub fn render_tick(&mut self) -> SessionResult<TickOutcome> {
        if self.flags.geometry_changed {
            match self.apply_viewer_geometry() {
                Ok(()) => {}
                Err(SessionError::CalibrationMissing) => {
                    debug!("waiting for viewer calibration");
                    return Ok(TickOutcome::AwaitingCalibration);
                }
                Err(SessionError::ScreenSizeUnknown) => {
                    debug!("waiting for the screen resolution");
                    self.drain_events()?;
                    return Ok(TickOutcome::Idle);
                }
                Err(err) => return Err(err),
            }
        }

        if self.flags.geometry_changed && !self.flags.gl_context_recreated {
            info!("render geometry changed, releasing lobby textures");
            self.renderer.pause_lobby();
            if let Some(textures) = self.lobby_textures.take() {
                self.renderer.delete_textures(textures);
            }
            if let Some(texture) = self.camera_texture.take() {
                self.renderer.delete_camera_texture(texture);
            }
        }

        if self.flags.any() {
            if self.flags.gl_context_recreated {
                // Handles from the old context are already invalid.
                self.lobby_textures = None;
                self.camera_texture = None;
            }
            self.rebuild_lobby()?;
            self.flags = DirtyFlags::default();
            if self.state == SessionState::Idle {
                self.state = SessionState::Lobby;
            }
        }

        self.drain_events()?;

        match self.state {
            SessionState::Idle => Ok(TickOutcome::Idle),
            SessionState::Lobby => self.render_lobby(),
            SessionState::Streaming => self.render_stream(),
        }
    }

    /// Stops streaming and releases every GPU resource. Also run on drop.
    pub fn shutdown(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.stop();
        }
        for textures in [self.stream_textures.take(), self.lobby_textures.take()]
            .into_iter()
            .flatten()
        {
            self.renderer.delete_textures(textures);
        }
        if let Some(texture) = self.camera_texture.take() {
            self.renderer.delete_camera_texture(texture);
        }
        self.lens = None;
        if self.state != SessionState::Idle {
            info!("session shut down");
        }
        self.state = SessionState::Idle;
        self.running = false;
    }

    fn saved_device_params(&self) -> Option<Vec<u8>> {
        self.calibration
            .saved_device_params()
            .filter(|params| !params.is_empty())
    }

    fn apply_viewer_geometry(&mut self) -> SessionResult<()> {
        let params = self
            .saved_device_params()
            .ok_or(SessionError::CalibrationMissing)?;
        if !self.screen.is_known() {
            return Err(SessionError::ScreenSizeUnknown);
        }
        let lens = self
            .lens_factory
            .create(&params, self.screen.width, self.screen.height)?;

        for eye in Eye::BOTH {
            self.renderer
                .set_distortion_mesh(eye, &lens.distortion_mesh(eye));
        }

        let mut geometry = self.geometry.get();
        geometry.eye_offsets = lens_eye_offsets(lens.as_ref());
        geometry.fovs = lens_fovs(lens.as_ref());
        self.geometry.set(geometry);

        if let Some(position) = self.engine.position_source() {
            position.set_display_geometry(
                self.screen.rotation,
                self.screen.width,
                self.screen.height,
            );
        }

        info!(
            "viewer geometry applied for {}x{}, eye offsets {:?}",
            self.screen.width, self.screen.height, geometry.eye_offsets
        );
        self.lens = Some(lens);
        Ok(())
    }

    fn rebuild_lobby(&mut self) -> SessionResult<()> {
        let (width, height) = lobby_texture_size(self.screen.width, self.screen.height);
        let textures = self.renderer.create_textures(width, height)?;

        if let Some(position) = self.engine.position_source() {
            match self.renderer.create_camera_texture() {
                Ok(texture) => {
                    position.set_camera_texture(texture);
                    self.camera_texture = Some(texture);
                }
                Err(err) => {
                    self.renderer.delete_textures(textures);
                    return Err(err);
                }
            }
        }

        self.renderer.resume_lobby(&textures);
        self.lobby_textures = Some(textures);

        info!(
            "lobby textures rebuilt at {width}x{height} (context recreated: {}, geometry changed: {})",
            self.flags.gl_context_recreated, self.flags.geometry_changed
        );
        Ok(())
    }

    fn drain_events(&mut self) -> SessionResult<()> {
        while let Some(event) = self.client.poll_event() {
            self.handle_event(event)?;
        }
        Ok(())
    }

    /// Applies one stream client event. `render_tick` drains the client queue
    /// through here; hosts that receive events out of band may call it directly.
    pub fn handle_event(&mut self, event: StreamEvent) -> SessionResult<()> {
        match event {
            StreamEvent::HudMessageUpdated => {
                let message = self.client.hud_message();
                info!("HUD message: {message}");
                if !message.is_empty() {
                    self.renderer.update_hud_message(&message);
                }
            }
            StreamEvent::StreamingStarted {
                view_width,
                view_height,
            } => match self.state {
                SessionState::Lobby => {
                    if let Err(err) = self.start_streaming(view_width, view_height) {
                        error!(
                            "stream start at {view_width}x{view_height} dropped, staying in the lobby until the server restarts the stream: {err}"
                        );
                        return Err(err);
                    }
                }
                SessionState::Streaming => warn!("stream start while already streaming, ignored"),
                SessionState::Idle => warn!("stream start before the lobby is ready, ignored"),
            },
            StreamEvent::StreamingStopped => {
                if self.state == SessionState::Streaming {
                    self.stop_streaming();
                } else {
                    debug!("stream stop while not streaming, ignored");
                }
            }
        }
        Ok(())
    }

    fn start_streaming(&mut self, view_width: u32, view_height: u32) -> SessionResult<()> {
        info!("streaming started at {view_width}x{view_height}, allocating stream textures");
        let textures = self.renderer.create_textures(view_width, view_height)?;

        if let Some(lens) = self.lens.as_deref() {
            self.geometry.set_fovs(lens_fovs(lens));
        }

        let foveation = foveation_from_settings(&self.client.settings_json());
        self.renderer.start_stream(&StreamConfig {
            view_width,
            view_height,
            targets: textures.handles,
            foveation,
        });

        let inputs = DispatchInputs {
            engine: self.engine.clone(),
            geometry: self.geometry.clone(),
            sink: Arc::new(ClientSink(self.client.clone())),
            clock: self.clock.clone(),
            context: self
                .engine
                .camera_enabled()
                .then(|| self.offscreen_context.clone()),
        };
        let config = DispatcherConfig::from_refresh_rate(self.settings.refresh_rate_hz);
        match TrackingDispatcher::start(inputs, config) {
            Ok(dispatcher) => {
                self.dispatcher = Some(dispatcher);
                self.stream_textures = Some(textures);
                self.state = SessionState::Streaming;
                Ok(())
            }
            Err(err) => {
                error!("could not start tracking dispatcher: {err}");
                self.renderer.delete_textures(textures);
                Err(err.into())
            }
        }
    }

    fn stop_streaming(&mut self) {
        info!("streaming stopped, waiting for the tracking dispatcher");
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.stop();
        }
        if let Some(textures) = self.stream_textures.take() {
            self.renderer.delete_textures(textures);
        }
        self.state = SessionState::Lobby;
    }

    fn render_lobby(&mut self) -> SessionResult<TickOutcome> {
        let horizon = Duration::from_millis(self.settings.vsync_queue_interval_ms);
        let target_ns = self.clock.now_ns() + horizon.as_nanos() as u64;
        let pose = self
            .engine
            .try_get_pose(target_ns)
            .map_err(|err| SessionError::ContextMissing(err.to_string()))?;

        let views = self.geometry.get().view_params(&pose);
        self.renderer.render_lobby(&views);
        if let Some(textures) = self.lobby_textures.as_ref() {
            self.renderer
                .present(textures, self.screen.width, self.screen.height);
        }
        Ok(TickOutcome::Lobby)
    }

    fn render_stream(&mut self) -> SessionResult<TickOutcome> {
        let Some(frame) = self.client.decoded_frame() else {
            return Ok(TickOutcome::NoFrame);
        };

        self.renderer.render_stream(&frame);
        self.client.report_submit(frame.timestamp_ns);
        if let Some(textures) = self.stream_textures.as_ref() {
            self.renderer
                .present(textures, self.screen.width, self.screen.height);
        }
        Ok(TickOutcome::Streamed)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{sim_parts, SimCalibration, SimOptions};

    #[test]
    fn test_dirty_flags_any() {
        assert!(!DirtyFlags::default().any());
        assert!(DirtyFlags {
            geometry_changed: true,
            ..DirtyFlags::default()
        }
        .any());
        assert!(DirtyFlags {
            gl_context_recreated: true,
            ..DirtyFlags::default()
        }
        .any());
    }

    #[test]
    fn test_idle_session_ignores_stream_start() {
        let (parts, handles) = sim_parts(SimOptions::default(), SimCalibration::saved(&[45]));
        let mut session = Session::new(parts, ClientSettings::default());

        handles.client.push_event(StreamEvent::StreamingStarted {
            view_width: 256,
            view_height: 256,
        });
        assert_eq!(session.render_tick().unwrap(), TickOutcome::Idle);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(handles.render_log.lock().unwrap().allocations.is_empty());
    }

    #[test]
    fn test_pause_keeps_streaming() {
        let (parts, handles) = sim_parts(SimOptions::default(), SimCalibration::saved(&[45]));
        let mut session = Session::new(parts, ClientSettings::default());
        session.resume();
        session.set_screen_resolution(800, 400);
        session.render_tick().unwrap();
        handles.client.push_event(StreamEvent::StreamingStarted {
            view_width: 128,
            view_height: 128,
        });
        session.render_tick().unwrap();

        session.pause();
        assert!(!session.is_running());
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(session.is_streaming());
        assert_eq!(
            handles.client.pauses.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn test_handle_event_out_of_band() {
        let (parts, _handles) = sim_parts(SimOptions::default(), SimCalibration::saved(&[45]));
        let mut session = Session::new(parts, ClientSettings::default());
        session.resume();
        session.set_screen_resolution(800, 400);
        session.render_tick().unwrap();

        session.handle_event(StreamEvent::StreamingStopped).unwrap();
        assert_eq!(session.state(), SessionState::Lobby);

        session
            .handle_event(StreamEvent::StreamingStarted {
                view_width: 128,
                view_height: 128,
            })
            .unwrap();
        assert!(session.is_streaming());

        session.handle_event(StreamEvent::StreamingStopped).unwrap();
        assert_eq!(session.state(), SessionState::Lobby);
    }

    #[test]
    fn test_barometer_sample_period() {
        let (parts, _handles) = sim_parts(SimOptions::default(), SimCalibration::empty());
        let session = Session::new(parts, ClientSettings::default());
        assert_eq!(
            session.barometer_sample_period(),
            Some(Duration::from_millis(100))
        );
    }

    #[test]
    fn test_floor_height_from_settings() {
        let (parts, _handles) = sim_parts(SimOptions::default(), SimCalibration::empty());
        let settings = ClientSettings {
            floor_height_m: 1.7,
            ..ClientSettings::default()
        };
        let session = Session::new(parts, settings);
        assert_eq!(session.eye_geometry().floor_height, 1.7);
    }
}
