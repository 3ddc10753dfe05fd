//! Simulated collaborators.
//!
//! Stand-ins for the head tracker, camera tracker, graphics stack, lens SDK
//! and streaming client. They record what the session asks of them so the
//! simulator binary and the tests can inspect it.

use std::cell::Cell;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use glam::{Quat, Vec3};
use tracing::debug;

use phonevr_tracking::{
    CameraFeatures, CameraSession, CameraTrackingState, ContextGuard, ContextProbe, DeviceMotion,
    Eye, FrameStatus, HeadTracker, MonotonicClock, OffscreenContextFactory, TrackingError,
    TrackingResult, TrackingSink, ViewParams,
};

use crate::client::{DecodedFrame, StreamClient, StreamEvent};
use crate::lens::{CalibrationStore, DistortionMesh, LensDistortion, LensFactory};
use crate::render::{RenderBackend, StreamConfig};
use crate::session::SessionParts;
use crate::textures::TextureSet;
use crate::{lock_or_recover, SessionError, SessionResult};

/// Head tracker that turns the head left and right once every two seconds.
#[derive(Debug, Default)]
pub struct SimHeadTracker {
    paused: bool,
}

impl HeadTracker for SimHeadTracker {
    fn predict_pose(&mut self, timestamp_ns: u64) -> TrackingResult<(Vec3, Quat)> {
        if self.paused {
            return Err(TrackingError::unavailable("head tracker paused"));
        }
        let phase = (timestamp_ns % 2_000_000_000) as f32 / 2e9 * std::f32::consts::TAU;
        let yaw = 0.5 * phase.sin();
        // Trackers report the inverse rotation.
        Ok((Vec3::ZERO, Quat::from_rotation_y(yaw).inverse()))
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn pause(&mut self) {
        self.paused = true;
    }
}

/// What the simulated camera was told by the session.
#[derive(Debug, Default)]
pub struct SimCameraState {
    pub configured: Option<CameraFeatures>,
    pub frames: u64,
    pub display_geometry: Option<(i32, u32, u32)>,
    pub camera_texture: Option<u32>,
    pub running: bool,
}

/// Camera tracker walking a 1 m circle, losing tracking every `dropout_every`
/// frames when set.
pub struct SimCamera {
    state: Arc<Mutex<SimCameraState>>,
    dropout_every: Option<u64>,
    tracking: bool,
}

impl SimCamera {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimCameraState::default())),
            dropout_every: None,
            tracking: false,
        }
    }

    pub fn with_dropout(mut self, every: u64) -> Self {
        self.dropout_every = (every > 0).then_some(every);
        self
    }

    pub fn state(&self) -> Arc<Mutex<SimCameraState>> {
        self.state.clone()
    }
}

impl Default for SimCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraSession for SimCamera {
    fn configure(&mut self, features: &CameraFeatures) -> TrackingResult<()> {
        lock_or_recover(&self.state).configured = Some(*features);
        Ok(())
    }

    fn advance_frame(&mut self) -> FrameStatus {
        let mut state = lock_or_recover(&self.state);
        state.frames += 1;
        self.tracking = match self.dropout_every {
            Some(every) => state.frames % every != 0,
            None => true,
        };
        FrameStatus::Success
    }

    fn tracking_state(&self) -> CameraTrackingState {
        if self.tracking {
            CameraTrackingState::Tracking
        } else {
            CameraTrackingState::Paused
        }
    }

    fn camera_pose(&self) -> [f32; 7] {
        let frames = lock_or_recover(&self.state).frames;
        let angle = frames as f32 * 0.01;
        let q = Quat::from_rotation_y(angle);
        [q.x, q.y, q.z, q.w, angle.cos(), 0.0, angle.sin()]
    }

    fn set_display_geometry(&mut self, rotation: i32, width: u32, height: u32) {
        lock_or_recover(&self.state).display_geometry = Some((rotation, width, height));
    }

    fn set_camera_texture(&mut self, texture: u32) {
        lock_or_recover(&self.state).camera_texture = Some(texture);
    }

    fn resume(&mut self) {
        lock_or_recover(&self.state).running = true;
    }

    fn pause(&mut self) {
        lock_or_recover(&self.state).running = false;
    }
}

thread_local! {
    static CONTEXT_CURRENT: Cell<bool> = const { Cell::new(false) };
}

/// Per-thread graphics context flag.
#[derive(Debug, Default)]
pub struct SimGraphics {
    offscreen_acquired: AtomicUsize,
    offscreen_released: Arc<AtomicUsize>,
}

impl SimGraphics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marks the calling thread as owning the display context.
    pub fn make_current() {
        CONTEXT_CURRENT.with(|current| current.set(true));
    }

    pub fn release_current() {
        CONTEXT_CURRENT.with(|current| current.set(false));
    }

    pub fn offscreen_acquired(&self) -> usize {
        self.offscreen_acquired.load(Ordering::SeqCst)
    }

    pub fn offscreen_released(&self) -> usize {
        self.offscreen_released.load(Ordering::SeqCst)
    }
}

impl ContextProbe for SimGraphics {
    fn context_current(&self) -> bool {
        CONTEXT_CURRENT.with(|current| current.get())
    }
}

struct SimOffscreenGuard {
    released: Arc<AtomicUsize>,
}

impl ContextGuard for SimOffscreenGuard {}

impl Drop for SimOffscreenGuard {
    fn drop(&mut self) {
        SimGraphics::release_current();
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl OffscreenContextFactory for SimGraphics {
    fn acquire(&self) -> TrackingResult<Box<dyn ContextGuard>> {
        SimGraphics::make_current();
        self.offscreen_acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimOffscreenGuard {
            released: self.offscreen_released.clone(),
        }))
    }
}

/// Everything the simulated renderer has been asked to do.
#[derive(Debug, Default)]
pub struct RenderLog {
    pub live_textures: HashSet<u32>,
    /// `(width, height)` of every texture set created, in order.
    pub allocations: Vec<(u32, u32)>,
    pub deleted_sets: usize,
    pub camera_textures: Vec<u32>,
    pub lobby_pauses: usize,
    pub lobby_resumes: usize,
    pub meshes_set: usize,
    pub hud_messages: Vec<String>,
    pub streams_started: Vec<StreamConfig>,
    pub lobby_frames: Vec<[ViewParams; 2]>,
    pub stream_frames: Vec<DecodedFrame>,
    pub presented: Vec<[u32; 2]>,
}

#[derive(Debug)]
pub struct SimRenderer {
    log: Arc<Mutex<RenderLog>>,
    next_handle: u32,
    fail_allocations: Arc<AtomicU32>,
    fail_camera_textures: Arc<AtomicU32>,
}

impl Default for SimRenderer {
    fn default() -> Self {
        Self {
            log: Arc::new(Mutex::new(RenderLog::default())),
            next_handle: 1,
            fail_allocations: Arc::new(AtomicU32::new(0)),
            fail_camera_textures: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl SimRenderer {
    pub fn log(&self) -> Arc<Mutex<RenderLog>> {
        self.log.clone()
    }

    /// Texture set allocations fail while this counter is above zero.
    pub fn allocation_failures(&self) -> Arc<AtomicU32> {
        self.fail_allocations.clone()
    }

    /// Same as [`SimRenderer::allocation_failures`], for camera textures.
    pub fn camera_texture_failures(&self) -> Arc<AtomicU32> {
        self.fail_camera_textures.clone()
    }

    fn next(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl RenderBackend for SimRenderer {
    fn create_textures(&mut self, width: u32, height: u32) -> SessionResult<TextureSet> {
        if width == 0 || height == 0 {
            return Err(SessionError::allocation(format!(
                "invalid texture size {width}x{height}"
            )));
        }
        if take_failure(&self.fail_allocations) {
            return Err(SessionError::allocation("out of texture memory"));
        }

        let handles = [self.next(), self.next()];
        let mut log = lock_or_recover(&self.log);
        log.live_textures.extend(handles);
        log.allocations.push((width, height));
        debug!("sim renderer: textures {handles:?} at {width}x{height}");
        Ok(TextureSet {
            handles,
            width,
            height,
        })
    }

    fn delete_textures(&mut self, textures: TextureSet) {
        let mut log = lock_or_recover(&self.log);
        for handle in textures.handles {
            log.live_textures.remove(&handle);
        }
        log.deleted_sets += 1;
    }

    fn create_camera_texture(&mut self) -> SessionResult<u32> {
        if take_failure(&self.fail_camera_textures) {
            return Err(SessionError::allocation("out of camera texture memory"));
        }
        let handle = self.next();
        let mut log = lock_or_recover(&self.log);
        log.live_textures.insert(handle);
        log.camera_textures.push(handle);
        Ok(handle)
    }

    fn delete_camera_texture(&mut self, texture: u32) {
        lock_or_recover(&self.log).live_textures.remove(&texture);
    }

    fn pause_lobby(&mut self) {
        lock_or_recover(&self.log).lobby_pauses += 1;
    }

    fn resume_lobby(&mut self, _targets: &TextureSet) {
        lock_or_recover(&self.log).lobby_resumes += 1;
    }

    fn set_distortion_mesh(&mut self, _eye: Eye, _mesh: &DistortionMesh) {
        lock_or_recover(&self.log).meshes_set += 1;
    }

    fn update_hud_message(&mut self, message: &str) {
        lock_or_recover(&self.log).hud_messages.push(message.to_string());
    }

    fn start_stream(&mut self, config: &StreamConfig) {
        lock_or_recover(&self.log).streams_started.push(*config);
    }

    fn render_lobby(&mut self, views: &[ViewParams; 2]) {
        lock_or_recover(&self.log).lobby_frames.push(*views);
    }

    fn render_stream(&mut self, frame: &DecodedFrame) {
        lock_or_recover(&self.log).stream_frames.push(*frame);
    }

    fn present(&mut self, textures: &TextureSet, _screen_width: u32, _screen_height: u32) {
        lock_or_recover(&self.log).presented.push(textures.handles);
    }
}

/// In-process streaming client fed by the caller.
#[derive(Debug)]
pub struct SimClient {
    events: Mutex<VecDeque<StreamEvent>>,
    frames: Mutex<VecDeque<DecodedFrame>>,
    hud_message: Mutex<String>,
    settings_json: Mutex<String>,
    prediction_offset_ns: u64,
    next_frame_ts: AtomicU64,
    auto_frames: AtomicBool,
    pub tracking: Mutex<Vec<(u64, DeviceMotion)>>,
    pub submitted: Mutex<Vec<u64>>,
    pub battery: Mutex<Vec<(u64, f32, bool)>>,
    pub resumes: AtomicUsize,
    pub pauses: AtomicUsize,
}

impl Default for SimClient {
    fn default() -> Self {
        Self::new(40_000_000)
    }
}

impl SimClient {
    pub fn new(prediction_offset_ns: u64) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            frames: Mutex::new(VecDeque::new()),
            hud_message: Mutex::new(String::new()),
            settings_json: Mutex::new(r#"{"video": {"foveated_encoding": "Disabled"}}"#.to_string()),
            prediction_offset_ns,
            next_frame_ts: AtomicU64::new(0),
            auto_frames: AtomicBool::new(false),
            tracking: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            battery: Mutex::new(Vec::new()),
            resumes: AtomicUsize::new(0),
            pauses: AtomicUsize::new(0),
        }
    }

    pub fn push_event(&self, event: StreamEvent) {
        lock_or_recover(&self.events).push_back(event);
    }

    pub fn push_frame(&self, frame: DecodedFrame) {
        lock_or_recover(&self.frames).push_back(frame);
    }

    /// Produce a new frame every time one is polled.
    pub fn set_auto_frames(&self, enabled: bool) {
        self.auto_frames.store(enabled, Ordering::SeqCst);
    }

    pub fn set_hud_message(&self, message: impl Into<String>) {
        *lock_or_recover(&self.hud_message) = message.into();
        self.push_event(StreamEvent::HudMessageUpdated);
    }

    pub fn set_settings_json(&self, json: impl Into<String>) {
        *lock_or_recover(&self.settings_json) = json.into();
    }

    pub fn tracking_sent(&self) -> usize {
        lock_or_recover(&self.tracking).len()
    }
}

impl TrackingSink for SimClient {
    fn send_tracking(&self, target_timestamp_ns: u64, _views: &[ViewParams; 2], motion: &DeviceMotion) {
        lock_or_recover(&self.tracking).push((target_timestamp_ns, *motion));
    }

    fn prediction_offset_ns(&self) -> u64 {
        self.prediction_offset_ns
    }
}

impl StreamClient for SimClient {
    fn poll_event(&self) -> Option<StreamEvent> {
        lock_or_recover(&self.events).pop_front()
    }

    fn hud_message(&self) -> String {
        lock_or_recover(&self.hud_message).clone()
    }

    fn settings_json(&self) -> String {
        lock_or_recover(&self.settings_json).clone()
    }

    fn decoded_frame(&self) -> Option<DecodedFrame> {
        if let Some(frame) = lock_or_recover(&self.frames).pop_front() {
            return Some(frame);
        }
        self.auto_frames.load(Ordering::SeqCst).then(|| {
            let ts = self.next_frame_ts.fetch_add(16_666_667, Ordering::SeqCst);
            DecodedFrame {
                timestamp_ns: ts,
                buffer: ts,
            }
        })
    }

    fn report_submit(&self, timestamp_ns: u64) {
        lock_or_recover(&self.submitted).push(timestamp_ns);
    }

    fn send_battery(&self, device_id: u64, level: f32, plugged: bool) {
        lock_or_recover(&self.battery).push((device_id, level, plugged));
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }
}

/// Viewer calibration held in memory. A scan completes immediately when a
/// pending viewer is set.
#[derive(Debug, Default, Clone)]
pub struct SimCalibration {
    saved: Arc<Mutex<Option<Vec<u8>>>>,
    pending_scan: Arc<Mutex<Option<Vec<u8>>>>,
    scans: Arc<AtomicUsize>,
}

impl SimCalibration {
    pub fn saved(params: &[u8]) -> Self {
        let store = Self::default();
        *lock_or_recover(&store.saved) = Some(params.to_vec());
        store
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// The viewer the next scan will find.
    pub fn set_pending_scan(&self, params: &[u8]) {
        *lock_or_recover(&self.pending_scan) = Some(params.to_vec());
    }

    /// Stores `params` as if a scan had just completed.
    pub fn save(&self, params: &[u8]) {
        *lock_or_recover(&self.saved) = Some(params.to_vec());
    }

    pub fn scan_requests(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

impl CalibrationStore for SimCalibration {
    fn saved_device_params(&self) -> Option<Vec<u8>> {
        lock_or_recover(&self.saved).clone()
    }

    fn request_scan(&mut self) {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if let Some(params) = lock_or_recover(&self.pending_scan).take() {
            *lock_or_recover(&self.saved) = Some(params);
        }
    }
}

/// Symmetric lens with 1 degree of field of view per byte of the first
/// parameter, 50 degrees when no parameters are given.
#[derive(Debug, Clone)]
pub struct SimLens {
    half_angle: f32,
    ipd: f32,
}

impl SimLens {
    pub fn from_params(device_params: &[u8]) -> Self {
        let degrees = device_params.first().map_or(50.0, |b| f32::from(*b));
        Self {
            half_angle: degrees.to_radians(),
            ipd: 0.064,
        }
    }
}

impl LensDistortion for SimLens {
    fn field_of_view(&self, _eye: Eye) -> [f32; 4] {
        [self.half_angle; 4]
    }

    fn eye_from_head_offset(&self, eye: Eye) -> f32 {
        match eye {
            Eye::Left => self.ipd / 2.0,
            Eye::Right => -self.ipd / 2.0,
        }
    }

    fn distortion_mesh(&self, _eye: Eye) -> DistortionMesh {
        DistortionMesh {
            indices: vec![0, 1, 2, 2, 1, 3],
            vertices: vec![-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0],
            uvs: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0],
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct SimLensFactory {
    created: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl SimLensFactory {
    /// Screen sizes lenses were created for, in order.
    pub fn created(&self) -> Vec<(u32, u32)> {
        lock_or_recover(&self.created).clone()
    }
}

impl LensFactory for SimLensFactory {
    fn create(
        &self,
        device_params: &[u8],
        screen_width: u32,
        screen_height: u32,
    ) -> SessionResult<Box<dyn LensDistortion>> {
        lock_or_recover(&self.created).push((screen_width, screen_height));
        Ok(Box::new(SimLens::from_params(device_params)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimOptions {
    pub camera: bool,
    /// Lose camera tracking every n-th frame.
    pub camera_dropout: Option<u64>,
    pub no_barometer: bool,
}

/// Handles onto the simulated collaborators behind a [`SessionParts`].
pub struct SimHandles {
    pub client: Arc<SimClient>,
    pub render_log: Arc<Mutex<RenderLog>>,
    pub allocation_failures: Arc<AtomicU32>,
    pub camera_texture_failures: Arc<AtomicU32>,
    pub calibration: SimCalibration,
    pub lenses: SimLensFactory,
    pub graphics: Arc<SimGraphics>,
    pub camera: Option<Arc<Mutex<SimCameraState>>>,
}

pub fn sim_parts(options: SimOptions, calibration: SimCalibration) -> (SessionParts, SimHandles) {
    let client = Arc::new(SimClient::default());
    let renderer = SimRenderer::default();
    let graphics = SimGraphics::new();
    let lenses = SimLensFactory::default();
    let camera = options.camera.then(|| {
        let camera = SimCamera::new();
        match options.camera_dropout {
            Some(every) => camera.with_dropout(every),
            None => camera,
        }
    });

    let handles = SimHandles {
        client: client.clone(),
        render_log: renderer.log(),
        allocation_failures: renderer.allocation_failures(),
        camera_texture_failures: renderer.camera_texture_failures(),
        calibration: calibration.clone(),
        lenses: lenses.clone(),
        graphics: graphics.clone(),
        camera: camera.as_ref().map(SimCamera::state),
    };
    let parts = SessionParts {
        head_tracker: Box::new(SimHeadTracker::default()),
        camera: camera.map(|camera| Box::new(camera) as Box<dyn CameraSession>),
        context_probe: graphics.clone(),
        offscreen_context: graphics,
        client,
        renderer: Box::new(renderer),
        calibration: Box::new(calibration),
        lens_factory: Box::new(lenses),
        clock: Arc::new(MonotonicClock::new()),
        barometer_available: !options.no_barometer,
    };
    (parts, handles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offscreen_guard_releases_thread_context() {
        let graphics = SimGraphics::new();
        std::thread::spawn({
            let graphics = graphics.clone();
            move || {
                assert!(!graphics.context_current());
                let guard = graphics.acquire().unwrap();
                assert!(graphics.context_current());
                drop(guard);
                assert!(!graphics.context_current());
            }
        })
        .join()
        .unwrap();
        assert_eq!(graphics.offscreen_acquired(), 1);
        assert_eq!(graphics.offscreen_released(), 1);
    }

    #[test]
    fn test_renderer_tracks_live_textures() {
        let mut renderer = SimRenderer::default();
        let log = renderer.log();
        let set = renderer.create_textures(64, 32).unwrap();
        assert_eq!(log.lock().unwrap().live_textures.len(), 2);
        renderer.delete_textures(set);
        assert!(log.lock().unwrap().live_textures.is_empty());
        assert!(renderer.create_textures(0, 32).is_err());
    }

    #[test]
    fn test_scheduled_allocation_failure() {
        let mut renderer = SimRenderer::default();
        renderer.allocation_failures().store(1, Ordering::SeqCst);
        assert!(renderer.create_textures(8, 8).is_err());
        assert!(renderer.create_textures(8, 8).is_ok());
    }

    #[test]
    fn test_calibration_scan_saves_pending_viewer() {
        let mut store = SimCalibration::empty();
        assert!(store.saved_device_params().is_none());
        store.request_scan();
        assert!(store.saved_device_params().is_none());
        store.set_pending_scan(&[45]);
        store.request_scan();
        assert_eq!(store.saved_device_params(), Some(vec![45]));
        assert_eq!(store.scan_requests(), 2);
    }

    #[test]
    fn test_camera_dropout() {
        let mut camera = SimCamera::new().with_dropout(3);
        let states: Vec<_> = (0..6)
            .map(|_| {
                camera.advance_frame();
                camera.tracking_state()
            })
            .collect();
        assert_eq!(states[2], CameraTrackingState::Paused);
        assert_eq!(states[5], CameraTrackingState::Paused);
        assert_eq!(states[0], CameraTrackingState::Tracking);
    }
}
