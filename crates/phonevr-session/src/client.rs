//! Streaming client contract: the video/transport library as seen by the
//! session.

use std::sync::Arc;

use phonevr_tracking::{DeviceMotion, TrackingSink, ViewParams};

use crate::textures::default_view_size;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// New HUD text is available through [`StreamClient::hud_message`].
    HudMessageUpdated,
    StreamingStarted { view_width: u32, view_height: u32 },
    StreamingStopped,
}

/// A decoded frame ready for the stream renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame {
    pub timestamp_ns: u64,
    /// Opaque hardware buffer handle owned by the decoder.
    pub buffer: u64,
}

/// What the client announces to the server when it connects.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientCapabilities {
    pub default_view_width: u32,
    pub default_view_height: u32,
    pub refresh_rates: Vec<f32>,
    pub foveated_encoding: bool,
    pub encoder_high_profile: bool,
    pub encoder_10_bits: bool,
    pub encoder_av1: bool,
}

impl ClientCapabilities {
    pub fn for_screen(screen_width: u32, screen_height: u32, refresh_rate_hz: f32) -> Self {
        let (default_view_width, default_view_height) =
            default_view_size(screen_width, screen_height);
        Self {
            default_view_width,
            default_view_height,
            refresh_rates: vec![refresh_rate_hz],
            foveated_encoding: true,
            encoder_high_profile: true,
            encoder_10_bits: true,
            encoder_av1: true,
        }
    }
}

pub trait StreamClient: TrackingSink {
    fn poll_event(&self) -> Option<StreamEvent>;
    fn hud_message(&self) -> String;
    /// Server settings as a JSON document.
    fn settings_json(&self) -> String;
    fn decoded_frame(&self) -> Option<DecodedFrame>;
    fn report_submit(&self, timestamp_ns: u64);
    fn send_battery(&self, device_id: u64, level: f32, plugged: bool);
    fn resume(&self);
    fn pause(&self);
}

/// Hands a stream client to the tracking dispatcher as a plain sink.
pub struct ClientSink(pub Arc<dyn StreamClient>);

impl TrackingSink for ClientSink {
    fn send_tracking(&self, target_timestamp_ns: u64, views: &[ViewParams; 2], motion: &DeviceMotion) {
        self.0.send_tracking(target_timestamp_ns, views, motion);
    }

    fn prediction_offset_ns(&self) -> u64 {
        self.0.prediction_offset_ns()
    }
}
