#![forbid(unsafe_code)]

pub mod client;
pub mod foveation;
pub mod lens;
pub mod render;
pub mod session;
pub mod sim;
pub mod textures;

pub use client::{ClientCapabilities, ClientSink, DecodedFrame, StreamClient, StreamEvent};
pub use foveation::{foveation_from_settings, parse_foveation, FoveatedEncoding, FoveationParams};
pub use lens::{CalibrationStore, DistortionMesh, LensDistortion, LensFactory};
pub use render::{RenderBackend, StreamConfig};
pub use session::{DirtyFlags, Session, SessionParts, SessionState, TickOutcome};
pub use textures::TextureSet;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// No viewer calibration has been saved yet. The tick is deferred until
    /// the user scans one.
    #[error("no saved viewer calibration")]
    CalibrationMissing,
    /// The host has not reported the surface resolution yet.
    #[error("screen resolution not reported")]
    ScreenSizeUnknown,
    #[error("no graphics context current: {0}")]
    ContextMissing(String),
    #[error("resource allocation failed: {0}")]
    ResourceAllocationFailed(String),
    #[error("tracking dispatcher: {0}")]
    Dispatcher(String),
}

impl SessionError {
    pub fn allocation(msg: impl std::fmt::Display) -> Self {
        Self::ResourceAllocationFailed(msg.to_string())
    }
}

impl From<phonevr_tracking::DispatchError> for SessionError {
    fn from(err: phonevr_tracking::DispatchError) -> Self {
        Self::Dispatcher(err.to_string())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

pub(crate) fn lock_or_recover<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
