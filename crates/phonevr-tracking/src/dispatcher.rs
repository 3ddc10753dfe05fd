//! Fixed-rate tracking dispatch.
//!
//! A dedicated thread samples the fused head pose at a predicted timestamp and
//! hands it to the transport, independent of the render tick. Deadlines are
//! accumulated from the start time so scheduling delay never turns into drift.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::device::{OffscreenContextFactory, TrackingSink};
use crate::fusion::PoseFusionEngine;
use crate::types::DeviceMotion;
use crate::view::SharedEyeGeometry;
use crate::TrackingError;

/// Tracking is sent three times per displayed frame.
pub const DISPATCH_RATE_MULTIPLIER: f64 = 3.0;

pub fn dispatch_interval(refresh_rate_hz: f32) -> Duration {
    Duration::from_nanos((1e9 / refresh_rate_hz as f64 / DISPATCH_RATE_MULTIPLIER) as u64)
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("tracking thread spawn failed: {0}")]
    Spawn(String),
    #[error("tracking thread could not acquire a graphics context: {0}")]
    Context(TrackingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub interval: Duration,
}

impl DispatcherConfig {
    pub fn from_refresh_rate(refresh_rate_hz: f32) -> Self {
        Self {
            interval: dispatch_interval(refresh_rate_hz),
        }
    }
}

/// Everything the dispatch loop needs, moved onto its thread.
pub struct DispatchInputs {
    pub engine: Arc<PoseFusionEngine>,
    pub geometry: SharedEyeGeometry,
    pub sink: Arc<dyn TrackingSink>,
    pub clock: Arc<dyn Clock>,
    /// Present when the loop queries camera tracking and needs its own context.
    pub context: Option<Arc<dyn OffscreenContextFactory>>,
}

#[derive(Debug, Default)]
struct DispatchState {
    stop: AtomicBool,
    iterations: AtomicU64,
}

pub struct TrackingDispatcher {
    state: Arc<DispatchState>,
    runtime: Option<JoinHandle<()>>,
}

impl TrackingDispatcher {
    /// Spawns the dispatch thread. Returns once the thread holds its graphics
    /// context (when one is requested), or with the acquisition error.
    pub fn start(inputs: DispatchInputs, config: DispatcherConfig) -> Result<Self, DispatchError> {
        let state = Arc::new(DispatchState::default());
        let (init_tx, init_rx) = mpsc::channel::<Result<(), TrackingError>>();

        let thread_state = state.clone();
        let runtime = thread::Builder::new()
            .name("phonevr-tracking".to_string())
            .spawn(move || {
                let _context = match inputs.context.as_ref().map(|factory| factory.acquire()) {
                    Some(Ok(guard)) => Some(guard),
                    Some(Err(err)) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                    None => None,
                };
                let _ = init_tx.send(Ok(()));
                run(&inputs, config, &thread_state);
            })
            .map_err(|e| DispatchError::Spawn(e.to_string()))?;

        match init_rx.recv() {
            Ok(Ok(())) => {
                info!(
                    "tracking dispatcher started, interval {} us",
                    config.interval.as_micros()
                );
                Ok(Self {
                    state,
                    runtime: Some(runtime),
                })
            }
            Ok(Err(err)) => {
                let _ = runtime.join();
                Err(DispatchError::Context(err))
            }
            Err(_) => {
                let _ = runtime.join();
                Err(DispatchError::Spawn(
                    "tracking thread exited during startup".to_string(),
                ))
            }
        }
    }

    /// Signals the loop and blocks until the thread has exited.
    pub fn stop(mut self) {
        self.shutdown();
    }

    pub fn iterations(&self) -> u64 {
        self.state.iterations.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.runtime
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn shutdown(&mut self) {
        self.state.stop.store(true, Ordering::Release);
        if let Some(handle) = self.runtime.take() {
            if handle.join().is_err() {
                error!("tracking dispatcher thread panicked");
            }
            info!(
                "tracking dispatcher stopped after {} iterations",
                self.iterations()
            );
        }
    }
}

impl Drop for TrackingDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(inputs: &DispatchInputs, config: DispatcherConfig, state: &DispatchState) {
    let interval_ns = config.interval.as_nanos() as u64;
    let mut deadline = inputs.clock.now_ns();

    while !state.stop.load(Ordering::Acquire) {
        let target_ns = inputs.clock.now_ns() + inputs.sink.prediction_offset_ns();
        match inputs.engine.try_get_pose(target_ns) {
            Ok(pose) => {
                let views = inputs.geometry.get().view_params(&pose);
                inputs
                    .sink
                    .send_tracking(target_ns, &views, &DeviceMotion::head(pose));
            }
            Err(err) => {
                error!("tracking dispatch skipped: {err}");
            }
        }
        state.iterations.fetch_add(1, Ordering::AcqRel);

        deadline += interval_ns;
        inputs.clock.sleep_until(deadline);
    }
    debug!("tracking dispatch loop exited");
}
