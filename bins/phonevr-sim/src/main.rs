#![forbid(unsafe_code)]

//! PhoneVR session simulator.
//!
//! Runs the lobby/streaming state machine against simulated sensors, GPU and
//! streaming client, so tracking and lifecycle behaviour can be observed
//! without a phone.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use phonevr_common::ClientSettings;
use phonevr_session::sim::{sim_parts, SimCalibration, SimGraphics, SimOptions};
use phonevr_session::{Session, StreamEvent, TickOutcome};

#[derive(Parser, Debug)]
#[command(name = "phonevr-sim")]
#[command(about = "Run a PhoneVR client session against simulated devices")]
struct Args {
    /// Client settings JSON file
    #[arg(long, env = "PHONEVR_SETTINGS")]
    settings: Option<PathBuf>,

    /// Number of render ticks to run
    #[arg(long, default_value_t = 600)]
    ticks: u32,

    #[arg(long, default_value_t = 2400)]
    screen_width: u32,

    #[arg(long, default_value_t = 1080)]
    screen_height: u32,

    /// Override the display refresh rate
    #[arg(long)]
    refresh_rate: Option<f32>,

    /// Enable camera (6-DoF) tracking
    #[arg(long, default_value_t = false)]
    camera: bool,

    /// Take orientation from the camera tracker
    #[arg(long, default_value_t = false)]
    camera_orientation: bool,

    /// Lose camera tracking every n-th camera frame
    #[arg(long)]
    camera_dropout: Option<u64>,

    /// Simulate a phone without a pressure sensor
    #[arg(long, default_value_t = false)]
    no_barometer: bool,

    /// Start from a phone with no saved viewer
    #[arg(long, default_value_t = false)]
    no_viewer: bool,

    /// Tick at which the server starts streaming
    #[arg(long, default_value_t = 60)]
    stream_after: u32,

    /// Tick at which the server stops streaming
    #[arg(long)]
    stop_after: Option<u32>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_settings(args: &Args) -> Result<ClientSettings> {
    let mut settings = match args.settings.as_ref() {
        Some(path) => ClientSettings::from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => ClientSettings::default(),
    }
    .with_env_overrides()?;

    if let Some(rate) = args.refresh_rate {
        settings.refresh_rate_hz = rate;
    }
    settings.camera_tracking |= args.camera;
    settings.use_camera_orientation |= args.camera_orientation;
    if args.no_barometer {
        settings.barometer_altitude = false;
    }
    settings.validate()?;
    Ok(settings)
}

fn main() -> Result<()> {
    let args = Args::parse();
    phonevr_common::init_tracing_with_default(&args.log_level);

    let settings = load_settings(&args)?;
    info!("starting simulator with {settings:?}");

    let calibration = if args.no_viewer {
        let store = SimCalibration::empty();
        // The user scans a viewer as soon as they are asked to.
        store.set_pending_scan(&[50, 0, 1]);
        store
    } else {
        SimCalibration::saved(&[50, 0, 1])
    };
    let options = SimOptions {
        camera: settings.camera_tracking,
        camera_dropout: args.camera_dropout,
        no_barometer: args.no_barometer,
    };
    let (parts, handles) = sim_parts(options, calibration);

    SimGraphics::make_current();
    let frame_interval = Duration::from_secs_f32(1.0 / settings.refresh_rate_hz);
    let mut session = Session::new(parts, settings);
    session.resume();
    session.surface_created();
    session.set_screen_resolution(args.screen_width, args.screen_height);
    session.send_battery(0.76, false);

    let caps = session.capabilities();
    info!(
        "advertising {}x{} per eye at {:?} Hz",
        caps.default_view_width, caps.default_view_height, caps.refresh_rates
    );

    let barometer_period = session.barometer_sample_period();
    let mut next_pressure_at = Instant::now();
    let mut pressure_hpa = 1013.25f32;

    let mut outcomes: BTreeMap<String, u32> = BTreeMap::new();
    let started = Instant::now();
    for tick in 0..args.ticks {
        let frame_start = Instant::now();

        if let Some(period) = barometer_period {
            if frame_start >= next_pressure_at {
                // Slow climb, roughly 8 cm per sample.
                pressure_hpa -= 0.01;
                session.on_pressure_sample(pressure_hpa);
                next_pressure_at = frame_start + period;
            }
        }

        if tick == args.stream_after {
            handles.client.set_hud_message("Streamer found, connecting");
            handles.client.push_event(StreamEvent::StreamingStarted {
                view_width: caps.default_view_width,
                view_height: caps.default_view_height,
            });
            handles.client.set_auto_frames(true);
        }
        if Some(tick) == args.stop_after {
            handles.client.set_auto_frames(false);
            handles.client.push_event(StreamEvent::StreamingStopped);
        }

        let label = match session.render_tick() {
            Ok(TickOutcome::Idle) => "idle",
            Ok(TickOutcome::AwaitingCalibration) => "awaiting-calibration",
            Ok(TickOutcome::Lobby) => "lobby",
            Ok(TickOutcome::Streamed) => "streamed",
            Ok(TickOutcome::NoFrame) => "no-frame",
            Err(err) => {
                warn!("tick {tick} abandoned: {err}");
                "error"
            }
        };
        *outcomes.entry(label.to_string()).or_default() += 1;

        if let Some(remaining) = frame_interval.checked_sub(frame_start.elapsed()) {
            thread::sleep(remaining);
        }
    }

    let iterations = session.dispatcher_iterations();
    let stats = session.engine().stats();
    info!(
        "ran {} ticks in {:.2?}: {outcomes:?}",
        args.ticks,
        started.elapsed()
    );
    info!(
        "pose fusion: {} fresh, {} fallbacks",
        stats.fresh.load(Ordering::Relaxed),
        stats.fallbacks.load(Ordering::Relaxed)
    );
    info!(
        "tracking samples sent: {} (dispatcher iterations {:?})",
        handles.client.tracking_sent(),
        iterations
    );
    if let Some(altitude) = session.altitude() {
        info!("barometer calibration: {:?}", altitude.calibration());
    }

    session.shutdown();
    let leaked = handles
        .render_log
        .lock()
        .map(|log| log.live_textures.len())
        .unwrap_or_default();
    if leaked > 0 {
        warn!("{leaked} textures still allocated after shutdown");
    }
    Ok(())
}
