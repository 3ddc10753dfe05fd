//! Shared utilities for PhoneVR: settings, logging, error types.
//!
//! This crate provides the ambient infrastructure used by the tracking and
//! session crates and by the simulator binary.

#![forbid(unsafe_code)]

pub mod error;
pub mod helpers;
pub mod settings;

pub use error::{Error, Result};
pub use helpers::env_bool;
pub use settings::ClientSettings;

/// Initialize tracing.
///
/// Log level is controlled by the `RUST_LOG` environment variable, falling
/// back to `default_level` if it is not set.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
