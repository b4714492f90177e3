//! Tracing initialization helpers.
//!
//! The engine instruments itself with `tracing`; embedding applications
//! that already install a subscriber need nothing from here. For binaries
//! and tests, [`init`] wires up an env-filtered fmt subscriber.

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the default subscriber: `RUST_LOG`-driven filtering (falling
/// back to `info`), compact fmt output, and span traces on errors.
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(ErrorLayer::default())
        .try_init();
}
