//! Opt-in logging setup.
//!
//! The crate logs through `tracing` and never installs a subscriber on its
//! own; embedding applications bring their own. These helpers cover the
//! common case for binaries and examples that just want console output.

use tracing::Level;

/// Install a console subscriber at the given level. Does nothing if a global
/// subscriber is already set.
pub fn init(level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init();
}

/// Like [`init`], with the level taken from `RUST_LOG` (default `info`).
pub fn init_from_env() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(Level::INFO);
    init(level);
}
