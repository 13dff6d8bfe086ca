//! Diagnostics setup.
//!
//! Only this crate logs by default. `RUST_LOG` still adds directives for
//! other crates, and `VOICE_COMMANDER_LOG` sets the level of this one.

use std::str::FromStr;

use env_logger::Builder;
use log::{LevelFilter, info, warn};

pub const LOG_LEVEL_ENV: &str = "VOICE_COMMANDER_LOG";

/// Level for this crate: the override if it parses, else the build default.
fn crate_level(value: Option<&str>) -> (LevelFilter, Option<String>) {
    #[cfg(debug_assertions)]
    let default_level = LevelFilter::Debug;
    #[cfg(not(debug_assertions))]
    let default_level = LevelFilter::Info;

    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => (default_level, None),
        Some(v) => match LevelFilter::from_str(v) {
            Ok(level) => (level, None),
            Err(_) => (default_level, Some(v.to_string())),
        },
    }
}

pub fn init_logging() {
    #[cfg(feature = "voice")]
    whisper_rs::install_logging_hooks();

    let value = std::env::var(LOG_LEVEL_ENV).ok();
    let (level, rejected) = crate_level(value.as_deref());
    Builder::from_default_env()
        .filter_level(LevelFilter::Off)
        .filter_module("voice_commander", level)
        .format_timestamp_secs()
        .format_module_path(false)
        .init();

    if let Some(rejected) = rejected {
        warn!("Ignoring {LOG_LEVEL_ENV}={rejected}, expected a level such as info or trace");
    }
    info!("Logging at {level} for voice_commander");
}
