//! Process-wide tracing initialisation. Called once from main; loggers
//! everywhere else are plain `tracing` macros with targets.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

static INITIALISED: AtomicBool = AtomicBool::new(false);

/// Install the subscriber. `verbosity` maps 0 -> warn, 1 -> info,
/// 2 -> debug, 3+ -> trace; `OPEN_BROWSER_LOG` overrides everything.
pub fn init(verbosity: u8) {
    if INITIALISED.swap(true, Ordering::SeqCst) {
        return;
    }

    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("OPEN_BROWSER_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}
