//! Tracing setup for a process whose stdout *is* the wire.
//!
//! Frames share stdout with nothing: log output goes to a daily-rotated file
//! when a log directory is configured, to stderr otherwise.

use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::daily;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::HostConfig;

static LOG_INIT: std::sync::Once = std::sync::Once::new();

/// Installs the global tracing subscriber once; later calls are no-ops so a
/// host embedded in a larger process never fights an existing subscriber.
pub fn init(config: &HostConfig) {
    LOG_INIT.call_once(|| {
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy(&config.log_level);

        let result = if let Some(dir) = &config.log_dir {
            // best-effort, the appender surfaces its own failure
            std::fs::create_dir_all(dir).ok();
            let file = daily(dir, "plugin-host.log");
            fmt()
                .with_ansi(false)
                .with_target(false)
                .with_writer(file)
                .with_env_filter(filter)
                .try_init()
        } else {
            fmt()
                .with_ansi(false)
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .try_init()
        };

        if result.is_err() {
            eprintln!("logging setup failed, a subscriber is already installed");
        }
    });
}
