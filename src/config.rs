//! Environment-driven host configuration.
//!
//! Values are read once at startup from the process environment (with `.env`
//! loaded via dotenvy when present) and carried as a typed struct from then on.

use std::path::PathBuf;
use std::time::Duration;

use strum_macros::{Display, EnumString};
use url::Url;

use crate::error::HostError;

pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MAX_REQUEST_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_PLUGIN_DAEMON_URL: &str = "http://localhost:50002";

/// How this plugin bundle was installed. The daemon reads this at handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum InstallMethod {
    #[default]
    Local,
    Remote,
    Serverless,
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Interval between heartbeat frames.
    pub heartbeat_interval: Duration,
    /// Advertised upper bound for one request; not enforced host-side.
    pub max_request_timeout: Duration,
    /// Base URL of the orchestrating daemon, used for backwards invocations.
    pub plugin_daemon_url: Url,
    pub install_method: InstallMethod,
    /// When set, cpu-bound registrations run inline instead of on the pool.
    pub disable_worker: bool,
    /// Directory holding `manifest.yaml`, declarations and `_assets`.
    pub base_dir: PathBuf,
    /// Log directory; `None` logs to stderr (stdout is the wire).
    pub log_dir: Option<PathBuf>,
    pub log_level: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            max_request_timeout: Duration::from_secs(DEFAULT_MAX_REQUEST_TIMEOUT_SECS),
            plugin_daemon_url: Url::parse(DEFAULT_PLUGIN_DAEMON_URL)
                .unwrap_or_else(|_| unreachable!("default daemon url is valid")),
            install_method: InstallMethod::Local,
            disable_worker: false,
            base_dir: PathBuf::from("."),
            log_dir: None,
            log_level: "info".into(),
        }
    }
}

impl HostConfig {
    /// Loads the configuration from the process environment, picking up a
    /// `.env` file when one exists.
    pub fn from_env() -> Result<Self, HostError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Separated from
    /// `from_env` so tests never mutate the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HostError> {
        let mut cfg = Self::default();

        if let Some(v) = lookup("HEARTBEAT_INTERVAL") {
            let secs: u64 = v
                .parse()
                .map_err(|_| HostError::Config(format!("HEARTBEAT_INTERVAL not a number: {v}")))?;
            cfg.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("MAX_REQUEST_TIMEOUT") {
            let secs: u64 = v
                .parse()
                .map_err(|_| HostError::Config(format!("MAX_REQUEST_TIMEOUT not a number: {v}")))?;
            cfg.max_request_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("PLUGIN_DAEMON_URL") {
            cfg.plugin_daemon_url = Url::parse(&v)
                .map_err(|e| HostError::Config(format!("PLUGIN_DAEMON_URL invalid: {e}")))?;
        }
        if let Some(v) = lookup("INSTALL_METHOD") {
            cfg.install_method = v
                .parse()
                .map_err(|_| HostError::Config(format!("INSTALL_METHOD unknown: {v}")))?;
        }
        if let Some(v) = lookup("DISABLE_WORKER") {
            cfg.disable_worker = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = lookup("BASE_DIR") {
            cfg.base_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOG_DIR") {
            cfg.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            cfg.log_level = v;
        }

        Ok(cfg)
    }
}
