use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy of the host runtime.
///
/// Registry errors are fatal at startup, queue overflow is fatal at runtime;
/// everything else is converted into a session-scoped error frame and the
/// process keeps serving.
#[derive(Debug, Error)]
pub enum HostError {
    /// One inbound line could not be decoded. Non-fatal, the stream continues.
    #[error("failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// The reader accumulated more unread envelopes than allowed.
    #[error("reader queue overflow: more than {limit} unread envelopes")]
    QueueOverflow { limit: usize },

    /// A manifest or declaration file could not be loaded or resolved.
    #[error("failed to load {}: {reason}", file.display())]
    Registry { file: PathBuf, reason: String },

    /// A provider/tool/model/agent referenced by a request is not registered.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// No endpoint registration matched the request.
    #[error("no endpoint found for {method} {path}")]
    UnmappedEndpoint { method: String, path: String },

    /// A capability implementation failed during invocation.
    #[error("{0}")]
    Implementation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HostError {
    pub fn implementation(msg: impl Into<String>) -> Self {
        HostError::Implementation(msg.into())
    }

    pub fn registry(file: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        HostError::Registry {
            file: file.into(),
            reason: reason.into(),
        }
    }

    /// Wire-level error type tag, carried in session error frames.
    pub fn error_type(&self) -> &'static str {
        match self {
            HostError::Decode(_) => "DecodeError",
            HostError::QueueOverflow { .. } => "QueueOverflow",
            HostError::Registry { .. } => "RegistryError",
            HostError::NotFound { .. } => "NotFound",
            HostError::UnmappedEndpoint { .. } => "UnmappedEndpoint",
            HostError::Implementation(_) => "PluginInvokeError",
            HostError::Config(_) => "ConfigError",
            HostError::Io(_) => "IoError",
        }
    }
}
