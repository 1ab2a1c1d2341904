//! Wire types for the newline-delimited JSON channel between the host and the
//! plugin daemon.
//!
//! Inbound lines decode into [`Envelope`]; outbound lines are [`OutFrame`]s
//! (heartbeat / session / error / log) or the bare `{sessionId, result}` shape
//! used by the worker-pool and fallback paths.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::HostError;

/// Inbound envelope event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequestEvent {
    Request,
    Shutdown,
    InvocationResponse,
}

/// One decoded inbound line. Discarded after dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub session_id: String,
    pub event: RequestEvent,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Outbound frame event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OutEvent {
    Heartbeat,
    Session,
    Error,
    Log,
}

/// Outbound frame. Every session-scoped frame carries the originating
/// session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutFrame {
    pub event: OutEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl OutFrame {
    pub fn heartbeat() -> Self {
        Self { event: OutEvent::Heartbeat, session_id: None, data: None }
    }

    pub fn session(session_id: impl Into<String>, data: Value) -> Self {
        Self {
            event: OutEvent::Session,
            session_id: Some(session_id.into()),
            data: Some(data),
        }
    }

    pub fn error(session_id: impl Into<String>, data: ErrorData) -> Self {
        Self {
            event: OutEvent::Error,
            session_id: Some(session_id.into()),
            data: Some(serde_json::to_value(data).unwrap_or(Value::Null)),
        }
    }

    pub fn log(data: Value) -> Self {
        Self { event: OutEvent::Log, session_id: None, data: Some(data) }
    }
}

/// Payload carried inside a session frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionPayload {
    Stream { data: Value },
    End,
    Error { data: ErrorData },
    Invoke { data: Value },
}

/// Session-scoped error body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    pub error_type: String,
    pub message: String,
}

impl From<&HostError> for ErrorData {
    fn from(err: &HostError) -> Self {
        Self {
            error_type: err.error_type().to_string(),
            message: err.to_string(),
        }
    }
}

/// `{sessionId, result}` line used by the worker-pool relay and the fallback
/// handler path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultFrame {
    pub session_id: String,
    pub result: Value,
}
