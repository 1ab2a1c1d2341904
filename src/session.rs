//! Per-request correlation context. A [`Session`] is built from one inbound
//! request envelope and travels with the request through router, executor and
//! pool so every outbound frame can carry the originating session id.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use url::Url;
use uuid::Uuid;

use crate::error::HostError;
use crate::wire::{Envelope, SessionPayload};
use crate::writer::ResponseWriter;

/// Pending backwards invocations keyed by `backwardsRequestId`, shared
/// between sessions and the envelope dispatch loop.
#[derive(Clone, Default)]
pub struct InflightInvocations {
    pending: Arc<DashMap<String, oneshot::Sender<Value>>>,
}

impl InflightInvocations {
    /// Registers a pending invocation. The entry lives until the daemon
    /// answers or the returned handle is dropped, so an abandoned wait does
    /// not leave a dangling sender behind.
    pub fn register(&self, id: String) -> PendingInvocation {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        PendingInvocation {
            id,
            rx,
            pending: Arc::clone(&self.pending),
        }
    }

    /// Resolves one pending invocation. Returns false when nothing was
    /// waiting under that id.
    pub fn resolve(&self, id: &str, value: Value) -> bool {
        match self.pending.remove(id) {
            Some((_, tx)) => tx.send(value).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Receive half of one backwards invocation. Dropping it without receiving
/// unregisters the invocation.
pub struct PendingInvocation {
    id: String,
    rx: oneshot::Receiver<Value>,
    pending: Arc<DashMap<String, oneshot::Sender<Value>>>,
}

impl PendingInvocation {
    pub async fn recv(&mut self) -> Result<Value, oneshot::error::RecvError> {
        (&mut self.rx).await
    }
}

impl Drop for PendingInvocation {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

#[derive(Clone)]
pub struct Session {
    pub session_id: String,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    pub app_id: Option<String>,
    pub endpoint_id: Option<String>,
    pub context: Value,
    pub daemon_url: Url,
    writer: ResponseWriter,
    inflight: InflightInvocations,
}

impl Session {
    pub fn from_envelope(
        envelope: &Envelope,
        writer: ResponseWriter,
        daemon_url: Url,
        inflight: InflightInvocations,
    ) -> Self {
        Self {
            session_id: envelope.session_id.clone(),
            conversation_id: envelope.conversation_id.clone(),
            message_id: envelope.message_id.clone(),
            app_id: envelope.app_id.clone(),
            endpoint_id: envelope.endpoint_id.clone(),
            context: envelope.context.clone().unwrap_or(Value::Null),
            daemon_url,
            writer,
            inflight,
        }
    }

    pub fn writer(&self) -> &ResponseWriter {
        &self.writer
    }

    /// Streams one intermediate result to the daemon within this session.
    pub fn stream(&self, data: Value) {
        self.writer
            .session_message(&self.session_id, SessionPayload::Stream { data });
    }

    /// Asks the daemon to run something on the plugin's behalf and waits for
    /// the matching `invocation_response` envelope. If this future is dropped
    /// before the daemon answers, the pending entry is unregistered with it.
    pub async fn backwards_invoke(&self, request: Value) -> Result<Value, HostError> {
        let id = Uuid::new_v4().to_string();
        let mut pending = self.inflight.register(id.clone());

        self.writer.session_message(
            &self.session_id,
            SessionPayload::Invoke {
                data: json!({ "backwardsRequestId": id, "request": request }),
            },
        );

        pending
            .recv()
            .await
            .map_err(|_| HostError::implementation("backwards invocation abandoned by the host"))
    }
}
