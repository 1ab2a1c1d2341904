//! Outbound side of the channel. A single task owns the output and drains an
//! unbounded queue, so concurrent producers can never interleave partial
//! frames on the wire.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, warn};

use crate::error::HostError;
use crate::wire::{ErrorData, OutFrame, ResultFrame, SessionPayload};

enum WriterCommand {
    Line(String),
    Close,
}

/// Cloneable handle onto the single outbound writer task.
#[derive(Clone)]
pub struct ResponseWriter {
    tx: UnboundedSender<WriterCommand>,
}

impl ResponseWriter {
    /// Writer onto the process stdout, the default transport.
    pub fn stdout() -> Self {
        Self::to(tokio::io::stdout())
    }

    /// Writer onto any async sink; used for alternate transports.
    pub fn to<W>(sink: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_writer(sink, rx);
        Self { tx }
    }

    /// Test writer: every line written comes back on the returned receiver.
    pub fn capture() -> (Self, UnboundedReceiver<String>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    WriterCommand::Line(line) => {
                        if lines_tx.send(line.trim_end().to_string()).is_err() {
                            break;
                        }
                    }
                    WriterCommand::Close => break,
                }
            }
        });
        (Self { tx }, lines_rx)
    }

    /// Serializes one value as a single line. Frames built by this crate
    /// cannot fail to serialize; a failure is logged and the frame dropped.
    pub fn write<T: Serialize>(&self, frame: &T) {
        match serde_json::to_string(frame) {
            Ok(mut line) => {
                line.push('\n');
                if self.tx.send(WriterCommand::Line(line)).is_err() {
                    warn!("writer task gone, dropping outbound frame");
                }
            }
            Err(e) => error!("unserializable outbound frame: {e}"),
        }
    }

    pub fn heartbeat(&self) {
        self.write(&OutFrame::heartbeat());
    }

    /// Session-scoped payload (`stream` / `end` / `error` / `invoke`).
    pub fn session_message(&self, session_id: &str, payload: SessionPayload) {
        match serde_json::to_value(&payload) {
            Ok(data) => self.write(&OutFrame::session(session_id, data)),
            Err(e) => error!("unserializable session payload: {e}"),
        }
    }

    /// Session-scoped error frame carrying the wire error tag.
    pub fn error(&self, session_id: &str, err: &HostError) {
        self.write(&OutFrame::error(session_id, ErrorData::from(err)));
    }

    /// Out-of-band log line relayed to the daemon.
    pub fn log(&self, data: Value) {
        self.write(&OutFrame::log(data));
    }

    /// Bare `{sessionId, result}` line used by the worker-pool and fallback
    /// paths.
    pub fn result(&self, session_id: &str, result: Value) {
        self.write(&ResultFrame { session_id: session_id.to_string(), result });
    }

    /// Flushes and stops the writer task. Further writes are dropped.
    pub fn close(&self) {
        let _ = self.tx.send(WriterCommand::Close);
    }
}

fn spawn_writer<W>(sink: W, mut rx: UnboundedReceiver<WriterCommand>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut out = BufWriter::new(sink);
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WriterCommand::Line(line) => {
                    if out.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                    // one flush per frame keeps latency bounded on a pipe
                    if out.flush().await.is_err() {
                        break;
                    }
                }
                WriterCommand::Close => {
                    let _ = out.flush().await;
                    break;
                }
            }
        }
    });
}
