//! Inbound side of the channel: a line-reading task feeds a bounded FIFO of
//! decoded envelopes, and one consumer pulls them off with `next`.
//!
//! Decode failures land in their own queue and are re-surfaced to the active
//! consumer one at a time; they never stop the stream. Filling the envelope
//! queue past its limit does stop it — an orchestrator that far behind is not
//! recovering.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::HostError;
use crate::wire::Envelope;

/// Maximum number of unread envelopes before the reader declares overflow.
pub const DEFAULT_QUEUE_LIMIT: usize = 1000;

#[derive(Default)]
struct ReaderState {
    messages: VecDeque<Envelope>,
    errors: VecDeque<HostError>,
    closed: bool,
    overflowed: bool,
    /// Bumped by `restart`; lines from a source attached before the bump are
    /// dropped.
    generation: u64,
}

struct Shared {
    state: Mutex<ReaderState>,
    notify: Notify,
    limit: usize,
}

/// Backpressure-aware envelope source. Clones share one queue.
#[derive(Clone)]
pub struct RequestReader {
    shared: Arc<Shared>,
}

impl RequestReader {
    pub fn new(limit: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ReaderState::default()),
                notify: Notify::new(),
                limit,
            }),
        }
    }

    /// Reader over the process stdin, the default transport.
    pub fn stdio() -> Self {
        let reader = Self::new(DEFAULT_QUEUE_LIMIT);
        reader.attach(BufReader::new(tokio::io::stdin()));
        reader
    }

    /// Spawns a task that feeds lines from `source` into the queue until EOF
    /// or a read error, then closes the reader.
    pub fn attach<R>(&self, mut source: R)
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let generation = shared.state.lock().unwrap().generation;
        tokio::spawn(async move {
            let mut line = String::new();
            loop {
                line.clear();
                match source.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if !push_line(&shared, generation, &line) {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("read error on inbound channel: {e}");
                        break;
                    }
                }
            }
            close_generation(&shared, generation);
        });
    }

    /// Feeds one raw line directly; used by tests and non-stream transports.
    pub fn push_line(&self, line: &str) {
        let generation = self.shared.state.lock().unwrap().generation;
        push_line(&self.shared, generation, line);
    }

    /// Pulls the next envelope. Buffered envelopes come first, then one
    /// pending decode error, then `Ok(None)` once the reader is closed and
    /// drained. Overflow is terminal and always reported.
    pub async fn next(&self) -> Result<Option<Envelope>, HostError> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock().unwrap();
                if state.overflowed {
                    return Err(HostError::QueueOverflow { limit: self.shared.limit });
                }
                if let Some(envelope) = state.messages.pop_front() {
                    return Ok(Some(envelope));
                }
                if let Some(err) = state.errors.pop_front() {
                    return Err(err);
                }
                if state.closed {
                    return Ok(None);
                }
            }
            notified.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().unwrap().closed
    }

    /// Closes the reader; buffered envelopes stay pullable.
    pub fn close(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.closed = true;
        self.shared.notify.notify_one();
    }

    /// Reopens the reader on a fresh source, dropping everything buffered.
    /// Lines still in flight from the previous source are discarded.
    pub fn restart<R>(&self, source: R)
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.messages.clear();
            state.errors.clear();
            state.closed = false;
            state.overflowed = false;
            state.generation += 1;
        }
        self.attach(source);
    }
}

/// Returns false once the reader is closed or overflowed for `generation`,
/// telling the feeding task to stop.
fn push_line(shared: &Shared, generation: u64, line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return true;
    }

    let decoded: Result<Envelope, _> = serde_json::from_str(trimmed);
    let mut state = shared.state.lock().unwrap();
    if state.generation != generation || state.closed || state.overflowed {
        return false;
    }
    match decoded {
        Ok(envelope) => {
            if state.messages.len() >= shared.limit {
                state.overflowed = true;
                warn!(limit = shared.limit, "inbound queue overflow");
                shared.notify.notify_one();
                return false;
            }
            state.messages.push_back(envelope);
        }
        Err(e) => {
            debug!("dropping undecodable line: {e}");
            state.errors.push_back(HostError::Decode(e));
        }
    }
    shared.notify.notify_one();
    true
}

fn close_generation(shared: &Shared, generation: u64) {
    let mut state = shared.state.lock().unwrap();
    if state.generation == generation {
        state.closed = true;
        shared.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::RequestEvent;

    fn request_line(session: &str) -> String {
        format!(r#"{{"sessionId":"{session}","event":"request","data":{{}}}}"#)
    }

    #[tokio::test]
    async fn delivers_in_order_and_surfaces_decode_errors() {
        let reader = RequestReader::new(10);
        reader.push_line(&request_line("a"));
        reader.push_line("this is not json");
        reader.push_line(&request_line("b"));

        // buffered envelopes drain before the decode error surfaces
        assert_eq!(reader.next().await.unwrap().unwrap().session_id, "a");
        assert_eq!(reader.next().await.unwrap().unwrap().session_id, "b");
        let err = reader.next().await.unwrap_err();
        assert_eq!(err.error_type(), "DecodeError");

        reader.close();
        assert!(reader.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overflow_is_terminal() {
        let reader = RequestReader::new(2);
        reader.push_line(&request_line("a"));
        reader.push_line(&request_line("b"));
        reader.push_line(&request_line("c"));

        let err = reader.next().await.unwrap_err();
        assert_eq!(err.error_type(), "QueueOverflow");
        // still overflowed on the next pull
        assert_eq!(reader.next().await.unwrap_err().error_type(), "QueueOverflow");
    }

    #[tokio::test]
    async fn attach_reads_until_eof() {
        let input = format!("{}\n{}\n", request_line("s1"), request_line("s2"));
        let reader = RequestReader::new(10);
        reader.attach(BufReader::new(std::io::Cursor::new(input.into_bytes())));

        assert_eq!(reader.next().await.unwrap().unwrap().session_id, "s1");
        let second = reader.next().await.unwrap().unwrap();
        assert_eq!(second.session_id, "s2");
        assert_eq!(second.event, RequestEvent::Request);
        assert!(reader.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn restart_reopens_with_a_fresh_queue() {
        let reader = RequestReader::new(10);
        reader.push_line(&request_line("stale"));
        reader.close();

        let input = format!("{}\n", request_line("fresh"));
        reader.restart(BufReader::new(std::io::Cursor::new(input.into_bytes())));

        assert_eq!(reader.next().await.unwrap().unwrap().session_id, "fresh");
        assert!(reader.next().await.unwrap().is_none());
    }
}
