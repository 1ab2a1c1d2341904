//! Ordered first-match request routing.
//!
//! Routes are appended during startup and never change afterwards. The
//! registration wrapper owns failure isolation: a body that fails to decode
//! or a handler that returns an error becomes a session-scoped error frame,
//! and the dispatch loop sees a normal (empty) outcome instead of a failure.

use futures::future::BoxFuture;
use futures::stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::error::HostError;
use crate::registry::capability::OutputStream;
use crate::session::Session;

/// How the matched handler wants its work executed.
pub enum HandleOutcome {
    /// In-process result stream, forwarded item by item.
    Io(OutputStream),
    /// Re-dispatch the original request to the worker pool.
    Cpu,
}

impl std::fmt::Debug for HandleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandleOutcome::Io(_) => f.write_str("Io(..)"),
            HandleOutcome::Cpu => f.write_str("Cpu"),
        }
    }
}

impl HandleOutcome {
    pub fn empty() -> Self {
        HandleOutcome::Io(Box::pin(stream::empty()))
    }
}

type Filter = Box<dyn Fn(&Value) -> bool + Send + Sync>;
type Handler = Box<dyn Fn(Session, Value) -> BoxFuture<'static, HandleOutcome> + Send + Sync>;

struct Route {
    filter: Filter,
    run: Handler,
}

#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route. The filter sees the raw request body; on match the
    /// body is decoded into `T` and handed to `handler`.
    pub fn register_route<T, F, Fut>(
        &mut self,
        filter: impl Fn(&Value) -> bool + Send + Sync + 'static,
        handler: F,
    ) where
        T: DeserializeOwned + Send + 'static,
        F: Fn(Session, T) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<HandleOutcome, HostError>> + Send + 'static,
    {
        let run: Handler = Box::new(move |session: Session, data: Value| {
            let request = serde_json::from_value::<T>(data).map_err(HostError::from);
            let fut = request.map(|req| handler(session.clone(), req));
            Box::pin(async move {
                let result = match fut {
                    Ok(fut) => fut.await,
                    Err(decode_err) => Err(decode_err),
                };
                match result {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        warn!(session = %session.session_id, "request handler failed: {err}");
                        session.writer().error(&session.session_id, &err);
                        HandleOutcome::empty()
                    }
                }
            })
        });
        self.routes.push(Route {
            filter: Box::new(filter),
            run,
        });
    }

    /// First matching route wins; `None` means nothing matched and the
    /// caller's fallback applies.
    pub async fn dispatch(&self, session: &Session, data: &Value) -> Option<HandleOutcome> {
        for route in &self.routes {
            if (route.filter)(data) {
                return Some((route.run)(session.clone(), data.clone()).await);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
