//! The orchestrator: owns the channel ends, the router and the worker pool,
//! and drives the whole request lifecycle.
//!
//! Lifecycle is an explicit state machine (`Stopped → Starting → Running →
//! Stopping → Stopped`); `start` is idempotent while running. Each long-lived
//! loop (event pull, heartbeat, parent probe) is supervised: an uncaught
//! failure restarts the loop after a bounded backoff instead of restarting
//! the process.

use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::blob::{BLOB_CHUNK_SIZE, chunk_blob};
use crate::config::HostConfig;
use crate::error::HostError;
use crate::executor::PluginExecutor;
use crate::logging;
use crate::pool::{Task, TaskHandler, TaskResult, WorkerPool};
use crate::reader::RequestReader;
use crate::registry::PluginRegistry;
use crate::registry::capability::PluginOutput;
use crate::request::{
    AgentAction, AgentInvokeRequest, DynamicParameterAction, EndpointAction,
    EndpointInvokeRequest, FetchParameterOptionsRequest, InvokeType,
    LlmInvokeRequest, LlmNumTokensRequest, ModelAction, ModelSchemaRequest, OAuthAction,
    OAuthGetAuthorizationUrlRequest, OAuthGetCredentialsRequest, OAuthRefreshCredentialsRequest,
    RerankInvokeRequest, Speech2TextInvokeRequest, TextEmbeddingInvokeRequest,
    TextEmbeddingNumTokensRequest, ToolAction, ToolInvokeRequest, ToolValidateCredentialsRequest,
    TtsInvokeRequest, ValidateModelCredentialsRequest, ValidateProviderCredentialsRequest, shape,
};
use crate::router::{HandleOutcome, Router};
use crate::session::{InflightInvocations, Session};
use crate::wire::{Envelope, RequestEvent, SessionPayload};
use crate::writer::ResponseWriter;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_EMPTY_ITERATIONS: u32 = 10;
const EMPTY_BACKOFF: Duration = Duration::from_secs(1);
const RESTART_BACKOFF: Duration = Duration::from_millis(500);
const RESTART_BACKOFF_CAP: Duration = Duration::from_secs(3);
const PARENT_PROBE_INTERVAL: Duration = Duration::from_millis(500);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// How the event loop pulls envelopes off the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullStrategy {
    /// One envelope at a time, handled to completion before the next pull.
    Blocking,
    /// Poll with a bounded timeout and handle each envelope on its own task.
    #[default]
    NonBlocking,
}

type FallbackHandler =
    Arc<dyn Fn(Session, Value) -> BoxFuture<'static, Result<Value, HostError>> + Send + Sync>;

pub struct IoServer {
    config: Arc<HostConfig>,
    router: Router,
    reader: RequestReader,
    writer: ResponseWriter,
    inflight: InflightInvocations,
    state: StdMutex<ServerState>,
    strategy: PullStrategy,
    pool: OnceLock<WorkerPool>,
    cpu_handler: Option<TaskHandler>,
    fallback: Option<FallbackHandler>,
    shutdown_signal: Notify,
    monitor_parent: bool,
}

impl IoServer {
    /// Server on the default stdio transport.
    pub fn new(config: HostConfig, registry: PluginRegistry) -> Self {
        let reader = RequestReader::stdio();
        let writer = ResponseWriter::stdout();
        let mut server = Self::with_channel(config, registry, reader, writer);
        server.monitor_parent = true;
        server
    }

    /// Server on an explicit channel; used for alternate transports and
    /// tests. The parent-liveness probe stays off.
    pub fn with_channel(
        config: HostConfig,
        registry: PluginRegistry,
        reader: RequestReader,
        writer: ResponseWriter,
    ) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(registry);
        let executor = Arc::new(PluginExecutor::new(Arc::clone(&config), registry));
        let router = register_routes(executor);

        Self {
            config,
            router,
            reader,
            writer,
            inflight: InflightInvocations::default(),
            state: StdMutex::new(ServerState::Stopped),
            strategy: PullStrategy::default(),
            pool: OnceLock::new(),
            cpu_handler: None,
            fallback: None,
            shutdown_signal: Notify::new(),
            monitor_parent: false,
        }
    }

    pub fn set_strategy(&mut self, strategy: PullStrategy) {
        self.strategy = strategy;
    }

    /// Handler the worker pool runs for cpu-bound requests. Without one, a
    /// cpu-bound request resolves to an error result.
    pub fn set_cpu_handler(&mut self, handler: impl Fn(Task) -> TaskResult + Send + Sync + 'static) {
        self.cpu_handler = Some(Arc::new(handler));
    }

    /// Handler of last resort for request bodies no route matches.
    pub fn set_fallback_handler<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Session, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, HostError>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move |session, data| Box::pin(handler(session, data))));
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), ServerState::Running | ServerState::Starting)
    }

    pub fn writer(&self) -> &ResponseWriter {
        &self.writer
    }

    /// Brings the server up: logging, worker pool, supervised loops. Calling
    /// it again while running is a no-op.
    pub fn start(self: &Arc<Self>) -> Result<(), HostError> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                ServerState::Running | ServerState::Starting => return Ok(()),
                _ => *state = ServerState::Starting,
            }
        }

        logging::init(&self.config);

        if !self.config.disable_worker {
            let handler = self.cpu_handler.clone().unwrap_or_else(|| {
                Arc::new(|task: Task| {
                    TaskResult::failed(task.message_id, "no cpu handler registered")
                })
            });
            let _ = self.pool.set(WorkerPool::new(handler));
        }

        self.spawn_supervised("event", |server| async move { server.event_loop().await });
        self.spawn_supervised("heartbeat", |server| async move { server.heartbeat_loop().await });
        if self.monitor_parent {
            self.spawn_supervised("parent-probe", |server| async move {
                server.parent_probe_loop().await
            });
        }

        *self.state.lock().unwrap() = ServerState::Running;
        info!(strategy = ?self.strategy, "plugin host running");
        Ok(())
    }

    /// Starts and then parks until a signal or an internal shutdown.
    pub async fn run(self: &Arc<Self>) -> Result<(), HostError> {
        self.start()?;
        self.keep_alive().await;
        Ok(())
    }

    /// Settles on SIGINT/SIGTERM (triggering shutdown) or on a shutdown
    /// initiated elsewhere.
    pub async fn keep_alive(self: &Arc<Self>) {
        if self.state() == ServerState::Stopped {
            return;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT");
                self.shutdown().await;
            }
            _ = terminate_signal() => {
                info!("received SIGTERM");
                self.shutdown().await;
            }
            _ = self.shutdown_signal.notified() => {}
        }
    }

    /// Stops accepting input, drains the writer after a grace period, and
    /// settles in `Stopped`. The process exit itself is the caller's call.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if matches!(*state, ServerState::Stopping | ServerState::Stopped) {
                return;
            }
            *state = ServerState::Stopping;
        }
        info!("shutting down");
        self.reader.close();
        if let Some(pool) = self.pool.get() {
            pool.shutdown();
        }
        sleep(SHUTDOWN_GRACE).await;
        self.writer.close();
        *self.state.lock().unwrap() = ServerState::Stopped;
        self.shutdown_signal.notify_one();
        self.shutdown_signal.notify_waiters();
    }

    fn spawn_supervised<F, Fut>(self: &Arc<Self>, name: &'static str, task: F)
    where
        F: Fn(Arc<Self>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), HostError>> + Send + 'static,
    {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff = RESTART_BACKOFF;
            loop {
                if let Err(err) = task(Arc::clone(&server)).await {
                    error!("{name} loop failed: {err}");
                }
                if !server.is_running() {
                    break;
                }
                warn!("restarting {name} loop in {backoff:?}");
                sleep(backoff).await;
                backoff = (backoff * 2).min(RESTART_BACKOFF_CAP);
            }
        });
    }

    async fn event_loop(self: Arc<Self>) -> Result<(), HostError> {
        let mut empty_iterations: u32 = 0;
        loop {
            if !self.is_running() {
                return Ok(());
            }
            match self.strategy {
                PullStrategy::Blocking => match self.reader.next().await {
                    Ok(Some(envelope)) => self.handle_envelope(envelope).await,
                    Ok(None) => return self.on_reader_closed().await,
                    Err(err) => self.on_reader_error(err).await?,
                },
                PullStrategy::NonBlocking => {
                    match timeout(POLL_INTERVAL, self.reader.next()).await {
                        Err(_elapsed) => {
                            empty_iterations += 1;
                            if empty_iterations >= MAX_EMPTY_ITERATIONS {
                                warn!("no inbound traffic, backing off");
                                empty_iterations = 0;
                                sleep(EMPTY_BACKOFF).await;
                            }
                        }
                        Ok(Ok(Some(envelope))) => {
                            empty_iterations = 0;
                            let server = Arc::clone(&self);
                            // fire and forget; the handler captures its own errors
                            tokio::spawn(async move { server.handle_envelope(envelope).await });
                        }
                        Ok(Ok(None)) => return self.on_reader_closed().await,
                        Ok(Err(err)) => self.on_reader_error(err).await?,
                    }
                }
            }
        }
    }

    async fn on_reader_closed(&self) -> Result<(), HostError> {
        if self.is_running() {
            info!("inbound channel closed, shutting down");
            self.shutdown().await;
        }
        Ok(())
    }

    /// Overflow is fatal; decode errors are logged and the loop continues.
    async fn on_reader_error(&self, err: HostError) -> Result<(), HostError> {
        match err {
            HostError::QueueOverflow { .. } => {
                error!("{err}");
                self.shutdown().await;
                Err(err)
            }
            err => {
                warn!("dropping undecodable envelope: {err}");
                Ok(())
            }
        }
    }

    async fn handle_envelope(self: &Arc<Self>, envelope: Envelope) {
        match envelope.event {
            RequestEvent::Shutdown => self.shutdown().await,
            RequestEvent::InvocationResponse => self.resolve_invocation(envelope),
            RequestEvent::Request => self.handle_request(envelope).await,
        }
    }

    fn resolve_invocation(&self, envelope: Envelope) {
        let Some(id) = envelope.data.get("backwardsRequestId").and_then(Value::as_str) else {
            warn!(session = %envelope.session_id, "invocation response without backwardsRequestId");
            return;
        };
        let value = envelope
            .data
            .get("result")
            .cloned()
            .unwrap_or_else(|| envelope.data.clone());
        if !self.inflight.resolve(id, value) {
            warn!(id, "invocation response matched nothing in flight");
        }
    }

    async fn handle_request(self: &Arc<Self>, envelope: Envelope) {
        let session = Session::from_envelope(
            &envelope,
            self.writer.clone(),
            self.config.plugin_daemon_url.clone(),
            self.inflight.clone(),
        );
        match self.router.dispatch(&session, &envelope.data).await {
            Some(HandleOutcome::Cpu) => self.run_on_pool(session, envelope).await,
            Some(HandleOutcome::Io(stream)) => self.forward_stream(&session, stream).await,
            None => self.run_fallback(session, envelope.data).await,
        }
    }

    /// Forwards a result stream item by item, then closes the session.
    /// Nothing is buffered; the daemon sees results as they are produced.
    async fn forward_stream(
        &self,
        session: &Session,
        mut stream: crate::registry::capability::OutputStream,
    ) {
        while let Some(item) = stream.next().await {
            match item {
                Ok(PluginOutput::Json(data)) => {
                    self.writer
                        .session_message(&session.session_id, SessionPayload::Stream { data });
                }
                Ok(PluginOutput::Blob(bytes)) => {
                    for chunk in chunk_blob(&bytes, BLOB_CHUNK_SIZE) {
                        self.writer.session_message(
                            &session.session_id,
                            SessionPayload::Stream {
                                data: json!({"type": "blob_chunk", "message": chunk}),
                            },
                        );
                    }
                }
                Err(err) => {
                    self.writer.error(&session.session_id, &err);
                }
            }
        }
        self.writer.session_message(&session.session_id, SessionPayload::End);
    }

    /// Relays a cpu-bound request through the pool and writes the bare
    /// `{sessionId, result}` frame the daemon expects from that path.
    async fn run_on_pool(&self, session: Session, envelope: Envelope) {
        let Some(pool) = self.pool.get() else {
            let err = HostError::implementation("worker pool unavailable");
            self.writer.error(&session.session_id, &err);
            return;
        };
        let task = Task {
            message_id: envelope.message_id.unwrap_or_else(|| session.session_id.clone()),
            payload: envelope.data,
        };
        match pool.execute(task).await {
            Ok(TaskResult { error: Some(reason), .. }) => {
                self.writer
                    .error(&session.session_id, &HostError::implementation(reason));
            }
            Ok(TaskResult { result, .. }) => {
                self.writer
                    .result(&session.session_id, result.unwrap_or(Value::Null));
            }
            Err(err) => {
                self.writer.error(&session.session_id, &err);
            }
        }
    }

    async fn run_fallback(&self, session: Session, data: Value) {
        match &self.fallback {
            Some(handler) => match handler(session.clone(), data).await {
                Ok(result) => self.writer.result(&session.session_id, result),
                Err(err) => {
                    warn!(session = %session.session_id, "fallback handler failed: {err}");
                    self.writer.error(&session.session_id, &err);
                }
            },
            None => {
                warn!(session = %session.session_id, "no route matched and no fallback registered");
                let err = HostError::implementation("no handler matched the request");
                self.writer.error(&session.session_id, &err);
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) -> Result<(), HostError> {
        loop {
            if !self.is_running() {
                return Ok(());
            }
            self.writer.heartbeat();
            sleep(self.config.heartbeat_interval).await;
        }
    }

    /// Stdio transport only: when the original parent dies the process gets
    /// reparented to init, and serving an orphaned channel is pointless.
    #[cfg(unix)]
    async fn parent_probe_loop(self: Arc<Self>) -> Result<(), HostError> {
        loop {
            if !self.is_running() {
                return Ok(());
            }
            if std::os::unix::process::parent_id() == 1 {
                warn!("parent process died, shutting down");
                self.shutdown().await;
                return Ok(());
            }
            sleep(PARENT_PROBE_INTERVAL).await;
        }
    }

    #[cfg(not(unix))]
    async fn parent_probe_loop(self: Arc<Self>) -> Result<(), HostError> {
        futures::future::pending().await
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(_) => futures::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    futures::future::pending::<()>().await
}

/// Wires every `{type, action}` pair to its executor operation. Registration
/// order is dispatch order.
fn register_routes(executor: Arc<PluginExecutor>) -> Router {
    let mut router = Router::new();

    macro_rules! route {
        ($ty:expr, $action:expr, $req:ty, $op:ident) => {{
            let ex = Arc::clone(&executor);
            router.register_route::<$req, _, _>(shape($ty, $action), move |session, request| {
                let ex = Arc::clone(&ex);
                async move { ex.$op(session, request).await }
            });
        }};
    }

    route!(InvokeType::Tool, ToolAction::InvokeTool, ToolInvokeRequest, invoke_tool);
    route!(
        InvokeType::Tool,
        ToolAction::ValidateCredentials,
        ToolValidateCredentialsRequest,
        validate_tool_credentials
    );
    route!(
        InvokeType::Agent,
        AgentAction::InvokeAgentStrategy,
        AgentInvokeRequest,
        invoke_agent_strategy
    );
    route!(InvokeType::Model, ModelAction::InvokeLlm, LlmInvokeRequest, invoke_llm);
    route!(InvokeType::Model, ModelAction::GetLlmNumTokens, LlmNumTokensRequest, llm_num_tokens);
    route!(
        InvokeType::Model,
        ModelAction::InvokeTextEmbedding,
        TextEmbeddingInvokeRequest,
        invoke_text_embedding
    );
    route!(
        InvokeType::Model,
        ModelAction::GetTextEmbeddingNumTokens,
        TextEmbeddingNumTokensRequest,
        text_embedding_num_tokens
    );
    route!(InvokeType::Model, ModelAction::InvokeRerank, RerankInvokeRequest, invoke_rerank);
    route!(InvokeType::Model, ModelAction::InvokeTts, TtsInvokeRequest, invoke_tts);
    route!(
        InvokeType::Model,
        ModelAction::InvokeSpeech2Text,
        Speech2TextInvokeRequest,
        invoke_speech2text
    );
    route!(
        InvokeType::Model,
        ModelAction::ValidateProviderCredentials,
        ValidateProviderCredentialsRequest,
        validate_provider_credentials
    );
    route!(
        InvokeType::Model,
        ModelAction::ValidateModelCredentials,
        ValidateModelCredentialsRequest,
        validate_model_credentials
    );
    route!(InvokeType::Model, ModelAction::GetAiModelSchemas, ModelSchemaRequest, model_schemas);
    route!(
        InvokeType::Endpoint,
        EndpointAction::InvokeEndpoint,
        EndpointInvokeRequest,
        invoke_endpoint
    );
    route!(
        InvokeType::DynamicParameter,
        DynamicParameterAction::FetchParameterOptions,
        FetchParameterOptionsRequest,
        fetch_parameter_options
    );
    route!(
        InvokeType::Oauth,
        OAuthAction::GetAuthorizationUrl,
        OAuthGetAuthorizationUrlRequest,
        oauth_authorization_url
    );
    route!(
        InvokeType::Oauth,
        OAuthAction::GetCredentials,
        OAuthGetCredentialsRequest,
        oauth_credentials
    );
    route!(
        InvokeType::Oauth,
        OAuthAction::RefreshCredentials,
        OAuthRefreshCredentialsRequest,
        oauth_refresh
    );

    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::{fixture_bundle, test_plugin_set};

    fn server() -> (Arc<IoServer>, tokio::sync::mpsc::UnboundedReceiver<String>, tempfile::TempDir)
    {
        let dir = fixture_bundle();
        let config = HostConfig {
            base_dir: dir.path().to_path_buf(),
            ..HostConfig::default()
        };
        let registry = PluginRegistry::load(&config, &test_plugin_set()).unwrap();
        let reader = RequestReader::new(16);
        let (writer, lines) = ResponseWriter::capture();
        let server = Arc::new(IoServer::with_channel(config, registry, reader, writer));
        (server, lines, dir)
    }

    fn request_envelope(session: &str, data: Value) -> Envelope {
        serde_json::from_value(json!({
            "sessionId": session,
            "event": "request",
            "data": data
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn request_streams_then_ends() {
        let (server, mut lines, _dir) = server();
        let envelope = request_envelope(
            "s1",
            json!({"type": "tool", "action": "invoke_tool", "provider": "p1", "tool": "t1"}),
        );
        server.handle_envelope(envelope).await;

        let first: Value = serde_json::from_str(&lines.recv().await.unwrap()).unwrap();
        assert_eq!(first["event"], "session");
        assert_eq!(first["sessionId"], "s1");
        assert_eq!(first["data"], json!({"type": "stream", "data": "ok"}));

        let end: Value = serde_json::from_str(&lines.recv().await.unwrap()).unwrap();
        assert_eq!(end["data"]["type"], "end");
    }

    #[tokio::test]
    async fn unknown_provider_becomes_an_error_frame() {
        let (server, mut lines, _dir) = server();
        let envelope = request_envelope(
            "s2",
            json!({"type": "tool", "action": "invoke_tool", "provider": "ghost", "tool": "t1"}),
        );
        server.handle_envelope(envelope).await;

        let frame: Value = serde_json::from_str(&lines.recv().await.unwrap()).unwrap();
        assert_eq!(frame["event"], "error");
        assert_eq!(frame["sessionId"], "s2");
        assert_eq!(frame["data"]["errorType"], "NotFound");
        // router swallows the error after the frame: an empty session follows
        let end: Value = serde_json::from_str(&lines.recv().await.unwrap()).unwrap();
        assert_eq!(end["data"]["type"], "end");
    }

    #[tokio::test]
    async fn dynamic_parameter_request_routes_to_the_tool() {
        let (server, mut lines, _dir) = server();
        let envelope = request_envelope(
            "s7",
            json!({
                "type": "dynamic_parameter",
                "action": "fetch_parameter_options",
                "provider": "p1",
                "providerAction": "t1",
                "parameter": "region"
            }),
        );
        server.handle_envelope(envelope).await;

        let frame: Value = serde_json::from_str(&lines.recv().await.unwrap()).unwrap();
        assert_eq!(frame["sessionId"], "s7");
        assert_eq!(frame["data"]["data"]["options"][0]["value"], "region-a");
        let end: Value = serde_json::from_str(&lines.recv().await.unwrap()).unwrap();
        assert_eq!(end["data"]["type"], "end");
    }

    #[tokio::test]
    async fn unmatched_request_without_fallback_errors() {
        let (server, mut lines, _dir) = server();
        let envelope = request_envelope("s3", json!({"type": "mystery"}));
        server.handle_envelope(envelope).await;

        let frame: Value = serde_json::from_str(&lines.recv().await.unwrap()).unwrap();
        assert_eq!(frame["event"], "error");
        assert_eq!(frame["data"]["errorType"], "PluginInvokeError");
    }

    #[tokio::test]
    async fn fallback_handler_writes_a_result_frame() {
        let dir = fixture_bundle();
        let config = HostConfig {
            base_dir: dir.path().to_path_buf(),
            ..HostConfig::default()
        };
        let registry = PluginRegistry::load(&config, &test_plugin_set()).unwrap();
        let reader = RequestReader::new(16);
        let (writer, mut lines) = ResponseWriter::capture();
        let mut server = IoServer::with_channel(config, registry, reader, writer);
        server.set_fallback_handler(|_session, data| async move {
            Ok(json!({"fellBack": data.get("type").cloned()}))
        });
        let server = Arc::new(server);

        server
            .handle_envelope(request_envelope("s4", json!({"type": "mystery"})))
            .await;

        let frame: Value = serde_json::from_str(&lines.recv().await.unwrap()).unwrap();
        assert_eq!(frame["sessionId"], "s4");
        assert_eq!(frame["result"]["fellBack"], "mystery");
    }

    #[tokio::test]
    async fn invocation_response_resolves_backwards_invoke() {
        let (server, mut lines, _dir) = server();
        let session = Session::from_envelope(
            &request_envelope("s5", json!({})),
            server.writer.clone(),
            server.config.plugin_daemon_url.clone(),
            server.inflight.clone(),
        );

        let invoke = tokio::spawn(async move { session.backwards_invoke(json!({"op": "x"})).await });
        let frame: Value = serde_json::from_str(&lines.recv().await.unwrap()).unwrap();
        let id = frame["data"]["data"]["backwardsRequestId"].as_str().unwrap();

        let response: Envelope = serde_json::from_value(json!({
            "sessionId": "s5",
            "event": "invocation_response",
            "data": {"backwardsRequestId": id, "result": {"done": true}}
        }))
        .unwrap();
        server.handle_envelope(response).await;

        let result = invoke.await.unwrap().unwrap();
        assert_eq!(result["done"], true);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_shutdown_settles() {
        let (server, _lines, _dir) = server();
        server.start().unwrap();
        assert_eq!(server.state(), ServerState::Running);
        server.start().unwrap();
        assert_eq!(server.state(), ServerState::Running);

        server.shutdown().await;
        assert_eq!(server.state(), ServerState::Stopped);
        // second shutdown is a no-op
        server.shutdown().await;
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn cpu_sentinel_goes_through_the_pool() {
        let dir = fixture_bundle();
        let config = HostConfig {
            base_dir: dir.path().to_path_buf(),
            ..HostConfig::default()
        };
        let registry = PluginRegistry::load(&config, &test_plugin_set()).unwrap();
        let reader = RequestReader::new(16);
        let (writer, mut lines) = ResponseWriter::capture();
        let mut server = IoServer::with_channel(config, registry, reader, writer);
        server.set_cpu_handler(|task: Task| {
            TaskResult::ok(task.message_id.clone(), json!({"computed": task.payload["tool"]}))
        });
        let server = Arc::new(server);
        server.start().unwrap();

        let envelope: Envelope = serde_json::from_value(json!({
            "sessionId": "s6",
            "event": "request",
            "messageId": "m6",
            "data": {"type": "tool", "action": "invoke_tool", "provider": "p1", "tool": "t-heavy"}
        }))
        .unwrap();
        server.handle_envelope(envelope).await;

        // the heartbeat loop is live after start(); skip its frames
        let frame: Value = loop {
            let value: Value = serde_json::from_str(&lines.recv().await.unwrap()).unwrap();
            if value.get("result").is_some() {
                break value;
            }
        };
        assert_eq!(frame["sessionId"], "s6");
        assert_eq!(frame["result"]["computed"], "t-heavy");
    }
}
