//! Typed capability surface. Plugin crates implement these traits and hand
//! the host a [`PluginSet`] of factories; the registry resolves declaration
//! files against that set at startup, so the whole capability graph is known
//! before the first request.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HostError;
use crate::request::{
    CredentialType, LlmInvokeRequest, LlmNumTokensRequest, ModelKind, RerankInvokeRequest,
    TextEmbeddingInvokeRequest, TextEmbeddingNumTokensRequest, TtsInvokeRequest,
};
use crate::registry::path::HttpRequest;
use crate::session::Session;

/// One item produced by a capability.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginOutput {
    Json(Value),
    Blob(Vec<u8>),
}

pub type OutputStream = BoxStream<'static, Result<PluginOutput, HostError>>;

/// What a capability invocation hands back: either one value or a native
/// stream. The executor normalizes both into an ordered output stream, so
/// implementations never signal streaming through the shape of a value.
pub enum Outcome {
    Value(PluginOutput),
    Stream(OutputStream),
}

impl Outcome {
    pub fn json(value: Value) -> Self {
        Outcome::Value(PluginOutput::Json(value))
    }

    pub fn blob(bytes: Vec<u8>) -> Self {
        Outcome::Value(PluginOutput::Blob(bytes))
    }

    pub fn stream(stream: OutputStream) -> Self {
        Outcome::Stream(stream)
    }
}

/// Credentials and identity handed to a tool for one invocation.
#[derive(Debug, Clone)]
pub struct ToolRuntime {
    pub credentials: Value,
    pub credential_type: CredentialType,
    pub user_id: String,
    pub session_id: String,
}

#[async_trait]
pub trait Tool: Send + Sync {
    async fn invoke(
        &self,
        session: &Session,
        runtime: &ToolRuntime,
        parameters: Value,
    ) -> Result<Outcome, HostError>;

    /// Tools whose select parameters are populated at configuration time
    /// expose themselves here; others have no dynamic-parameter surface.
    fn as_dynamic_select(&self) -> Option<&dyn DynamicSelect> {
        None
    }
}

/// Live option lookup for a dynamic-select tool parameter.
#[async_trait]
pub trait DynamicSelect: Send + Sync {
    async fn fetch_parameter_options(
        &self,
        runtime: &ToolRuntime,
        parameter: &str,
    ) -> Result<Value, HostError>;
}

#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn validate_credentials(&self, credentials: Value) -> Result<(), HostError>;

    /// Providers that also speak OAuth expose themselves here; the registry
    /// routes OAuth requests through the tool-provider table.
    fn as_oauth(&self) -> Option<&dyn OAuthProvider> {
        None
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn validate_provider_credentials(&self, credentials: Value) -> Result<(), HostError>;
}

/// Behavior common to every model modality.
#[async_trait]
pub trait AiModel: Send + Sync {
    async fn validate_credentials(&self, model: &str, credentials: Value) -> Result<(), HostError>;

    async fn model_schema(&self, _model: &str, _credentials: Value) -> Result<Value, HostError> {
        Ok(Value::Null)
    }
}

#[async_trait]
pub trait LargeLanguageModel: AiModel {
    async fn invoke(&self, request: &LlmInvokeRequest) -> Result<Outcome, HostError>;
    async fn num_tokens(&self, request: &LlmNumTokensRequest) -> Result<u64, HostError>;
}

#[async_trait]
pub trait TextEmbeddingModel: AiModel {
    async fn invoke(&self, request: &TextEmbeddingInvokeRequest) -> Result<Outcome, HostError>;
    async fn num_tokens(&self, request: &TextEmbeddingNumTokensRequest)
    -> Result<u64, HostError>;
}

#[async_trait]
pub trait RerankModel: AiModel {
    async fn invoke(&self, request: &RerankInvokeRequest) -> Result<Outcome, HostError>;
}

#[async_trait]
pub trait TtsModel: AiModel {
    /// Audio comes back as blob output, one chunk per stream item.
    async fn invoke(&self, request: &TtsInvokeRequest) -> Result<Outcome, HostError>;
}

#[async_trait]
pub trait Speech2TextModel: AiModel {
    async fn invoke(&self, model: &str, credentials: Value, audio: Vec<u8>)
    -> Result<Value, HostError>;
}

/// A resolved model keyed by its modality. Moderation models have no invoke
/// surface of their own; they are reachable through credential validation and
/// schema fetch only.
#[derive(Clone)]
pub enum ModelInstance {
    Llm(Arc<dyn LargeLanguageModel>),
    TextEmbedding(Arc<dyn TextEmbeddingModel>),
    Rerank(Arc<dyn RerankModel>),
    Tts(Arc<dyn TtsModel>),
    Speech2Text(Arc<dyn Speech2TextModel>),
    Moderation(Arc<dyn AiModel>),
}

impl ModelInstance {
    pub fn kind(&self) -> ModelKind {
        match self {
            ModelInstance::Llm(_) => ModelKind::Llm,
            ModelInstance::TextEmbedding(_) => ModelKind::TextEmbedding,
            ModelInstance::Rerank(_) => ModelKind::Rerank,
            ModelInstance::Tts(_) => ModelKind::Tts,
            ModelInstance::Speech2Text(_) => ModelKind::Speech2Text,
            ModelInstance::Moderation(_) => ModelKind::Moderation,
        }
    }

    pub fn as_ai_model(&self) -> &dyn AiModel {
        match self {
            ModelInstance::Llm(m) => m.as_ref(),
            ModelInstance::TextEmbedding(m) => m.as_ref(),
            ModelInstance::Rerank(m) => m.as_ref(),
            ModelInstance::Tts(m) => m.as_ref(),
            ModelInstance::Speech2Text(m) => m.as_ref(),
            ModelInstance::Moderation(m) => m.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthCredentials {
    #[serde(default)]
    pub metadata: Value,
    pub credentials: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn authorization_url(
        &self,
        redirect_uri: &str,
        system_credentials: &Value,
    ) -> Result<String, HostError>;

    async fn credentials(
        &self,
        redirect_uri: &str,
        system_credentials: &Value,
        request: &HttpRequest,
    ) -> Result<OAuthCredentials, HostError>;

    async fn refresh(
        &self,
        redirect_uri: &str,
        system_credentials: &Value,
        credentials: &Value,
    ) -> Result<OAuthCredentials, HostError>;
}

#[derive(Debug, Clone)]
pub struct AgentRuntime {
    pub user_id: String,
}

#[async_trait]
pub trait AgentStrategy: Send + Sync {
    async fn invoke(
        &self,
        session: &Session,
        runtime: &AgentRuntime,
        parameters: Value,
    ) -> Result<Outcome, HostError>;
}

#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn invoke(
        &self,
        session: &Session,
        request: &HttpRequest,
        values: HashMap<String, String>,
        settings: Value,
    ) -> Result<Outcome, HostError>;
}

/// What one registered export can construct.
#[derive(Clone)]
pub enum ClassFactory {
    ToolProvider(Arc<dyn Fn() -> Arc<dyn ToolProvider> + Send + Sync>),
    Tool(Arc<dyn Fn() -> Arc<dyn Tool> + Send + Sync>),
    ModelProvider(Arc<dyn Fn() -> Arc<dyn ModelProvider> + Send + Sync>),
    Model(Arc<dyn Fn() -> ModelInstance + Send + Sync>),
    AgentStrategy(Arc<dyn Fn() -> Arc<dyn AgentStrategy> + Send + Sync>),
    Endpoint(Arc<dyn Fn() -> Arc<dyn Endpoint> + Send + Sync>),
}

impl ClassFactory {
    pub fn kind(&self) -> &'static str {
        match self {
            ClassFactory::ToolProvider(_) => "tool provider",
            ClassFactory::Tool(_) => "tool",
            ClassFactory::ModelProvider(_) => "model provider",
            ClassFactory::Model(_) => "model",
            ClassFactory::AgentStrategy(_) => "agent strategy",
            ClassFactory::Endpoint(_) => "endpoint",
        }
    }
}

#[derive(Clone)]
pub struct ClassExport {
    pub name: String,
    /// The module's default export, chosen when a declaration names no class.
    pub default: bool,
    pub factory: ClassFactory,
}

/// Statically-typed factory table keyed by module name. Declarations refer to
/// these modules; nothing is discovered at runtime.
#[derive(Clone, Default)]
pub struct PluginSet {
    modules: HashMap<String, Vec<ClassExport>>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: &str, name: &str, default: bool, factory: ClassFactory) {
        self.modules
            .entry(module.to_string())
            .or_default()
            .push(ClassExport {
                name: name.to_string(),
                default,
                factory,
            });
    }

    pub fn register_tool_provider<F>(&mut self, module: &str, name: &str, default: bool, f: F)
    where
        F: Fn() -> Arc<dyn ToolProvider> + Send + Sync + 'static,
    {
        self.register(module, name, default, ClassFactory::ToolProvider(Arc::new(f)));
    }

    pub fn register_tool<F>(&mut self, module: &str, name: &str, default: bool, f: F)
    where
        F: Fn() -> Arc<dyn Tool> + Send + Sync + 'static,
    {
        self.register(module, name, default, ClassFactory::Tool(Arc::new(f)));
    }

    pub fn register_model_provider<F>(&mut self, module: &str, name: &str, default: bool, f: F)
    where
        F: Fn() -> Arc<dyn ModelProvider> + Send + Sync + 'static,
    {
        self.register(module, name, default, ClassFactory::ModelProvider(Arc::new(f)));
    }

    pub fn register_model<F>(&mut self, module: &str, name: &str, f: F)
    where
        F: Fn() -> ModelInstance + Send + Sync + 'static,
    {
        self.register(module, name, false, ClassFactory::Model(Arc::new(f)));
    }

    pub fn register_agent_strategy<F>(&mut self, module: &str, name: &str, default: bool, f: F)
    where
        F: Fn() -> Arc<dyn AgentStrategy> + Send + Sync + 'static,
    {
        self.register(module, name, default, ClassFactory::AgentStrategy(Arc::new(f)));
    }

    pub fn register_endpoint<F>(&mut self, module: &str, name: &str, default: bool, f: F)
    where
        F: Fn() -> Arc<dyn Endpoint> + Send + Sync + 'static,
    {
        self.register(module, name, default, ClassFactory::Endpoint(Arc::new(f)));
    }

    pub fn exports(&self, module: &str) -> Option<&[ClassExport]> {
        self.modules.get(module).map(Vec::as_slice)
    }
}
