//! Typed request DTOs for the `{type, action}` dispatch surface.
//!
//! Every inbound request carries a `type` (capability category) and an
//! `action`; the router matches on those two fields and decodes the body into
//! one of the structs below. Unknown extra fields are ignored so daemon-side
//! additions never break dispatch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};

/// Capability category of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InvokeType {
    Tool,
    Model,
    Agent,
    Endpoint,
    Oauth,
    DynamicParameter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
pub enum ToolAction {
    #[serde(rename = "invoke_tool")]
    #[strum(serialize = "invoke_tool")]
    InvokeTool,
    #[serde(rename = "validate_tool_credentials")]
    #[strum(serialize = "validate_tool_credentials")]
    ValidateCredentials,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
pub enum AgentAction {
    #[serde(rename = "invoke_agent_strategy")]
    #[strum(serialize = "invoke_agent_strategy")]
    InvokeAgentStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
pub enum ModelAction {
    #[serde(rename = "validate_provider_credentials")]
    #[strum(serialize = "validate_provider_credentials")]
    ValidateProviderCredentials,
    #[serde(rename = "validate_model_credentials")]
    #[strum(serialize = "validate_model_credentials")]
    ValidateModelCredentials,
    #[serde(rename = "invoke_llm")]
    #[strum(serialize = "invoke_llm")]
    InvokeLlm,
    #[serde(rename = "get_llm_num_tokens")]
    #[strum(serialize = "get_llm_num_tokens")]
    GetLlmNumTokens,
    #[serde(rename = "invoke_text_embedding")]
    #[strum(serialize = "invoke_text_embedding")]
    InvokeTextEmbedding,
    #[serde(rename = "get_text_embedding_num_tokens")]
    #[strum(serialize = "get_text_embedding_num_tokens")]
    GetTextEmbeddingNumTokens,
    #[serde(rename = "invoke_rerank")]
    #[strum(serialize = "invoke_rerank")]
    InvokeRerank,
    #[serde(rename = "invoke_tts")]
    #[strum(serialize = "invoke_tts")]
    InvokeTts,
    #[serde(rename = "invoke_speech2text")]
    #[strum(serialize = "invoke_speech2text")]
    InvokeSpeech2Text,
    #[serde(rename = "get_ai_model_schemas")]
    #[strum(serialize = "get_ai_model_schemas")]
    GetAiModelSchemas,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
pub enum EndpointAction {
    #[serde(rename = "invoke_endpoint")]
    #[strum(serialize = "invoke_endpoint")]
    InvokeEndpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OAuthAction {
    GetAuthorizationUrl,
    GetCredentials,
    RefreshCredentials,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DynamicParameterAction {
    FetchParameterOptions,
}

/// Model modality, used to key a provider's model instances.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum ModelKind {
    #[serde(rename = "llm")]
    #[strum(serialize = "llm")]
    Llm,
    #[serde(rename = "text-embedding")]
    #[strum(serialize = "text-embedding")]
    TextEmbedding,
    #[serde(rename = "rerank")]
    #[strum(serialize = "rerank")]
    Rerank,
    #[serde(rename = "tts")]
    #[strum(serialize = "tts")]
    Tts,
    #[serde(rename = "speech2text")]
    #[strum(serialize = "speech2text")]
    Speech2Text,
    #[serde(rename = "moderation")]
    #[strum(serialize = "moderation")]
    Moderation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CredentialType {
    #[default]
    ApiKey,
    Oauth,
    BearerToken,
}

/// Route filter on `{type, action}`.
pub fn shape(
    ty: InvokeType,
    action: impl AsRef<str> + Send + Sync + 'static,
) -> impl Fn(&Value) -> bool + Send + Sync + 'static {
    move |data: &Value| {
        data.get("type").and_then(Value::as_str) == Some(ty.as_ref())
            && data.get("action").and_then(Value::as_str) == Some(action.as_ref())
    }
}

// --- tool ------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvokeRequest {
    #[serde(default)]
    pub user_id: String,
    pub provider: String,
    pub tool: String,
    #[serde(default)]
    pub credentials: Value,
    #[serde(default)]
    pub credential_type: CredentialType,
    #[serde(default)]
    pub tool_parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolValidateCredentialsRequest {
    #[serde(default)]
    pub user_id: String,
    pub provider: String,
    #[serde(default)]
    pub credentials: Value,
}

// --- agent -----------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInvokeRequest {
    #[serde(default)]
    pub user_id: String,
    pub agent_strategy_provider: String,
    pub agent_strategy: String,
    #[serde(default)]
    pub agent_strategy_parameters: Value,
}

// --- model -----------------------------------------------------------------

/// Provider/model/modality triple shared by every model request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTarget {
    pub provider: String,
    #[serde(default)]
    pub model: String,
    pub model_type: ModelKind,
    #[serde(default)]
    pub credentials: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmInvokeRequest {
    #[serde(flatten)]
    pub target: ModelTarget,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub prompt_messages: Vec<Value>,
    #[serde(default)]
    pub model_parameters: Value,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmNumTokensRequest {
    #[serde(flatten)]
    pub target: ModelTarget,
    #[serde(default)]
    pub prompt_messages: Vec<Value>,
    #[serde(default)]
    pub tools: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEmbeddingInvokeRequest {
    #[serde(flatten)]
    pub target: ModelTarget,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub texts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEmbeddingNumTokensRequest {
    #[serde(flatten)]
    pub target: ModelTarget,
    #[serde(default)]
    pub texts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankInvokeRequest {
    #[serde(flatten)]
    pub target: ModelTarget,
    #[serde(default)]
    pub user_id: String,
    pub query: String,
    #[serde(default)]
    pub docs: Vec<String>,
    #[serde(default)]
    pub score_threshold: Option<f64>,
    #[serde(default)]
    pub top_n: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsInvokeRequest {
    #[serde(flatten)]
    pub target: ModelTarget,
    #[serde(default)]
    pub user_id: String,
    pub content_text: String,
    #[serde(default)]
    pub voice: String,
    #[serde(default)]
    pub tenant_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Speech2TextInvokeRequest {
    #[serde(flatten)]
    pub target: ModelTarget,
    #[serde(default)]
    pub user_id: String,
    /// Hex-encoded audio payload.
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSchemaRequest {
    #[serde(flatten)]
    pub target: ModelTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateProviderCredentialsRequest {
    pub provider: String,
    #[serde(default)]
    pub credentials: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateModelCredentialsRequest {
    #[serde(flatten)]
    pub target: ModelTarget,
}

// --- endpoint --------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointInvokeRequest {
    /// Raw HTTP request text as forwarded by the daemon.
    pub raw_http_request: String,
    #[serde(default)]
    pub settings: Value,
}

// --- dynamic parameter -----------------------------------------------------

/// Asks a dynamic-select tool for the live options of one of its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchParameterOptionsRequest {
    #[serde(default)]
    pub user_id: String,
    pub provider: String,
    /// Name of the tool whose parameter is being queried.
    pub provider_action: String,
    #[serde(default)]
    pub credentials: Value,
    pub parameter: String,
}

// --- oauth -----------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthGetAuthorizationUrlRequest {
    pub provider: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub system_credentials: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthGetCredentialsRequest {
    pub provider: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub system_credentials: Value,
    pub raw_http_request: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthRefreshCredentialsRequest {
    pub provider: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub system_credentials: Value,
    #[serde(default)]
    pub credentials: Value,
}
