//! Uniform capability invocation. Every operation looks its implementation up
//! in the registry, runs it, and normalizes whatever comes back into one
//! ordered output stream. A cpu-bound registration short-circuits into the
//! [`HandleOutcome::Cpu`] sentinel before any work happens; the orchestrator
//! re-dispatches the original request to the worker pool.

use std::sync::Arc;

use futures::stream;
use futures::StreamExt;
use serde_json::{Value, json};

use crate::config::HostConfig;
use crate::error::HostError;
use crate::registry::PluginRegistry;
use crate::registry::capability::{
    AgentRuntime, ModelInstance, Outcome, OutputStream, PluginOutput, ToolRuntime,
};
use crate::registry::path::parse_raw_http_request;
use crate::request::{
    AgentInvokeRequest, EndpointInvokeRequest, FetchParameterOptionsRequest, LlmInvokeRequest,
    LlmNumTokensRequest, ModelKind,
    ModelSchemaRequest, OAuthGetAuthorizationUrlRequest, OAuthGetCredentialsRequest,
    OAuthRefreshCredentialsRequest, RerankInvokeRequest, Speech2TextInvokeRequest,
    TextEmbeddingInvokeRequest, TextEmbeddingNumTokensRequest, ToolInvokeRequest,
    ToolValidateCredentialsRequest, TtsInvokeRequest, ValidateModelCredentialsRequest,
    ValidateProviderCredentialsRequest,
};
use crate::router::HandleOutcome;
use crate::session::Session;

/// Flattens an [`Outcome`] into an ordered output stream: a JSON array value
/// becomes one item per element, any other single value a one-item stream,
/// and a native stream passes through untouched.
pub fn normalize(outcome: Outcome) -> OutputStream {
    match outcome {
        Outcome::Value(PluginOutput::Json(Value::Array(items))) => Box::pin(stream::iter(
            items.into_iter().map(|item| Ok(PluginOutput::Json(item))),
        )),
        Outcome::Value(single) => Box::pin(stream::once(async move { Ok(single) })),
        Outcome::Stream(inner) => inner,
    }
}

fn single(value: Value) -> HandleOutcome {
    HandleOutcome::Io(normalize(Outcome::json(value)))
}

pub struct PluginExecutor {
    config: Arc<HostConfig>,
    registry: Arc<PluginRegistry>,
}

impl PluginExecutor {
    pub fn new(config: Arc<HostConfig>, registry: Arc<PluginRegistry>) -> Self {
        Self { config, registry }
    }

    /// Cpu-bound work runs inline anyway when the pool is disabled.
    fn shunt_to_pool(&self, cpu_bound: bool) -> bool {
        cpu_bound && !self.config.disable_worker
    }

    fn model(&self, provider: &str, kind: ModelKind) -> Result<&ModelInstance, HostError> {
        self.registry.model(provider, kind).ok_or_else(|| HostError::NotFound {
            kind: "model",
            name: format!("{kind} (provider {provider})"),
        })
    }

    // --- tool --------------------------------------------------------------

    pub async fn invoke_tool(
        &self,
        session: Session,
        request: ToolInvokeRequest,
    ) -> Result<HandleOutcome, HostError> {
        let registration =
            self.registry
                .tool(&request.provider, &request.tool)
                .ok_or_else(|| HostError::NotFound {
                    kind: "tool",
                    name: format!("{} (provider {})", request.tool, request.provider),
                })?;
        if self.shunt_to_pool(registration.cpu_bound) {
            return Ok(HandleOutcome::Cpu);
        }

        let runtime = ToolRuntime {
            credentials: request.credentials,
            credential_type: request.credential_type,
            user_id: request.user_id,
            session_id: session.session_id.clone(),
        };
        let outcome = registration
            .instance
            .invoke(&session, &runtime, request.tool_parameters)
            .await?;
        Ok(HandleOutcome::Io(normalize(outcome)))
    }

    pub async fn validate_tool_credentials(
        &self,
        _session: Session,
        request: ToolValidateCredentialsRequest,
    ) -> Result<HandleOutcome, HostError> {
        let provider = self.registry.tool_provider(&request.provider).ok_or_else(|| {
            HostError::NotFound { kind: "tool provider", name: request.provider.clone() }
        })?;
        provider.instance.validate_credentials(request.credentials).await?;
        Ok(single(json!({"result": true})))
    }

    /// Live options for a dynamic-select tool parameter, fetched at
    /// configuration time rather than invocation time.
    pub async fn fetch_parameter_options(
        &self,
        session: Session,
        request: FetchParameterOptionsRequest,
    ) -> Result<HandleOutcome, HostError> {
        let registration = self
            .registry
            .tool(&request.provider, &request.provider_action)
            .ok_or_else(|| HostError::NotFound {
                kind: "tool",
                name: format!("{} (provider {})", request.provider_action, request.provider),
            })?;
        let dynamic = registration.instance.as_dynamic_select().ok_or_else(|| {
            HostError::implementation(format!(
                "tool '{}' has no dynamic parameters",
                request.provider_action
            ))
        })?;

        let runtime = ToolRuntime {
            credentials: request.credentials,
            credential_type: Default::default(),
            user_id: request.user_id,
            session_id: session.session_id.clone(),
        };
        let options = dynamic.fetch_parameter_options(&runtime, &request.parameter).await?;
        Ok(single(json!({"options": options})))
    }

    // --- agent -------------------------------------------------------------

    pub async fn invoke_agent_strategy(
        &self,
        session: Session,
        request: AgentInvokeRequest,
    ) -> Result<HandleOutcome, HostError> {
        let registration = self
            .registry
            .agent_strategy(&request.agent_strategy_provider, &request.agent_strategy)
            .ok_or_else(|| HostError::NotFound {
                kind: "agent strategy",
                name: format!(
                    "{} (provider {})",
                    request.agent_strategy, request.agent_strategy_provider
                ),
            })?;
        if self.shunt_to_pool(registration.cpu_bound) {
            return Ok(HandleOutcome::Cpu);
        }

        let runtime = AgentRuntime { user_id: request.user_id.clone() };
        let outcome = registration
            .instance
            .invoke(&session, &runtime, request.agent_strategy_parameters)
            .await?;
        Ok(HandleOutcome::Io(normalize(outcome)))
    }

    // --- model -------------------------------------------------------------

    pub async fn invoke_llm(
        &self,
        _session: Session,
        request: LlmInvokeRequest,
    ) -> Result<HandleOutcome, HostError> {
        let ModelInstance::Llm(model) = self.model(&request.target.provider, ModelKind::Llm)?
        else {
            return Err(HostError::NotFound {
                kind: "model",
                name: format!("llm (provider {})", request.target.provider),
            });
        };
        let outcome = model.invoke(&request).await?;
        Ok(HandleOutcome::Io(normalize(outcome)))
    }

    pub async fn llm_num_tokens(
        &self,
        _session: Session,
        request: LlmNumTokensRequest,
    ) -> Result<HandleOutcome, HostError> {
        let ModelInstance::Llm(model) = self.model(&request.target.provider, ModelKind::Llm)?
        else {
            return Err(HostError::NotFound {
                kind: "model",
                name: format!("llm (provider {})", request.target.provider),
            });
        };
        let num_tokens = model.num_tokens(&request).await?;
        Ok(single(json!({"numTokens": num_tokens})))
    }

    pub async fn invoke_text_embedding(
        &self,
        _session: Session,
        request: TextEmbeddingInvokeRequest,
    ) -> Result<HandleOutcome, HostError> {
        let ModelInstance::TextEmbedding(model) =
            self.model(&request.target.provider, ModelKind::TextEmbedding)?
        else {
            return Err(HostError::NotFound {
                kind: "model",
                name: format!("text-embedding (provider {})", request.target.provider),
            });
        };
        let outcome = model.invoke(&request).await?;
        Ok(HandleOutcome::Io(normalize(outcome)))
    }

    pub async fn text_embedding_num_tokens(
        &self,
        _session: Session,
        request: TextEmbeddingNumTokensRequest,
    ) -> Result<HandleOutcome, HostError> {
        let ModelInstance::TextEmbedding(model) =
            self.model(&request.target.provider, ModelKind::TextEmbedding)?
        else {
            return Err(HostError::NotFound {
                kind: "model",
                name: format!("text-embedding (provider {})", request.target.provider),
            });
        };
        let num_tokens = model.num_tokens(&request).await?;
        Ok(single(json!({"numTokens": num_tokens})))
    }

    pub async fn invoke_rerank(
        &self,
        _session: Session,
        request: RerankInvokeRequest,
    ) -> Result<HandleOutcome, HostError> {
        let ModelInstance::Rerank(model) =
            self.model(&request.target.provider, ModelKind::Rerank)?
        else {
            return Err(HostError::NotFound {
                kind: "model",
                name: format!("rerank (provider {})", request.target.provider),
            });
        };
        let outcome = model.invoke(&request).await?;
        Ok(HandleOutcome::Io(normalize(outcome)))
    }

    /// Audio chunks cross the textual wire as `{"result": "<hex>"}` items.
    pub async fn invoke_tts(
        &self,
        _session: Session,
        request: TtsInvokeRequest,
    ) -> Result<HandleOutcome, HostError> {
        let ModelInstance::Tts(model) = self.model(&request.target.provider, ModelKind::Tts)?
        else {
            return Err(HostError::NotFound {
                kind: "model",
                name: format!("tts (provider {})", request.target.provider),
            });
        };
        let outcome = model.invoke(&request).await?;
        let hexed = normalize(outcome).map(|item| {
            item.map(|output| match output {
                PluginOutput::Blob(bytes) => {
                    PluginOutput::Json(json!({"result": hex::encode(bytes)}))
                }
                json => json,
            })
        });
        Ok(HandleOutcome::Io(Box::pin(hexed)))
    }

    pub async fn invoke_speech2text(
        &self,
        _session: Session,
        request: Speech2TextInvokeRequest,
    ) -> Result<HandleOutcome, HostError> {
        let ModelInstance::Speech2Text(model) =
            self.model(&request.target.provider, ModelKind::Speech2Text)?
        else {
            return Err(HostError::NotFound {
                kind: "model",
                name: format!("speech2text (provider {})", request.target.provider),
            });
        };
        let audio = hex::decode(&request.file)
            .map_err(|e| HostError::implementation(format!("invalid hex audio payload: {e}")))?;
        let result = model
            .invoke(&request.target.model, request.target.credentials, audio)
            .await?;
        Ok(single(json!({"result": result})))
    }

    pub async fn model_schemas(
        &self,
        _session: Session,
        request: ModelSchemaRequest,
    ) -> Result<HandleOutcome, HostError> {
        let model = self.model(&request.target.provider, request.target.model_type)?;
        let schema = model
            .as_ai_model()
            .model_schema(&request.target.model, request.target.credentials)
            .await?;
        Ok(single(json!({"modelSchema": schema})))
    }

    pub async fn validate_provider_credentials(
        &self,
        _session: Session,
        request: ValidateProviderCredentialsRequest,
    ) -> Result<HandleOutcome, HostError> {
        let provider = self.registry.model_provider(&request.provider).ok_or_else(|| {
            HostError::NotFound { kind: "model provider", name: request.provider.clone() }
        })?;
        provider
            .instance
            .validate_provider_credentials(request.credentials.clone())
            .await?;
        Ok(single(json!({"result": true, "credentials": request.credentials})))
    }

    pub async fn validate_model_credentials(
        &self,
        _session: Session,
        request: ValidateModelCredentialsRequest,
    ) -> Result<HandleOutcome, HostError> {
        let model = self.model(&request.target.provider, request.target.model_type)?;
        model
            .as_ai_model()
            .validate_credentials(&request.target.model, request.target.credentials.clone())
            .await?;
        Ok(single(json!({"result": true, "credentials": request.target.credentials})))
    }

    // --- endpoint ----------------------------------------------------------

    pub async fn invoke_endpoint(
        &self,
        session: Session,
        request: EndpointInvokeRequest,
    ) -> Result<HandleOutcome, HostError> {
        let parsed = parse_raw_http_request(&request.raw_http_request)?;
        let (endpoint, values) = self.registry.dispatch_endpoint(&parsed)?;
        if self.shunt_to_pool(endpoint.cpu_bound) {
            return Ok(HandleOutcome::Cpu);
        }
        let outcome = endpoint
            .instance
            .invoke(&session, &parsed, values, request.settings)
            .await?;
        Ok(HandleOutcome::Io(normalize(outcome)))
    }

    // --- oauth -------------------------------------------------------------

    pub async fn oauth_authorization_url(
        &self,
        _session: Session,
        request: OAuthGetAuthorizationUrlRequest,
    ) -> Result<HandleOutcome, HostError> {
        let provider = self.registry.oauth_provider(&request.provider).ok_or_else(|| {
            HostError::NotFound { kind: "oauth provider", name: request.provider.clone() }
        })?;
        let url = provider.authorization_url(&request.redirect_uri, &request.system_credentials)?;
        Ok(single(json!({"authorizationUrl": url})))
    }

    pub async fn oauth_credentials(
        &self,
        _session: Session,
        request: OAuthGetCredentialsRequest,
    ) -> Result<HandleOutcome, HostError> {
        let provider = self.registry.oauth_provider(&request.provider).ok_or_else(|| {
            HostError::NotFound { kind: "oauth provider", name: request.provider.clone() }
        })?;
        let parsed = parse_raw_http_request(&request.raw_http_request)?;
        let credentials = provider
            .credentials(&request.redirect_uri, &request.system_credentials, &parsed)
            .await?;
        Ok(single(serde_json::to_value(credentials)?))
    }

    pub async fn oauth_refresh(
        &self,
        _session: Session,
        request: OAuthRefreshCredentialsRequest,
    ) -> Result<HandleOutcome, HostError> {
        let provider = self.registry.oauth_provider(&request.provider).ok_or_else(|| {
            HostError::NotFound { kind: "oauth provider", name: request.provider.clone() }
        })?;
        let refreshed = provider
            .refresh(&request.redirect_uri, &request.system_credentials, &request.credentials)
            .await?;
        Ok(single(serde_json::to_value(refreshed)?))
    }
}
