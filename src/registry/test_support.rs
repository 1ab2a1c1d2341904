//! Shared test fixtures: a small plugin bundle on disk plus the matching
//! statically-registered plugin set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::error::HostError;
use crate::registry::capability::{
    AgentRuntime, AgentStrategy, AiModel, DynamicSelect, Endpoint, LargeLanguageModel,
    ModelInstance, ModelProvider, OAuthCredentials, OAuthProvider, Outcome, PluginOutput,
    PluginSet, Tool, ToolProvider, ToolRuntime, TtsModel,
};
use crate::registry::path::HttpRequest;
use crate::request::{LlmInvokeRequest, LlmNumTokensRequest, TtsInvokeRequest};
use crate::session::Session;

pub struct EchoProvider;

#[async_trait]
impl ToolProvider for EchoProvider {
    async fn validate_credentials(&self, credentials: Value) -> Result<(), HostError> {
        if credentials.get("api_key").is_some() {
            Ok(())
        } else {
            Err(HostError::implementation("missing api_key"))
        }
    }

    fn as_oauth(&self) -> Option<&dyn OAuthProvider> {
        Some(self)
    }
}

#[async_trait]
impl OAuthProvider for EchoProvider {
    fn authorization_url(
        &self,
        redirect_uri: &str,
        _system_credentials: &Value,
    ) -> Result<String, HostError> {
        Ok(format!("https://auth.example/start?redirect={redirect_uri}"))
    }

    async fn credentials(
        &self,
        _redirect_uri: &str,
        _system_credentials: &Value,
        request: &HttpRequest,
    ) -> Result<OAuthCredentials, HostError> {
        Ok(OAuthCredentials {
            metadata: json!({"query": request.query}),
            credentials: json!({"access_token": "tok-1"}),
            expires_at: Some(1_900_000_000),
        })
    }

    async fn refresh(
        &self,
        _redirect_uri: &str,
        _system_credentials: &Value,
        _credentials: &Value,
    ) -> Result<OAuthCredentials, HostError> {
        Ok(OAuthCredentials {
            metadata: json!({}),
            credentials: json!({"access_token": "tok-2"}),
            expires_at: Some(1_900_000_999),
        })
    }
}

pub struct FastTool;

#[async_trait]
impl Tool for FastTool {
    async fn invoke(
        &self,
        _session: &Session,
        _runtime: &ToolRuntime,
        parameters: Value,
    ) -> Result<Outcome, HostError> {
        if parameters.get("fail").is_some() {
            return Err(HostError::implementation("tool exploded"));
        }
        Ok(Outcome::json(json!("ok")))
    }

    fn as_dynamic_select(&self) -> Option<&dyn DynamicSelect> {
        Some(self)
    }
}

#[async_trait]
impl DynamicSelect for FastTool {
    async fn fetch_parameter_options(
        &self,
        _runtime: &ToolRuntime,
        parameter: &str,
    ) -> Result<Value, HostError> {
        Ok(json!([
            {"value": format!("{parameter}-a"), "label": "A"},
            {"value": format!("{parameter}-b"), "label": "B"},
        ]))
    }
}

pub struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    async fn invoke(
        &self,
        _session: &Session,
        _runtime: &ToolRuntime,
        _parameters: Value,
    ) -> Result<Outcome, HostError> {
        Ok(Outcome::json(json!("slow")))
    }
}

pub struct DemoModelProvider;

#[async_trait]
impl ModelProvider for DemoModelProvider {
    async fn validate_provider_credentials(&self, _credentials: Value) -> Result<(), HostError> {
        Ok(())
    }
}

pub struct StubLlm;

#[async_trait]
impl AiModel for StubLlm {
    async fn validate_credentials(&self, _model: &str, _credentials: Value) -> Result<(), HostError> {
        Ok(())
    }

    async fn model_schema(&self, model: &str, _credentials: Value) -> Result<Value, HostError> {
        Ok(json!({"model": model, "features": ["chat"]}))
    }
}

#[async_trait]
impl LargeLanguageModel for StubLlm {
    async fn invoke(&self, _request: &LlmInvokeRequest) -> Result<Outcome, HostError> {
        let chunks = vec![
            Ok(PluginOutput::Json(json!({"delta": "he"}))),
            Ok(PluginOutput::Json(json!({"delta": "llo"}))),
        ];
        Ok(Outcome::stream(Box::pin(stream::iter(chunks))))
    }

    async fn num_tokens(&self, request: &LlmNumTokensRequest) -> Result<u64, HostError> {
        Ok(request.prompt_messages.len() as u64 * 7)
    }
}

pub struct StubTts;

#[async_trait]
impl AiModel for StubTts {
    async fn validate_credentials(&self, _model: &str, _credentials: Value) -> Result<(), HostError> {
        Ok(())
    }
}

#[async_trait]
impl TtsModel for StubTts {
    async fn invoke(&self, _request: &TtsInvokeRequest) -> Result<Outcome, HostError> {
        let chunks = vec![
            Ok(PluginOutput::Blob(vec![0x01, 0x02, 0x03])),
            Ok(PluginOutput::Blob(vec![0xaa, 0xbb])),
        ];
        Ok(Outcome::stream(Box::pin(stream::iter(chunks))))
    }
}

pub struct StubModeration;

#[async_trait]
impl AiModel for StubModeration {
    async fn validate_credentials(&self, _model: &str, credentials: Value) -> Result<(), HostError> {
        if credentials.get("api_key").is_some() {
            Ok(())
        } else {
            Err(HostError::implementation("missing api_key"))
        }
    }

    async fn model_schema(&self, model: &str, _credentials: Value) -> Result<Value, HostError> {
        Ok(json!({"model": model, "features": ["moderation"]}))
    }
}

pub struct ReactStrategy;

#[async_trait]
impl AgentStrategy for ReactStrategy {
    async fn invoke(
        &self,
        _session: &Session,
        _runtime: &AgentRuntime,
        _parameters: Value,
    ) -> Result<Outcome, HostError> {
        Ok(Outcome::json(json!(["step1", "step2"])))
    }
}

pub struct AllItems;

#[async_trait]
impl Endpoint for AllItems {
    async fn invoke(
        &self,
        _session: &Session,
        _request: &HttpRequest,
        _values: HashMap<String, String>,
        _settings: Value,
    ) -> Result<Outcome, HostError> {
        Ok(Outcome::json(json!({"route": "all"})))
    }
}

pub struct ItemById;

#[async_trait]
impl Endpoint for ItemById {
    async fn invoke(
        &self,
        _session: &Session,
        _request: &HttpRequest,
        values: HashMap<String, String>,
        _settings: Value,
    ) -> Result<Outcome, HostError> {
        Ok(Outcome::json(json!({"id": values.get("id")})))
    }
}

pub fn test_plugin_set() -> PluginSet {
    let mut set = PluginSet::new();
    set.register_tool_provider("demo_tools", "EchoProvider", false, || Arc::new(EchoProvider));
    set.register_tool("demo_tools", "FastTool", true, || Arc::new(FastTool));
    set.register_tool("demo_tools", "SlowTool", false, || Arc::new(SlowTool));

    set.register_model_provider("demo_models", "DemoModelProvider", false, || {
        Arc::new(DemoModelProvider)
    });
    set.register_model("demo_models", "StubLlm", || ModelInstance::Llm(Arc::new(StubLlm)));
    set.register_model("demo_models", "StubTts", || ModelInstance::Tts(Arc::new(StubTts)));
    set.register_model("demo_models", "StubModeration", || {
        ModelInstance::Moderation(Arc::new(StubModeration))
    });

    set.register_agent_strategy("demo_agents", "ReactStrategy", false, || {
        Arc::new(ReactStrategy)
    });

    set.register_endpoint("demo_endpoints", "AllItems", false, || Arc::new(AllItems));
    set.register_endpoint("demo_endpoints", "ItemById", false, || Arc::new(ItemById));
    set
}

/// Writes a complete bundle (manifest plus declarations) into a temp dir.
pub fn fixture_bundle() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let write = |name: &str, body: &str| std::fs::write(dir.path().join(name), body).unwrap();

    write(
        "manifest.yaml",
        r#"
plugins:
  tools:
    - tool-provider.yaml
  models:
    - model-provider.yaml
  agentStrategies:
    - agents.yaml
  endpoints:
    - endpoints.yaml
"#,
    );

    write(
        "tool-provider.yaml",
        r#"
identity:
  name: p1
credentialsForProvider:
  - name: api_key
    required: true
implementation:
  module: demo_tools
  class: EchoProvider
tools:
  - tool-t1.yaml
  - tool-heavy.yaml
"#,
    );

    write(
        "tool-t1.yaml",
        r#"
identity:
  name: t1
implementation:
  module: demo_tools
"#,
    );

    write(
        "tool-heavy.yaml",
        r#"
identity:
  name: t-heavy
implementation:
  module: demo_tools
  class: SlowTool
  cpu_bound: true
"#,
    );

    write(
        "model-provider.yaml",
        r#"
provider: m1
implementation:
  module: demo_models
  class: DemoModelProvider
modelModules:
  - demo_models
"#,
    );

    write(
        "agents.yaml",
        r#"
identity:
  name: agents
strategies:
  - identity:
      name: react
    implementation:
      module: demo_agents
      class: ReactStrategy
"#,
    );

    write(
        "endpoints.yaml",
        r#"
endpoints:
  - ep-items-all.yaml
  - ep-item-by-id.yaml
  - ep-items-internal.yaml
"#,
    );

    write(
        "ep-items-all.yaml",
        r#"
path: /items/all
method: GET
implementation:
  module: demo_endpoints
  class: AllItems
"#,
    );

    write(
        "ep-item-by-id.yaml",
        r#"
path: /items/:id
method: GET
implementation:
  module: demo_endpoints
  class: ItemById
"#,
    );

    write(
        "ep-items-internal.yaml",
        r#"
path: /items/internal
method: GET
hidden: true
implementation:
  module: demo_endpoints
  class: AllItems
"#,
    );

    dir
}
