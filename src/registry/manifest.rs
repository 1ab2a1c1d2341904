//! YAML manifest and declaration types.
//!
//! The manifest at `<base_dir>/manifest.yaml` lists declaration file paths
//! per capability category; every path in a declaration is resolved relative
//! to the manifest. Each declaration carries identity, a credential schema
//! passed through verbatim, and an implementation block naming the registered
//! module (and optionally a class within it).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::error::HostError;

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub plugins: ManifestPlugins,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManifestPlugins {
    pub tools: Vec<PathBuf>,
    pub models: Vec<PathBuf>,
    pub endpoints: Vec<PathBuf>,
    pub agent_strategies: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub name: String,
    pub author: Option<String>,
    pub label: Option<Value>,
    pub description: Option<Value>,
}

/// Binding from a declaration to a registered module.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Implementation {
    pub module: String,
    pub class: Option<String>,
    pub cpu_bound: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolProviderDeclaration {
    pub identity: Identity,
    #[serde(default)]
    pub credentials_for_provider: Value,
    #[serde(default)]
    pub oauth_schema: Option<Value>,
    pub implementation: Implementation,
    /// Paths to the provider's tool declarations, relative to the manifest.
    #[serde(default)]
    pub tools: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDeclaration {
    pub identity: Identity,
    #[serde(default)]
    pub parameters: Value,
    pub implementation: Implementation,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProviderDeclaration {
    pub provider: String,
    #[serde(default)]
    pub label: Option<Value>,
    #[serde(default)]
    pub credential_schema: Value,
    /// Provider class binding; model classes come from `model_modules`.
    pub implementation: Implementation,
    /// Modules whose model exports are all instantiated and keyed by
    /// modality.
    #[serde(default)]
    pub model_modules: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStrategyProviderDeclaration {
    pub identity: Identity,
    #[serde(default)]
    pub strategies: Vec<AgentStrategyDeclaration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStrategyDeclaration {
    pub identity: Identity,
    #[serde(default)]
    pub parameters: Value,
    pub implementation: Implementation,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointProviderDeclaration {
    #[serde(default)]
    pub settings: Value,
    /// Paths to individual endpoint declarations.
    #[serde(default)]
    pub endpoints: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDeclaration {
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub hidden: bool,
    pub implementation: Implementation,
}

/// Loads one YAML file into a declaration type; failures name the file.
pub fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, HostError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| HostError::registry(path, format!("read failed: {e}")))?;
    serde_yaml_bw::from_str(&text).map_err(|e| HostError::registry(path, e.to_string()))
}

/// Resolves a declaration-relative path against the file that referenced it.
pub fn resolve_from(base_file: &Path, relative: &Path) -> PathBuf {
    match base_file.parent() {
        Some(dir) => dir.join(relative),
        None => relative.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_a_manifest() {
        let manifest: Manifest = serde_yaml_bw::from_str(
            r#"
plugins:
  tools:
    - providers/search.yaml
  agentStrategies:
    - agents/react.yaml
"#,
        )
        .unwrap();
        assert_eq!(manifest.plugins.tools, vec![PathBuf::from("providers/search.yaml")]);
        assert!(manifest.plugins.models.is_empty());
        assert_eq!(manifest.plugins.agent_strategies.len(), 1);
    }

    #[test]
    fn parses_a_tool_provider_declaration() {
        let decl: ToolProviderDeclaration = serde_yaml_bw::from_str(
            r#"
identity:
  name: search
  author: acme
credentialsForProvider:
  - name: api_key
    required: true
implementation:
  module: search_mod
  class: SearchProvider
tools:
  - tools/web-search.yaml
"#,
        )
        .unwrap();
        assert_eq!(decl.identity.name, "search");
        assert_eq!(decl.implementation.class.as_deref(), Some("SearchProvider"));
        assert!(!decl.implementation.cpu_bound);
    }

    #[test]
    fn load_yaml_errors_name_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "identity: [not, a, mapping").unwrap();
        let err = load_yaml::<ToolDeclaration>(file.path()).unwrap_err();
        assert_eq!(err.error_type(), "RegistryError");
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn resolve_from_is_manifest_relative() {
        let resolved = resolve_from(
            Path::new("/opt/plugin/manifest.yaml"),
            Path::new("providers/search.yaml"),
        );
        assert_eq!(resolved, PathBuf::from("/opt/plugin/providers/search.yaml"));
    }
}
