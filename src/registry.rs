//! Manifest-driven capability registry.
//!
//! `PluginRegistry::load` reads the manifest, loads every declaration file it
//! names and resolves each implementation block against the statically-typed
//! [`PluginSet`]. Resolution is all-or-nothing: any missing module, class or
//! unreadable file aborts construction with an error naming the offending
//! file. The resulting tables are immutable for the life of the process.

pub mod capability;
pub mod manifest;
pub mod path;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use std::sync::Arc;

use tracing::info;

use crate::config::HostConfig;
use crate::error::HostError;
use crate::registry::capability::{
    AgentStrategy, ClassExport, ClassFactory, Endpoint, ModelInstance, ModelProvider, OAuthProvider,
    PluginSet, Tool, ToolProvider,
};
use crate::registry::manifest::{
    AgentStrategyProviderDeclaration, EndpointDeclaration, EndpointProviderDeclaration,
    Implementation, Manifest, ModelProviderDeclaration, ToolDeclaration, ToolProviderDeclaration,
    load_yaml, resolve_from,
};
use crate::registry::path::{HttpRequest, PathTemplate};
use crate::request::ModelKind;

pub struct ToolRegistration {
    pub declaration: ToolDeclaration,
    pub instance: Arc<dyn Tool>,
    pub cpu_bound: bool,
}

pub struct ToolProviderRegistration {
    pub declaration: ToolProviderDeclaration,
    pub instance: Arc<dyn ToolProvider>,
    pub tools: HashMap<String, ToolRegistration>,
}

pub struct ModelProviderRegistration {
    pub declaration: ModelProviderDeclaration,
    pub instance: Arc<dyn ModelProvider>,
    pub models: HashMap<ModelKind, ModelInstance>,
    pub cpu_bound: bool,
}

pub struct AgentStrategyRegistration {
    pub instance: Arc<dyn AgentStrategy>,
    pub cpu_bound: bool,
}

pub struct AgentProviderRegistration {
    pub declaration: AgentStrategyProviderDeclaration,
    pub strategies: HashMap<String, AgentStrategyRegistration>,
}

pub struct EndpointRegistration {
    pub template: PathTemplate,
    pub method: String,
    pub hidden: bool,
    pub instance: Arc<dyn Endpoint>,
    pub cpu_bound: bool,
}

impl std::fmt::Debug for EndpointRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointRegistration")
            .field("template", &self.template)
            .field("method", &self.method)
            .field("hidden", &self.hidden)
            .field("cpu_bound", &self.cpu_bound)
            .finish_non_exhaustive()
    }
}

/// A file loaded from the plugin bundle's `_assets` directory.
pub struct PluginAsset {
    pub filename: String,
    pub data: Vec<u8>,
}

pub struct PluginRegistry {
    tool_providers: HashMap<String, ToolProviderRegistration>,
    model_providers: HashMap<String, ModelProviderRegistration>,
    agent_providers: HashMap<String, AgentProviderRegistration>,
    /// Sorted once at load: fewest params first, longest template on ties, so
    /// `/a/b` always beats `/a/:id`.
    endpoints: Vec<EndpointRegistration>,
    assets: Vec<PluginAsset>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("tool_providers", &self.tool_providers.keys().collect::<Vec<_>>())
            .field("model_providers", &self.model_providers.keys().collect::<Vec<_>>())
            .field("agent_providers", &self.agent_providers.keys().collect::<Vec<_>>())
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl PluginRegistry {
    pub fn load(config: &HostConfig, set: &PluginSet) -> Result<Self, HostError> {
        let manifest_path = config.base_dir.join("manifest.yaml");
        let manifest: Manifest = load_yaml(&manifest_path)?;

        let mut registry = Self {
            tool_providers: HashMap::new(),
            model_providers: HashMap::new(),
            agent_providers: HashMap::new(),
            endpoints: Vec::new(),
            assets: Vec::new(),
        };

        for decl_path in &manifest.plugins.tools {
            let file = resolve_from(&manifest_path, decl_path);
            registry.load_tool_provider(&manifest_path, &file, set)?;
        }
        for decl_path in &manifest.plugins.models {
            let file = resolve_from(&manifest_path, decl_path);
            registry.load_model_provider(&file, set)?;
        }
        for decl_path in &manifest.plugins.agent_strategies {
            let file = resolve_from(&manifest_path, decl_path);
            registry.load_agent_provider(&file, set)?;
        }
        for decl_path in &manifest.plugins.endpoints {
            let file = resolve_from(&manifest_path, decl_path);
            registry.load_endpoint_provider(&manifest_path, &file, set)?;
        }

        registry.endpoints.sort_by(|a, b| {
            a.template
                .param_count()
                .cmp(&b.template.param_count())
                .then(b.template.raw().len().cmp(&a.template.raw().len()))
        });

        registry.load_assets(&manifest_path)?;
        registry.log_registry();
        Ok(registry)
    }

    fn load_tool_provider(
        &mut self,
        manifest_path: &Path,
        file: &PathBuf,
        set: &PluginSet,
    ) -> Result<(), HostError> {
        let declaration: ToolProviderDeclaration = load_yaml(file)?;

        let export = resolve_export(set, file, &declaration.implementation)?;
        let instance = match &export.factory {
            ClassFactory::ToolProvider(f) => f(),
            other => {
                return Err(HostError::registry(
                    file,
                    format!("export '{}' is a {}, expected a tool provider", export.name, other.kind()),
                ));
            }
        };

        let mut tools = HashMap::new();
        for tool_path in &declaration.tools {
            let tool_file = resolve_from(manifest_path, tool_path);
            let tool_decl: ToolDeclaration = load_yaml(&tool_file)?;
            let tool_export = resolve_export(set, &tool_file, &tool_decl.implementation)?;
            let tool_instance = match &tool_export.factory {
                ClassFactory::Tool(f) => f(),
                other => {
                    return Err(HostError::registry(
                        &tool_file,
                        format!("export '{}' is a {}, expected a tool", tool_export.name, other.kind()),
                    ));
                }
            };
            tools.insert(
                tool_decl.identity.name.clone(),
                ToolRegistration {
                    cpu_bound: tool_decl.implementation.cpu_bound,
                    declaration: tool_decl,
                    instance: tool_instance,
                },
            );
        }

        self.tool_providers.insert(
            declaration.identity.name.clone(),
            ToolProviderRegistration { declaration, instance, tools },
        );
        Ok(())
    }

    fn load_model_provider(&mut self, file: &PathBuf, set: &PluginSet) -> Result<(), HostError> {
        let declaration: ModelProviderDeclaration = load_yaml(file)?;

        let export = resolve_export(set, file, &declaration.implementation)?;
        let instance = match &export.factory {
            ClassFactory::ModelProvider(f) => f(),
            other => {
                return Err(HostError::registry(
                    file,
                    format!("export '{}' is a {}, expected a model provider", export.name, other.kind()),
                ));
            }
        };

        // every model export of every listed module, keyed by modality
        let mut models = HashMap::new();
        for module in &declaration.model_modules {
            let exports = set.exports(module).ok_or_else(|| {
                HostError::registry(file, format!("module not registered: {module}"))
            })?;
            let mut found = false;
            for export in exports {
                if let ClassFactory::Model(f) = &export.factory {
                    let model = f();
                    models.insert(model.kind(), model);
                    found = true;
                }
            }
            if !found {
                return Err(HostError::registry(
                    file,
                    format!("module '{module}' registers no model classes"),
                ));
            }
        }

        self.model_providers.insert(
            declaration.provider.clone(),
            ModelProviderRegistration {
                cpu_bound: declaration.implementation.cpu_bound,
                declaration,
                instance,
                models,
            },
        );
        Ok(())
    }

    fn load_agent_provider(&mut self, file: &PathBuf, set: &PluginSet) -> Result<(), HostError> {
        let declaration: AgentStrategyProviderDeclaration = load_yaml(file)?;

        let mut strategies = HashMap::new();
        for strategy in &declaration.strategies {
            let export = resolve_export(set, file, &strategy.implementation)?;
            let instance = match &export.factory {
                ClassFactory::AgentStrategy(f) => f(),
                other => {
                    return Err(HostError::registry(
                        file,
                        format!("export '{}' is a {}, expected an agent strategy", export.name, other.kind()),
                    ));
                }
            };
            strategies.insert(
                strategy.identity.name.clone(),
                AgentStrategyRegistration {
                    instance,
                    cpu_bound: strategy.implementation.cpu_bound,
                },
            );
        }

        self.agent_providers.insert(
            declaration.identity.name.clone(),
            AgentProviderRegistration { declaration, strategies },
        );
        Ok(())
    }

    fn load_endpoint_provider(
        &mut self,
        manifest_path: &Path,
        file: &PathBuf,
        set: &PluginSet,
    ) -> Result<(), HostError> {
        let declaration: EndpointProviderDeclaration = load_yaml(file)?;

        for endpoint_path in &declaration.endpoints {
            let endpoint_file = resolve_from(manifest_path, endpoint_path);
            let endpoint_decl: EndpointDeclaration = load_yaml(&endpoint_file)?;
            let export = resolve_export(set, &endpoint_file, &endpoint_decl.implementation)?;
            let instance = match &export.factory {
                ClassFactory::Endpoint(f) => f(),
                other => {
                    return Err(HostError::registry(
                        &endpoint_file,
                        format!("export '{}' is a {}, expected an endpoint", export.name, other.kind()),
                    ));
                }
            };
            self.endpoints.push(EndpointRegistration {
                template: PathTemplate::parse(&endpoint_decl.path),
                method: endpoint_decl.method.to_uppercase(),
                hidden: endpoint_decl.hidden,
                instance,
                cpu_bound: endpoint_decl.implementation.cpu_bound,
            });
        }
        Ok(())
    }

    fn load_assets(&mut self, manifest_path: &Path) -> Result<(), HostError> {
        let assets_dir = resolve_from(manifest_path, Path::new("_assets"));
        if !assets_dir.exists() {
            return Ok(());
        }
        let entries = std::fs::read_dir(&assets_dir)
            .map_err(|e| HostError::registry(&assets_dir, format!("read failed: {e}")))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| HostError::registry(&assets_dir, format!("read failed: {e}")))?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                let data = std::fs::read(entry.path())
                    .map_err(|e| HostError::registry(entry.path(), format!("read failed: {e}")))?;
                self.assets.push(PluginAsset {
                    filename: entry.file_name().to_string_lossy().into_owned(),
                    data,
                });
            }
        }
        Ok(())
    }

    fn log_registry(&self) {
        for name in self.tool_providers.keys() {
            info!("installed tool provider: {name}");
        }
        for name in self.model_providers.keys() {
            info!("installed model provider: {name}");
        }
        for name in self.agent_providers.keys() {
            info!("installed agent strategy provider: {name}");
        }
        for endpoint in self.visible_endpoints() {
            info!("installed endpoint: {} {}", endpoint.method, endpoint.template.raw());
        }
        if !self.assets.is_empty() {
            info!("loaded {} asset file(s)", self.assets.len());
        }
    }

    pub fn tool_provider(&self, provider: &str) -> Option<&ToolProviderRegistration> {
        self.tool_providers.get(provider)
    }

    pub fn tool(&self, provider: &str, tool: &str) -> Option<&ToolRegistration> {
        self.tool_providers.get(provider)?.tools.get(tool)
    }

    pub fn model_provider(&self, provider: &str) -> Option<&ModelProviderRegistration> {
        self.model_providers.get(provider)
    }

    pub fn model(&self, provider: &str, kind: ModelKind) -> Option<&ModelInstance> {
        self.model_providers.get(provider)?.models.get(&kind)
    }

    pub fn agent_strategy(
        &self,
        provider: &str,
        strategy: &str,
    ) -> Option<&AgentStrategyRegistration> {
        self.agent_providers.get(provider)?.strategies.get(strategy)
    }

    /// OAuth flows resolve through the tool-provider table; a provider that
    /// does not opt in simply has no OAuth surface.
    pub fn oauth_provider(&self, provider: &str) -> Option<&dyn OAuthProvider> {
        self.tool_providers.get(provider)?.instance.as_oauth()
    }

    pub fn assets(&self) -> &[PluginAsset] {
        &self.assets
    }

    /// Endpoints for listings; hidden registrations stay dispatchable but are
    /// never advertised.
    pub fn visible_endpoints(&self) -> impl Iterator<Item = &EndpointRegistration> {
        self.endpoints.iter().filter(|e| !e.hidden)
    }

    /// Finds the endpoint for a request. Method must match and the template
    /// must cover the full path; the pre-sorted table makes literal routes
    /// win over parameterized ones.
    pub fn dispatch_endpoint(
        &self,
        request: &HttpRequest,
    ) -> Result<(&EndpointRegistration, HashMap<String, String>), HostError> {
        for endpoint in &self.endpoints {
            if !endpoint.method.eq_ignore_ascii_case(&request.method) {
                continue;
            }
            if let Some(values) = endpoint.template.matches(&request.path) {
                return Ok((endpoint, values));
            }
        }
        Err(HostError::UnmappedEndpoint {
            method: request.method.clone(),
            path: request.path.clone(),
        })
    }
}

/// Exact class-name match first, then the module's default export.
fn resolve_export<'a>(
    set: &'a PluginSet,
    file: &Path,
    implementation: &Implementation,
) -> Result<&'a ClassExport, HostError> {
    let exports = set.exports(&implementation.module).ok_or_else(|| {
        HostError::registry(file, format!("module not registered: {}", implementation.module))
    })?;

    if let Some(class) = &implementation.class
        && let Some(export) = exports.iter().find(|e| &e.name == class)
    {
        return Ok(export);
    }

    exports.iter().find(|e| e.default).ok_or_else(|| {
        HostError::registry(
            file,
            format!(
                "no matching class export in module '{}' (class: {:?})",
                implementation.module, implementation.class
            ),
        )
    })
}


#[cfg(test)]
pub(crate) mod test_support;
