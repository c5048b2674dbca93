//! Capability protocol
//!
//! The contract every capability provider satisfies (operation catalog,
//! resource catalog, invocation, resource reads) and the registry that
//! aggregates providers and routes calls to them by name.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ProviderError;

/// One parameter of an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    pub required: bool,
}

/// A named, schema-described callable action a provider exposes.
/// Immutable once published; the catalog does not change at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
}

impl OperationDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Add an optional parameter.
    pub fn param(
        mut self,
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: false,
        });
        self
    }

    /// Add a required parameter.
    pub fn required(
        mut self,
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: true,
        });
        self
    }
}

/// A named, URI-addressed readable context blob a provider exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    pub uri: String,
    pub description: String,
    pub mime_type: String,
}

impl ResourceDescriptor {
    pub fn new(
        name: impl Into<String>,
        uri: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            description: description.into(),
            mime_type: "text/plain".to_string(),
        }
    }
}

/// Tool schema in the shape the completion provider expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Contract every capability provider must satisfy.
///
/// Providers are free-form domain logic behind this interface; the agent
/// only ever sees catalogs, invocations and resource reads.
pub trait CapabilityProvider: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn list_operations(&self) -> Vec<OperationDescriptor>;

    /// Execute an operation. Fails with `OperationNotFound` for names the
    /// provider does not publish and `InvalidArguments` for missing or
    /// malformed required parameters.
    fn invoke(
        &self,
        operation: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    fn list_resources(&self) -> Vec<ResourceDescriptor>;

    /// Read a resource by URI. Fails with `ResourceNotFound` for URIs the
    /// provider does not publish.
    fn read_resource(&self, uri: &str) -> Result<String, ProviderError>;
}

/// Holds providers by name and routes operation and resource requests to
/// the first provider (in registration order) that publishes the name.
///
/// Constructed once at startup and handed to the agent; there is no
/// ambient global registry.
#[derive(Default)]
pub struct Registry {
    providers: Vec<Arc<dyn CapabilityProvider>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Re-registering a name replaces the previous
    /// provider in place, keeping its original position in the scan order.
    pub fn register(&mut self, provider: Arc<dyn CapabilityProvider>) {
        if let Some(slot) = self
            .providers
            .iter_mut()
            .find(|p| p.name() == provider.name())
        {
            *slot = provider;
        } else {
            self.providers.push(provider);
        }
    }

    /// Names of registered providers, in registration order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn provider(&self, name: &str) -> Option<&Arc<dyn CapabilityProvider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Every registered provider's catalog, concatenated in registration
    /// order. No de-duplication.
    pub fn list_operations(&self) -> Vec<OperationDescriptor> {
        self.providers
            .iter()
            .flat_map(|p| p.list_operations())
            .collect()
    }

    pub fn list_resources(&self) -> Vec<ResourceDescriptor> {
        self.providers
            .iter()
            .flat_map(|p| p.list_resources())
            .collect()
    }

    /// Route an invocation to the first provider whose catalog contains
    /// the operation name.
    pub fn invoke(
        &self,
        operation: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        for provider in &self.providers {
            if provider.list_operations().iter().any(|op| op.name == operation) {
                return provider.invoke(operation, arguments);
            }
        }
        Err(ProviderError::OperationNotFound(operation.to_string()))
    }

    /// Route a resource read to the first provider that publishes the URI.
    pub fn read_resource(&self, uri: &str) -> Result<String, ProviderError> {
        for provider in &self.providers {
            if provider.list_resources().iter().any(|r| r.uri == uri) {
                return provider.read_resource(uri);
            }
        }
        Err(ProviderError::ResourceNotFound(uri.to_string()))
    }

    /// Read every resource from every provider and concatenate the results
    /// as titled sections. A failing read is logged and skipped; this feeds
    /// a best-effort prompt section, never a correctness-critical path.
    pub fn aggregate_context(&self) -> String {
        let mut sections = Vec::new();
        for provider in &self.providers {
            for resource in provider.list_resources() {
                match provider.read_resource(&resource.uri) {
                    Ok(content) if !content.is_empty() => {
                        sections.push(format!("## {}\n{}", resource.name, content));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("skipping resource {}: {}", resource.uri, e);
                    }
                }
            }
        }
        sections.join("\n\n")
    }

    /// Map every operation descriptor to the tool-schema shape the
    /// completion provider expects. Pure transform, no side effects.
    pub fn export_for_model(&self) -> Vec<ToolDefinition> {
        self.list_operations()
            .into_iter()
            .map(|op| {
                let mut properties = serde_json::Map::new();
                for p in &op.parameters {
                    properties.insert(
                        p.name.clone(),
                        serde_json::json!({
                            "type": p.param_type,
                            "description": p.description,
                        }),
                    );
                }
                let required: Vec<&str> = op
                    .parameters
                    .iter()
                    .filter(|p| p.required)
                    .map(|p| p.name.as_str())
                    .collect();

                let mut schema = serde_json::json!({
                    "type": "object",
                    "properties": properties,
                });
                if !required.is_empty() {
                    schema["required"] = serde_json::json!(required);
                }

                ToolDefinition {
                    name: op.name,
                    description: op.description,
                    input_schema: schema,
                }
            })
            .collect()
    }
}
