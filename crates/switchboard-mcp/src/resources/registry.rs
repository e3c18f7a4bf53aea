//! Resource registration and URI dispatch.

use std::sync::Arc;

use switchboard::{Registry, Session};

use crate::types::{
    McpError, McpResult, ReadResourceResult, ResourceDefinition, ResourceTemplateDefinition,
};

use super::{cargo, match_template, session, ResourceTemplate};

pub struct ResourceRegistry {
    inner: Registry<dyn ResourceTemplate>,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Registry::new("resource template"),
        }
    }

    pub fn bundled() -> McpResult<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(cargo::CargoSections::new()))?;
        registry.register(Arc::new(session::CurrentSession))?;
        Ok(registry)
    }

    pub fn register(&mut self, template: Arc<dyn ResourceTemplate>) -> McpResult<()> {
        Ok(self.inner.register(template)?)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Templates that take variables.
    pub fn list_templates(&self) -> Vec<ResourceTemplateDefinition> {
        self.inner
            .list()
            .iter()
            .filter(|t| !t.is_static())
            .map(|t| t.template_definition())
            .collect()
    }

    /// Static resources.
    pub fn list_resources(&self) -> Vec<ResourceDefinition> {
        self.inner
            .list()
            .iter()
            .filter(|t| t.is_static())
            .map(|t| t.resource_definition())
            .collect()
    }

    /// Read `uri` through the first template it matches.
    pub async fn read(&self, uri: &str, session: &Session) -> McpResult<ReadResourceResult> {
        for template in self.inner.list() {
            let Some(vars) = match_template(template.uri_template(), uri) else {
                continue;
            };
            let vars = template
                .schema()
                .validate(Some(&serde_json::Value::Object(vars)))
                .map_err(McpError::InvalidArguments)?;
            let contents = template.read(uri, vars, session).await?;
            return Ok(ReadResourceResult { contents });
        }
        Err(McpError::ResourceNotFound(uri.to_string()))
    }
}
