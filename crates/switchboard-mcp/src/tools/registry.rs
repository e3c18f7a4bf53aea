//! Tool registration and lookup.

use std::sync::Arc;

use switchboard::Registry;

use crate::types::{McpError, McpResult, ToolDefinition};

use super::{cargo_dependencies, client_info, count_to, echo, format_coordinates, Tool};

pub struct ToolRegistry {
    inner: Registry<dyn Tool>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            inner: Registry::new("tool"),
        }
    }

    /// Registry holding every bundled tool.
    pub fn bundled() -> McpResult<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(echo::Echo::new()))?;
        registry.register(Arc::new(client_info::ClientInfo::new()))?;
        registry.register(Arc::new(cargo_dependencies::CargoDependencies::new()))?;
        registry.register(Arc::new(format_coordinates::FormatCoordinates::new()))?;
        registry.register(Arc::new(count_to::CountTo::new()))?;
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> McpResult<()> {
        Ok(self.inner.register(tool)?)
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.inner.unregister(name)
    }

    pub fn resolve(&self, name: &str) -> McpResult<Arc<dyn Tool>> {
        self.inner
            .resolve(name)
            .map_err(|_| McpError::ToolNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.names().map(str::to_string).collect()
    }

    /// Definitions in registration order.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.inner.list().iter().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
