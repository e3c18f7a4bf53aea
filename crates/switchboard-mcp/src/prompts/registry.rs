//! Prompt registration and lookup.

use std::sync::Arc;

use switchboard::Registry;

use crate::types::{McpError, McpResult, PromptDefinition};

use super::{code_review, story_outline, Prompt};

pub struct PromptRegistry {
    inner: Registry<dyn Prompt>,
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self {
            inner: Registry::new("prompt"),
        }
    }

    /// Registry holding every bundled prompt.
    pub fn bundled() -> McpResult<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(story_outline::StoryOutline::new()))?;
        registry.register(Arc::new(code_review::CodeReview::new()))?;
        Ok(registry)
    }

    pub fn register(&mut self, prompt: Arc<dyn Prompt>) -> McpResult<()> {
        Ok(self.inner.register(prompt)?)
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Prompt>> {
        self.inner.unregister(name)
    }

    pub fn resolve(&self, name: &str) -> McpResult<Arc<dyn Prompt>> {
        self.inner
            .resolve(name)
            .map_err(|_| McpError::PromptNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.names().map(str::to_string).collect()
    }

    /// Definitions in registration order.
    pub fn list_prompts(&self) -> Vec<PromptDefinition> {
        self.inner.list().iter().map(|p| p.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
