//! MCP prompt implementations.

pub mod code_review;
pub mod registry;
pub mod story_outline;

use async_trait::async_trait;
use serde_json::{Map, Value};
use switchboard::{InputSchema, Named};

use crate::render::RenderContext;
use crate::types::{PromptArgument, PromptDefinition};

pub use registry::PromptRegistry;

/// A prompt template. Each render becomes one prompt message.
#[async_trait]
pub trait Prompt: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn schema(&self) -> &InputSchema;

    async fn render(&self, args: Map<String, Value>, ctx: &RenderContext) -> anyhow::Result<()>;

    fn definition(&self) -> PromptDefinition {
        let arguments: Vec<PromptArgument> = self
            .schema()
            .params()
            .iter()
            .map(|p| PromptArgument {
                name: p.name.clone(),
                description: p.description.clone(),
                required: p.required,
            })
            .collect();
        PromptDefinition {
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            arguments: (!arguments.is_empty()).then_some(arguments),
        }
    }
}

impl Named for dyn Prompt {
    fn name(&self) -> &str {
        Prompt::name(self)
    }
}
