//! MCP tool implementations.

pub mod cargo_dependencies;
pub mod client_info;
pub mod count_to;
pub mod echo;
pub mod format_coordinates;
pub mod registry;

use async_trait::async_trait;
use serde_json::{Map, Value};
use switchboard::{InputSchema, Named};

use crate::render::RenderContext;
use crate::types::{ToolAnnotations, ToolDefinition};

pub use registry::ToolRegistry;

/// A callable tool. Arguments arrive already validated against `schema()`,
/// with defaults filled in.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn schema(&self) -> &InputSchema;

    fn read_only(&self) -> bool {
        false
    }

    fn destructive(&self) -> bool {
        false
    }

    async fn call(&self, args: Map<String, Value>, ctx: &RenderContext) -> anyhow::Result<()>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            input_schema: self.schema().to_json_schema(),
            annotations: ToolAnnotations {
                read_only_hint: self.read_only(),
                destructive_hint: self.destructive(),
            },
        }
    }
}

impl Named for dyn Tool {
    fn name(&self) -> &str {
        Tool::name(self)
    }
}
