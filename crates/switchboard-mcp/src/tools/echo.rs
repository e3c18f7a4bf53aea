//! Tool echo: Return the given text unchanged.

use async_trait::async_trait;
use serde_json::{Map, Value};
use switchboard::{InputSchema, Parameter};

use crate::render::RenderContext;

use super::Tool;

pub struct Echo {
    schema: InputSchema,
}

impl Echo {
    pub fn new() -> Self {
        Self {
            schema: InputSchema::new().param(
                Parameter::string("text")
                    .required()
                    .description("Text to echo back"),
            ),
        }
    }
}

impl Default for Echo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text back"
    }

    fn schema(&self) -> &InputSchema {
        &self.schema
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn call(&self, args: Map<String, Value>, ctx: &RenderContext) -> anyhow::Result<()> {
        let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
        ctx.text(text)
    }
}
