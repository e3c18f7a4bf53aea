//! Prompt code_review: Ask for a review of a code snippet.

use async_trait::async_trait;
use serde_json::{Map, Value};
use switchboard::{InputSchema, Parameter};

use crate::render::{Render, RenderContext};
use crate::types::Role;

use super::Prompt;

pub struct CodeReview {
    schema: InputSchema,
}

impl CodeReview {
    pub fn new() -> Self {
        Self {
            schema: InputSchema::new()
                .param(
                    Parameter::string("code")
                        .required()
                        .length(1, 100_000)
                        .description("Code to review"),
                )
                .param(
                    Parameter::string("language")
                        .description("Language of the code, used for the fence and focus"),
                ),
        }
    }
}

impl Default for CodeReview {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prompt for CodeReview {
    fn name(&self) -> &str {
        "code_review"
    }

    fn description(&self) -> &str {
        "Review a code snippet for bugs and readability"
    }

    fn schema(&self) -> &InputSchema {
        &self.schema
    }

    async fn render(&self, args: Map<String, Value>, ctx: &RenderContext) -> anyhow::Result<()> {
        let code = args.get("code").and_then(Value::as_str).unwrap_or_default();
        let language = args.get("language").and_then(Value::as_str);

        let focus = match language {
            Some(lang) => format!("Focus on idiomatic {lang} and point out anything unsafe."),
            None => "Point out bugs first, then readability issues.".to_string(),
        };

        ctx.say(
            Role::User,
            Render::Text(format!(
                "Please review this code.\n\n```{}\n{code}\n```\n\n{focus}",
                language.unwrap_or("")
            )),
        )?;
        ctx.say(
            Role::Assistant,
            Render::Text(
                "I'll go through it section by section and list concrete changes.".to_string(),
            ),
        )
    }
}
