//! Tool count_to: Count slowly to a target, reporting progress along the way.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use switchboard::{InputSchema, Parameter};

use crate::render::RenderContext;

use super::Tool;

pub struct CountTo {
    schema: InputSchema,
}

impl CountTo {
    pub fn new() -> Self {
        Self {
            schema: InputSchema::new()
                .param(
                    Parameter::integer("target")
                        .required()
                        .range(1.0, 1000.0)
                        .description("Number to count to"),
                )
                .param(
                    Parameter::integer("delay_ms")
                        .range(0.0, 5000.0)
                        .default_value(100)
                        .description("Pause between steps in milliseconds"),
                ),
        }
    }
}

impl Default for CountTo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CountTo {
    fn name(&self) -> &str {
        "count_to"
    }

    fn description(&self) -> &str {
        "Count from 1 to a target with a delay between steps; long runs continue as a task"
    }

    fn schema(&self) -> &InputSchema {
        &self.schema
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn call(&self, args: Map<String, Value>, ctx: &RenderContext) -> anyhow::Result<()> {
        let target = args.get("target").and_then(Value::as_f64).unwrap_or(1.0) as u64;
        let delay = args.get("delay_ms").and_then(Value::as_f64).unwrap_or(0.0) as u64;

        for current in 1..=target {
            if delay > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                    _ = ctx.cancelled() => anyhow::bail!("Counting cancelled at {current}"),
                }
            }

            let percent = (current * 100 / target) as u8;
            ctx.progress(percent, format!("Counted {current} of {target}"))
                .await?;
            ctx.checkpoint(json!({ "current": current, "target": target }))
                .await?;
        }

        ctx.text(format!("Counted to {target}"))
    }
}
