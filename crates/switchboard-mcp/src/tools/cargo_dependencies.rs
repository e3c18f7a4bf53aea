//! Tool cargo_dependencies: List the crates declared in Cargo.toml.

use async_trait::async_trait;
use serde_json::{Map, Value};
use switchboard::{InputSchema, Parameter};

use crate::render::{Render, RenderContext};
use crate::resources::cargo::{self, DependencySection, SECTION_NAMES};

use super::Tool;

pub struct CargoDependencies {
    schema: InputSchema,
}

impl CargoDependencies {
    pub fn new() -> Self {
        Self {
            schema: InputSchema::new().param(
                Parameter::string("section")
                    .one_of(SECTION_NAMES)
                    .default_value("all")
                    .description("Which dependency section to report"),
            ),
        }
    }
}

impl Default for CargoDependencies {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CargoDependencies {
    fn name(&self) -> &str {
        "cargo_dependencies"
    }

    fn description(&self) -> &str {
        "Report the dependencies declared in the working directory's Cargo.toml, one resource per section"
    }

    fn schema(&self) -> &InputSchema {
        &self.schema
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn call(&self, args: Map<String, Value>, ctx: &RenderContext) -> anyhow::Result<()> {
        let name = args.get("section").and_then(Value::as_str).unwrap_or("all");
        let sections = DependencySection::parse(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown section: {name}"))?;

        let path = cargo::manifest_path();
        let manifest = cargo::read_manifest(&path)?;

        for section in sections {
            ctx.render(Render::Resource(cargo::section_resource(&manifest, section)))?;
        }
        Ok(())
    }
}
