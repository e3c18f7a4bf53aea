//! Resource cargo://{section}: Dependencies declared in the working directory's Cargo.toml.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Map, Value};
use switchboard::{InputSchema, Parameter, Session};

use crate::types::{McpError, McpResult, ResourceContent};

use super::ResourceTemplate;

pub const MANIFEST: &str = "Cargo.toml";

/// A dependency table of a Cargo manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencySection {
    Production,
    Dev,
    Build,
}

impl DependencySection {
    pub const ALL: [DependencySection; 3] = [
        DependencySection::Production,
        DependencySection::Dev,
        DependencySection::Build,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DependencySection::Production => "production",
            DependencySection::Dev => "dev",
            DependencySection::Build => "build",
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            DependencySection::Production => "dependencies",
            DependencySection::Dev => "dev-dependencies",
            DependencySection::Build => "build-dependencies",
        }
    }

    /// `all` expands to every section.
    pub fn parse(name: &str) -> Option<Vec<DependencySection>> {
        match name {
            "all" => Some(Self::ALL.to_vec()),
            other => Self::ALL
                .into_iter()
                .find(|s| s.name() == other)
                .map(|s| vec![s]),
        }
    }

    pub fn uri(&self) -> String {
        format!("cargo://{}", self.name())
    }
}

/// Section names accepted by `cargo://{section}` and the tool.
pub const SECTION_NAMES: [&str; 4] = ["production", "dev", "build", "all"];

pub fn manifest_path() -> PathBuf {
    PathBuf::from(MANIFEST)
}

pub fn read_manifest(path: &Path) -> anyhow::Result<toml::Table> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    raw.parse::<toml::Table>()
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Dependencies of one section as JSON, keyed by crate name. A workspace root
/// without its own `[dependencies]` reports `[workspace.dependencies]`.
pub fn section_json(manifest: &toml::Table, section: DependencySection) -> Value {
    let table = manifest.get(section.key()).or_else(|| {
        (section == DependencySection::Production)
            .then(|| manifest.get("workspace"))
            .flatten()
            .and_then(|w| w.get("dependencies"))
    });
    match table {
        Some(table) => serde_json::to_value(table).unwrap_or(Value::Null),
        None => Value::Object(Map::new()),
    }
}

pub fn section_resource(manifest: &toml::Table, section: DependencySection) -> ResourceContent {
    ResourceContent::json(section.uri(), &section_json(manifest, section))
}

pub struct CargoSections {
    schema: InputSchema,
}

impl CargoSections {
    pub fn new() -> Self {
        Self {
            schema: InputSchema::new().param(
                Parameter::string("section")
                    .required()
                    .one_of(SECTION_NAMES)
                    .description("Dependency section"),
            ),
        }
    }
}

impl Default for CargoSections {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceTemplate for CargoSections {
    fn name(&self) -> &str {
        "cargo_dependencies"
    }

    fn uri_template(&self) -> &str {
        "cargo://{section}"
    }

    fn description(&self) -> &str {
        "Dependencies declared in Cargo.toml, by section"
    }

    fn schema(&self) -> &InputSchema {
        &self.schema
    }

    async fn read(
        &self,
        uri: &str,
        vars: Map<String, Value>,
        _session: &Session,
    ) -> McpResult<Vec<ResourceContent>> {
        let name = vars.get("section").and_then(Value::as_str).unwrap_or("all");
        let sections = DependencySection::parse(name)
            .ok_or_else(|| McpError::ResourceNotFound(uri.to_string()))?;
        let manifest = read_manifest(&manifest_path())
            .map_err(|e| McpError::execution(format!("{e:#}")))?;
        Ok(sections
            .into_iter()
            .map(|s| section_resource(&manifest, s))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(raw: &str) -> toml::Table {
        raw.parse().unwrap()
    }

    #[test]
    fn test_sections() {
        let m = manifest(
            r#"
            [dependencies]
            serde = "1.0"
            [dev-dependencies]
            tempfile = { version = "3.9" }
            "#,
        );
        assert_eq!(
            section_json(&m, DependencySection::Production)["serde"],
            "1.0"
        );
        assert_eq!(
            section_json(&m, DependencySection::Dev)["tempfile"]["version"],
            "3.9"
        );
        assert_eq!(
            section_json(&m, DependencySection::Build),
            Value::Object(Map::new())
        );
    }

    #[test]
    fn test_workspace_fallback() {
        let m = manifest(
            r#"
            [workspace.dependencies]
            tokio = "1"
            "#,
        );
        assert_eq!(section_json(&m, DependencySection::Production)["tokio"], "1");
    }

    #[test]
    fn test_parse_section_names() {
        assert_eq!(DependencySection::parse("all").unwrap().len(), 3);
        assert_eq!(
            DependencySection::parse("dev"),
            Some(vec![DependencySection::Dev])
        );
        assert!(DependencySection::parse("optional").is_none());
    }
}
