//! MCP resource implementations.

pub mod cargo;
pub mod registry;
pub mod session;

use async_trait::async_trait;
use serde_json::{Map, Value};
use switchboard::{InputSchema, Named, Session};

use crate::types::{McpResult, ResourceContent, ResourceDefinition, ResourceTemplateDefinition};

pub use registry::ResourceRegistry;

/// A resource addressed by a URI template such as `cargo://{section}`.
/// Templates without variables are static resources.
#[async_trait]
pub trait ResourceTemplate: Send + Sync {
    fn name(&self) -> &str;

    fn uri_template(&self) -> &str;

    fn description(&self) -> &str;

    fn mime_type(&self) -> &str {
        "application/json"
    }

    /// Schema the template variables are validated against.
    fn schema(&self) -> &InputSchema;

    async fn read(
        &self,
        uri: &str,
        vars: Map<String, Value>,
        session: &Session,
    ) -> McpResult<Vec<ResourceContent>>;

    fn is_static(&self) -> bool {
        !self.uri_template().contains('{')
    }

    fn resource_definition(&self) -> ResourceDefinition {
        ResourceDefinition {
            uri: self.uri_template().to_string(),
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            mime_type: Some(self.mime_type().to_string()),
        }
    }

    fn template_definition(&self) -> ResourceTemplateDefinition {
        ResourceTemplateDefinition {
            uri_template: self.uri_template().to_string(),
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            mime_type: Some(self.mime_type().to_string()),
        }
    }
}

impl Named for dyn ResourceTemplate {
    fn name(&self) -> &str {
        ResourceTemplate::name(self)
    }
}

/// Match `uri` against a `{var}` template. Variables match one non-empty
/// path segment.
pub fn match_template(template: &str, uri: &str) -> Option<Map<String, Value>> {
    let mut vars = Map::new();
    let mut template = template;
    let mut uri = uri;

    loop {
        let Some(open) = template.find('{') else {
            return (template == uri).then_some(vars);
        };
        let (literal, after) = template.split_at(open);
        uri = uri.strip_prefix(literal)?;

        let close = after.find('}')?;
        let name = &after[1..close];
        template = &after[close + 1..];

        let next_literal = &template[..template.find('{').unwrap_or(template.len())];
        let end = if next_literal.is_empty() {
            uri.find('/').unwrap_or(uri.len())
        } else {
            uri.find(next_literal)?
        };
        let value = &uri[..end];
        if value.is_empty() || value.contains('/') {
            return None;
        }
        vars.insert(name.to_string(), Value::String(value.to_string()));
        uri = &uri[end..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_single_variable() {
        let vars = match_template("cargo://{section}", "cargo://dev").unwrap();
        assert_eq!(vars["section"], "dev");
    }

    #[test]
    fn test_match_multiple_variables() {
        let vars = match_template("repo://{owner}/{name}/readme", "repo://a/b/readme").unwrap();
        assert_eq!(vars["owner"], "a");
        assert_eq!(vars["name"], "b");
    }

    #[test]
    fn test_no_match() {
        assert!(match_template("cargo://{section}", "cargo://").is_none());
        assert!(match_template("cargo://{section}", "cargo://a/b").is_none());
        assert!(match_template("cargo://{section}", "npm://dev").is_none());
        assert!(match_template("switchboard://session", "switchboard://session/x").is_none());
        assert!(match_template("switchboard://session", "switchboard://session").is_some());
    }
}
