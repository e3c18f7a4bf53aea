//! Resource switchboard://session: The current session record.

use async_trait::async_trait;
use serde_json::{Map, Value};
use switchboard::{InputSchema, Session};

use crate::types::{McpResult, ResourceContent};

use super::ResourceTemplate;

static NO_VARIABLES: std::sync::OnceLock<InputSchema> = std::sync::OnceLock::new();

pub struct CurrentSession;

#[async_trait]
impl ResourceTemplate for CurrentSession {
    fn name(&self) -> &str {
        "current_session"
    }

    fn uri_template(&self) -> &str {
        "switchboard://session"
    }

    fn description(&self) -> &str {
        "The session this connection belongs to"
    }

    fn schema(&self) -> &InputSchema {
        NO_VARIABLES.get_or_init(InputSchema::new)
    }

    async fn read(
        &self,
        uri: &str,
        _vars: Map<String, Value>,
        session: &Session,
    ) -> McpResult<Vec<ResourceContent>> {
        let value = serde_json::to_value(session)?;
        Ok(vec![ResourceContent::json(uri, &value)])
    }
}
