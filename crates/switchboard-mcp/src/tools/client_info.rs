//! Tool client_info: Report the calling client's name and version.

use async_trait::async_trait;
use serde_json::{Map, Value};
use switchboard::InputSchema;

use crate::render::RenderContext;

use super::Tool;

#[derive(Default)]
pub struct ClientInfo {
    schema: InputSchema,
}

impl ClientInfo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Tool for ClientInfo {
    fn name(&self) -> &str {
        "client_info"
    }

    fn description(&self) -> &str {
        "Report the name and version of the client in this session"
    }

    fn schema(&self) -> &InputSchema {
        &self.schema
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn call(&self, _args: Map<String, Value>, ctx: &RenderContext) -> anyhow::Result<()> {
        let session = ctx.session();
        let name = session.client_name().unwrap_or("unknown");
        let version = session.client_version().unwrap_or("unknown");
        ctx.text(format!("Client: {name} v{version}"))?;
        ctx.text(format!(
            "Session: {} (protocol {})",
            session.id,
            session.protocol_version.as_deref().unwrap_or("unnegotiated")
        ))
    }
}
