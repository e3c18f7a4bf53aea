//! Render effects emitted by units, and the context units emit them through.

use std::sync::{Arc, Mutex, OnceLock};

use base64::Engine;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use switchboard::{Ledger, Session};

use crate::types::{
    McpError, PromptGetResult, PromptMessage, ResourceContent, Role, ToolCallResult, ToolContent,
};

/// One ordered output effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Render {
    Text(String),
    Resource(ResourceContent),
    /// Binary payload, base64-encoded on the wire.
    Blob { data: Vec<u8>, mime_type: String },
    /// A typed error the unit reports without failing outright.
    Error(String),
}

impl Render {
    fn into_content(self, index: usize) -> ToolContent {
        match self {
            Render::Text(text) | Render::Error(text) => ToolContent::Text { text },
            Render::Resource(resource) => ToolContent::Resource { resource },
            Render::Blob { data, mime_type } => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
                if mime_type.starts_with("image/") {
                    ToolContent::Image {
                        data: encoded,
                        mime_type,
                    }
                } else {
                    ToolContent::Resource {
                        resource: ResourceContent {
                            uri: format!("blob://{index}"),
                            mime_type: Some(mime_type),
                            text: None,
                            blob: Some(encoded),
                        },
                    }
                }
            }
        }
    }
}

/// A render together with the speaker it is attributed to. Tools ignore the role.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub role: Role,
    pub render: Render,
}

/// Everything a unit rendered, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOutput {
    pub renders: Vec<Rendered>,
}

impl RenderOutput {
    pub fn is_empty(&self) -> bool {
        self.renders.is_empty()
    }

    pub fn has_error(&self) -> bool {
        self.renders
            .iter()
            .any(|r| matches!(r.render, Render::Error(_)))
    }

    fn into_tool_content(self) -> Vec<ToolContent> {
        self.renders
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.render.into_content(i))
            .collect()
    }

    /// Tool result. Typed error renders mark it `isError`.
    pub fn into_tool_result(self) -> ToolCallResult {
        let is_error = self.has_error();
        ToolCallResult {
            content: self.into_tool_content(),
            is_error,
        }
    }

    /// `data.partial` for a tool that failed part way.
    pub fn into_partial_content(self) -> Value {
        json!(self.into_tool_content())
    }

    pub fn into_prompt_messages(self) -> Vec<PromptMessage> {
        self.renders
            .into_iter()
            .enumerate()
            .map(|(i, r)| PromptMessage {
                role: r.role,
                content: r.render.into_content(i),
            })
            .collect()
    }

    pub fn into_prompt_result(self, description: &str) -> PromptGetResult {
        PromptGetResult {
            description: Some(description.to_string()),
            messages: self.into_prompt_messages(),
        }
    }

    /// `data.partial` for a prompt that failed part way.
    pub fn into_partial_messages(self) -> Value {
        json!(self.into_prompt_messages())
    }
}

struct InvocationState {
    renders: Mutex<Vec<Rendered>>,
    token: CancellationToken,
    task_id: OnceLock<String>,
    ledger: Arc<Ledger>,
}

/// Handle a running unit renders through. Clones share the same output.
#[derive(Clone)]
pub struct RenderContext {
    state: Arc<InvocationState>,
    session: Arc<Session>,
}

impl RenderContext {
    pub fn new(session: Session, ledger: Arc<Ledger>, token: CancellationToken) -> Self {
        Self {
            state: Arc::new(InvocationState {
                renders: Mutex::new(Vec::new()),
                token,
                task_id: OnceLock::new(),
                ledger,
            }),
            session: Arc::new(session),
        }
    }

    /// The session the unit runs for, as of invocation.
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.token.is_cancelled()
    }

    /// Resolves once the invocation is cancelled.
    pub async fn cancelled(&self) {
        self.state.token.cancelled().await
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.state.token
    }

    /// Emit a render attributed to the user.
    pub fn render(&self, render: Render) -> anyhow::Result<()> {
        self.say(Role::User, render)
    }

    /// Emit a render attributed to `role`. Fails once the invocation is
    /// cancelled, so units stop at their next render.
    pub fn say(&self, role: Role, render: Render) -> anyhow::Result<()> {
        if self.is_cancelled() {
            return Err(McpError::RequestCancelled.into());
        }
        self.renders().push(Rendered { role, render });
        Ok(())
    }

    pub fn text(&self, text: impl Into<String>) -> anyhow::Result<()> {
        self.render(Render::Text(text.into()))
    }

    fn renders(&self) -> std::sync::MutexGuard<'_, Vec<Rendered>> {
        self.state
            .renders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of everything rendered so far.
    pub fn output(&self) -> RenderOutput {
        RenderOutput {
            renders: self.renders().clone(),
        }
    }

    /// Task backing this invocation, once it has been deferred.
    pub fn task_id(&self) -> Option<&str> {
        self.state.task_id.get().map(String::as_str)
    }

    pub(crate) fn attach_task(&self, task_id: String) {
        let _ = self.state.task_id.set(task_id);
    }

    /// Report progress. Recorded on the task when there is one.
    pub async fn progress(&self, percent: u8, message: impl Into<String>) -> anyhow::Result<()> {
        if self.is_cancelled() {
            return Err(McpError::RequestCancelled.into());
        }
        if let Some(task_id) = self.task_id() {
            self.state
                .ledger
                .tasks
                .update_progress(task_id, Some(percent), Some(message.into()))
                .await?;
        }
        Ok(())
    }

    /// Store continuation state on the task, when there is one.
    pub async fn checkpoint(&self, state: Value) -> anyhow::Result<()> {
        if let Some(task_id) = self.task_id() {
            self.state
                .ledger
                .tasks
                .set_continuation(task_id, state)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard::SessionRole;

    async fn context() -> RenderContext {
        let ledger = Arc::new(Ledger::default());
        let session = ledger.sessions.create_session(SessionRole::Server).await;
        RenderContext::new(session, ledger, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_renders_keep_order() {
        let ctx = context().await;
        ctx.text("one").unwrap();
        ctx.render(Render::Blob {
            data: vec![1, 2, 3],
            mime_type: "image/png".to_string(),
        })
        .unwrap();

        let result = ctx.output().into_tool_result();
        assert!(!result.is_error);
        assert_eq!(result.content[0], ToolContent::Text { text: "one".to_string() });
        assert!(matches!(
            &result.content[1],
            ToolContent::Image { data, .. } if data == "AQID"
        ));
    }

    #[tokio::test]
    async fn test_render_after_cancel_fails() {
        let ctx = context().await;
        ctx.text("before").unwrap();
        ctx.token().cancel();
        assert!(ctx.text("after").is_err());
        assert_eq!(ctx.output().renders.len(), 1);
    }

    #[tokio::test]
    async fn test_error_render_marks_result() {
        let ctx = context().await;
        ctx.text("partial").unwrap();
        ctx.render(Render::Error("quota exceeded".to_string())).unwrap();
        let result = ctx.output().into_tool_result();
        assert!(result.is_error);
        assert_eq!(result.content.len(), 2);
        assert_eq!(
            result.content[1],
            ToolContent::Text { text: "quota exceeded".to_string() }
        );
    }

    #[tokio::test]
    async fn test_partial_content_keeps_renders() {
        let ctx = context().await;
        ctx.text("partial").unwrap();
        let partial = ctx.output().into_partial_content();
        assert_eq!(partial[0]["type"], "text");
        assert_eq!(partial[0]["text"], "partial");
    }
}
