//! Main request dispatcher: receives JSON-RPC messages, records them, routes
//! them to handlers, and records the replies.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use switchboard::{
    MessageDirection, MessageType, Negotiation, NewMessage, Session, SwitchboardError, Task,
    TaskStatus,
};

use crate::prompts::Prompt;
use crate::session::SessionManager;
use crate::transport::framing;
use crate::types::*;

use super::dispatcher::{Dispatched, Invocation, UnitKind};
use super::negotiation::Profile;
use super::validator::{check_phase, validate_request};

struct Connection {
    session_id: String,
    identity: Option<String>,
    profile: Arc<Profile>,
    /// Correlation key → token of the request still being handled.
    in_flight: Mutex<HashMap<String, CancellationToken>>,
    /// Correlation key → task a request was deferred to.
    request_tasks: Mutex<HashMap<String, String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Protocol endpoint for one client connection, bound to one session.
/// Clones share the connection.
#[derive(Clone)]
pub struct ProtocolHandler {
    core: Arc<SessionManager>,
    conn: Arc<Connection>,
}

impl ProtocolHandler {
    /// Open a fresh session for a connection from `identity`.
    pub async fn connect(core: Arc<SessionManager>, identity: Option<String>) -> Self {
        let session = core
            .ledger()
            .sessions
            .create_session(switchboard::SessionRole::Server)
            .await;
        let profile = core.negotiator().select(identity.as_deref());
        tracing::debug!(
            "Session {} uses profile '{}' (identity: {})",
            session.id,
            profile.name,
            identity.as_deref().unwrap_or("anonymous")
        );
        Self {
            core,
            conn: Arc::new(Connection {
                session_id: session.id,
                identity,
                profile,
                in_flight: Mutex::new(HashMap::new()),
                request_tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.conn.session_id
    }

    pub fn identity(&self) -> Option<&str> {
        self.conn.identity.as_deref()
    }

    pub fn profile(&self) -> &Profile {
        &self.conn.profile
    }

    pub fn core(&self) -> &Arc<SessionManager> {
        &self.core
    }

    pub async fn session(&self) -> McpResult<Session> {
        Ok(self.core.ledger().sessions.get(self.session_id()).await?)
    }

    /// Close the session, e.g. when the transport goes away.
    pub async fn disconnect(&self) -> McpResult<Session> {
        let pending: Vec<CancellationToken> =
            lock(&self.conn.in_flight).values().cloned().collect();
        for token in pending {
            token.cancel();
        }
        self.core.close_session(self.session_id()).await
    }

    /// Decode and handle one raw payload.
    pub async fn handle_raw(&self, raw: &[u8]) -> Option<Value> {
        match framing::decode(raw) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => Some(self.rejection(raw, e)),
        }
    }

    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        self.handle_raw(line.trim().as_bytes()).await
    }

    /// Error reply for a payload that could not be decoded.
    pub fn rejection(&self, raw: &[u8], error: McpError) -> Value {
        tracing::warn!("Rejected payload: {error}");
        JsonRpcMessage::Error(error.to_json_rpc_error(framing::recover_id(raw))).to_value()
    }

    pub async fn handle_message(&self, msg: JsonRpcMessage) -> Option<Value> {
        match msg {
            JsonRpcMessage::Request(req) => self.handle_request(req).await,
            JsonRpcMessage::Notification(notif) => {
                self.handle_notification(notif).await;
                None
            }
            reply => {
                tracing::warn!("Received unexpected reply from client");
                let kind = match reply {
                    JsonRpcMessage::Error(_) => MessageType::Error,
                    _ => MessageType::Response,
                };
                let mut inbound = NewMessage::new(MessageDirection::Client, kind)
                    .with_json(reply.to_value());
                if let Some(key) = reply.id().and_then(RequestId::correlation_key) {
                    inbound = inbound.with_id(key);
                }
                if let Err(e) = self.record(inbound).await {
                    tracing::debug!("Reply not recorded: {e}");
                }
                None
            }
        }
    }

    async fn record(&self, message: NewMessage) -> Result<switchboard::Message, SwitchboardError> {
        self.core
            .ledger()
            .sessions
            .record_message(self.session_id(), message)
            .await
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Option<Value> {
        let id = request.id.clone();
        let key = id.correlation_key();
        let is_ping = request.method == "ping";

        let mut inbound = NewMessage::new(MessageDirection::Client, MessageType::Request)
            .with_json(JsonRpcMessage::Request(request.clone()).to_value());
        if let Some(key) = &key {
            inbound = inbound.with_id(key.clone());
        }
        if is_ping {
            inbound = inbound.ping();
        }
        if let Err(e) = self.record(inbound).await {
            let error: McpError = e.into();
            return Some(JsonRpcMessage::Error(error.to_json_rpc_error(id)).to_value());
        }

        let token = CancellationToken::new();
        if let Some(key) = &key {
            lock(&self.conn.in_flight).insert(key.clone(), token.clone());
        }

        let result = self.route(&request, &token, key.as_deref()).await;

        if let Some(key) = &key {
            lock(&self.conn.in_flight).remove(key);
        }
        if token.is_cancelled() {
            tracing::debug!("Request {id} was cancelled, discarding its result");
            return None;
        }

        let closes = request.method == "shutdown" && result.is_ok();
        let reply = match result {
            Ok(value) => JsonRpcMessage::Response(JsonRpcResponse::new(id, value)),
            Err(e) => {
                tracing::debug!("Request {} failed: {e}", request.method);
                JsonRpcMessage::Error(e.to_json_rpc_error(id))
            }
        };
        let response = self.respond(reply, key, is_ping).await;

        if closes {
            if let Err(e) = self.core.close_session(self.session_id()).await {
                tracing::error!("Failed to close session on shutdown: {e}");
            }
        }
        response
    }

    /// Record an outbound reply. A reply the log refuses (its request was
    /// cancelled or already answered) is not sent.
    async fn respond(&self, reply: JsonRpcMessage, key: Option<String>, ping: bool) -> Option<Value> {
        let value = reply.to_value();
        let kind = match reply {
            JsonRpcMessage::Error(_) => MessageType::Error,
            _ => MessageType::Response,
        };
        let mut outbound = NewMessage::new(MessageDirection::Server, kind).with_json(value.clone());
        if let Some(key) = key {
            outbound = outbound.with_id(key);
        }
        if ping {
            outbound = outbound.ping();
        }
        match self.record(outbound).await {
            Ok(_) => Some(value),
            Err(SwitchboardError::InvalidState(reason)) => {
                tracing::debug!("Dropping reply: {reason}");
                None
            }
            Err(e) => {
                tracing::warn!("Failed to record reply: {e}");
                Some(value)
            }
        }
    }

    async fn route(
        &self,
        request: &JsonRpcRequest,
        token: &CancellationToken,
        key: Option<&str>,
    ) -> McpResult<Value> {
        validate_request(request)?;
        let session = self.session().await?;
        check_phase(session.status, &request.method)?;

        let params = &request.params;
        match request.method.as_str() {
            "initialize" => self.handle_initialize(params).await,
            "ping" => Ok(Value::Object(serde_json::Map::new())),
            "shutdown" => self.handle_shutdown().await,

            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(session, params, token, key).await,

            "prompts/list" => self.handle_prompts_list(),
            "prompts/get" => self.handle_prompts_get(session, params, token).await,

            "resources/list" => to_value(ResourceListResult {
                resources: self.core.resources().list_resources(),
                next_cursor: None,
            }),
            "resources/templates/list" => to_value(ResourceTemplateListResult {
                resource_templates: self.core.resources().list_templates(),
                next_cursor: None,
            }),
            "resources/read" => {
                let read: ResourceReadParams = parse_params(params, "Resource read")?;
                to_value(self.core.resources().read(&read.uri, &session).await?)
            }

            "tasks/poll" | "tasks/get" => {
                let TaskIdParams { task_id } = parse_params(params, "Task")?;
                to_value(TaskInfo::from(self.owned_task(&task_id).await?.snapshot()))
            }
            "tasks/list" => self.handle_tasks_list(params).await,
            "tasks/cancel" => {
                let TaskIdParams { task_id } = parse_params(params, "Task")?;
                self.owned_task(&task_id).await?;
                let task = self.core.ledger().tasks.cancel(&task_id).await?;
                to_value(TaskInfo::from(task.snapshot()))
            }

            _ => Err(McpError::MethodNotFound(request.method.clone())),
        }
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        let inbound = NewMessage::notification(
            MessageDirection::Client,
            JsonRpcMessage::Notification(notification.clone()).to_value(),
        );
        if let Err(e) = self.record(inbound).await {
            tracing::debug!("Notification {} not recorded: {e}", notification.method);
            return;
        }

        let method = notification.method.as_str();
        if methods::is_initialized(method) {
            if let Err(e) = self
                .core
                .ledger()
                .sessions
                .confirm_initialized(self.session_id())
                .await
            {
                tracing::warn!("Ignoring initialized notification: {e}");
            }
        } else if methods::is_cancellation(method) {
            let params: CancelRequestParams = match parse_params(&notification.params, "Cancel") {
                Ok(params) => params,
                Err(e) => {
                    tracing::warn!("Malformed cancellation: {e}");
                    return;
                }
            };
            match RequestId::from_value(&params.request_id).and_then(|id| id.correlation_key()) {
                Some(key) => self.cancel_request(&key, params.reason.as_deref()).await,
                None => tracing::warn!("Cancellation names no request id"),
            }
        } else {
            tracing::debug!("Unknown notification: {method}");
        }
    }

    async fn cancel_request(&self, key: &str, reason: Option<&str>) {
        tracing::info!(
            "Client cancelled request {key}: {}",
            reason.unwrap_or("no reason given")
        );
        let ledger = self.core.ledger();
        match ledger
            .sessions
            .mark_request_cancelled(self.session_id(), key)
            .await
        {
            Ok(false) => tracing::debug!("Request {key} is not pending"),
            Ok(true) => {}
            Err(e) => tracing::warn!("Failed to mark request {key} cancelled: {e}"),
        }

        let token = lock(&self.conn.in_flight).get(key).cloned();
        if let Some(token) = token {
            token.cancel();
        }

        let task_id = lock(&self.conn.request_tasks).remove(key);
        if let Some(task_id) = task_id {
            if let Err(e) = ledger.tasks.cancel(&task_id).await {
                tracing::debug!("Task {task_id} not cancelled: {e}");
            }
        }
    }

    async fn handle_initialize(&self, params: &Option<Value>) -> McpResult<Value> {
        let init: InitializeParams = parse_params(params, "Initialize")?;
        let negotiator = self.core.negotiator();
        let protocol_version = negotiator.protocol_version(&init.protocol_version);
        let capabilities = negotiator.server_capabilities(&self.conn.profile);
        let server_info = Implementation::server(&self.core.config().server_name);

        self.core
            .ledger()
            .sessions
            .negotiate(
                self.session_id(),
                Negotiation {
                    protocol_version: protocol_version.clone(),
                    client_capabilities: serde_json::to_value(&init.capabilities)?,
                    client_info: serde_json::to_value(&init.client_info)?,
                    server_capabilities: serde_json::to_value(&capabilities)?,
                    server_info: serde_json::to_value(&server_info)?,
                },
            )
            .await?;

        to_value(InitializeResult {
            protocol_version,
            capabilities,
            server_info,
            instructions: self.core.config().instructions.clone(),
        })
    }

    async fn handle_shutdown(&self) -> McpResult<Value> {
        tracing::info!("Shutdown requested for session {}", self.session_id());
        self.core.save().await?;
        Ok(Value::Object(serde_json::Map::new()))
    }

    fn handle_tools_list(&self) -> McpResult<Value> {
        let tools = self
            .core
            .tools()
            .list_tools()
            .into_iter()
            .filter(|t| self.conn.profile.allows_tool(&t.name))
            .collect();
        to_value(ToolListResult {
            tools,
            next_cursor: None,
        })
    }

    async fn handle_tools_call(
        &self,
        session: Session,
        params: &Option<Value>,
        token: &CancellationToken,
        key: Option<&str>,
    ) -> McpResult<Value> {
        let call: ToolCallParams = parse_params(params, "Tool call")?;
        let outcome = self
            .core
            .dispatcher()
            .invoke(Invocation {
                session,
                profile: self.conn.profile.clone(),
                kind: UnitKind::Tool,
                name: call.name,
                arguments: call.arguments,
                task: call.task,
                token: token.clone(),
            })
            .await?;

        match outcome {
            Dispatched::Completed(output) => to_value(output.into_tool_result()),
            Dispatched::Failed { error, output } => {
                tracing::warn!("Tool failed: {error}");
                Err(McpError::ExecutionError {
                    message: error,
                    partial: Some(output.into_partial_content()),
                })
            }
            Dispatched::Deferred(task) => {
                if let Some(key) = key {
                    lock(&self.conn.request_tasks).insert(key.to_string(), task.id.clone());
                }
                to_value(CreateTaskResult {
                    task: TaskInfo::from(task.snapshot()),
                })
            }
        }
    }

    fn handle_prompts_list(&self) -> McpResult<Value> {
        let prompts = self
            .core
            .prompts()
            .list_prompts()
            .into_iter()
            .filter(|p| self.conn.profile.allows_prompt(&p.name))
            .collect();
        to_value(PromptListResult {
            prompts,
            next_cursor: None,
        })
    }

    async fn handle_prompts_get(
        &self,
        session: Session,
        params: &Option<Value>,
        token: &CancellationToken,
    ) -> McpResult<Value> {
        let get: PromptGetParams = parse_params(params, "Prompt get")?;
        let prompt = self.core.prompts().resolve(&get.name)?;
        let outcome = self
            .core
            .dispatcher()
            .invoke(Invocation {
                session,
                profile: self.conn.profile.clone(),
                kind: UnitKind::Prompt,
                name: get.name,
                arguments: get.arguments,
                task: None,
                token: token.clone(),
            })
            .await?;

        match outcome {
            Dispatched::Completed(output) => to_value(output.into_prompt_result(prompt.description())),
            Dispatched::Failed { error, output } => Err(McpError::ExecutionError {
                message: error,
                partial: Some(output.into_partial_messages()),
            }),
            Dispatched::Deferred(task) => Err(McpError::InternalError(format!(
                "prompt {} was deferred to task {}",
                prompt.name(),
                task.id
            ))),
        }
    }

    async fn handle_tasks_list(&self, params: &Option<Value>) -> McpResult<Value> {
        let list: TaskListParams = params
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .unwrap_or_default();
        let status: Option<TaskStatus> = list
            .status
            .map(|s| serde_json::from_value(Value::String(s)))
            .transpose()
            .map_err(|e| McpError::InvalidParams(format!("Unknown task status: {e}")))?;

        let tasks = self
            .core
            .ledger()
            .tasks
            .list(Some(self.session_id()), status)
            .await
            .into_iter()
            .map(|t| TaskInfo::from(t.snapshot()))
            .collect();
        to_value(TaskListResult { tasks })
    }

    /// A task of this session. Other sessions' tasks do not exist here.
    async fn owned_task(&self, task_id: &str) -> McpResult<Task> {
        let task = self.core.ledger().tasks.get(task_id).await?;
        if task.session_id != self.session_id() {
            return Err(McpError::TaskNotFound(task_id.to_string()));
        }
        Ok(task)
    }
}

fn parse_params<T: DeserializeOwned>(params: &Option<Value>, what: &str) -> McpResult<T> {
    let value = params
        .clone()
        .ok_or_else(|| McpError::InvalidParams(format!("{what} params required")))?;
    serde_json::from_value(value).map_err(|e| McpError::InvalidParams(e.to_string()))
}

fn to_value<T: serde::Serialize>(value: T) -> McpResult<Value> {
    serde_json::to_value(value).map_err(|e| McpError::InternalError(e.to_string()))
}
