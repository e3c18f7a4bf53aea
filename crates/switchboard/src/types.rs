//! Core data types for sessions, messages, and tasks.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which side of the connection a session record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    Server,
    Client,
}

/// Session lifecycle status. Ordered so that `a < b` means `b` is later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    PreInitialize,
    Initialized,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::PreInitialize => "pre_initialize",
            SessionStatus::Initialized => "initialized",
            SessionStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grant state for a single consent key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    Granted,
    Denied,
}

/// A stateful connection between one client and the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub role: SessionRole,
    pub status: SessionStatus,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub server_capabilities: Value,
    #[serde(default)]
    pub client_capabilities: Value,
    #[serde(default)]
    pub server_info: Value,
    #[serde(default)]
    pub client_info: Value,
    pub initialized: bool,
    pub messages_count: u64,
    #[serde(default)]
    pub consents: BTreeMap<String, ConsentState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(id: String, role: SessionRole) -> Self {
        let now = Utc::now();
        Self {
            id,
            role,
            status: SessionStatus::PreInitialize,
            ended_at: None,
            protocol_version: None,
            server_capabilities: Value::Null,
            client_capabilities: Value::Null,
            server_info: Value::Null,
            client_info: Value::Null,
            initialized: false,
            messages_count: 0,
            consents: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == SessionStatus::Closed
    }

    pub fn consent_granted(&self, key: &str) -> bool {
        self.consents.get(key) == Some(&ConsentState::Granted)
    }

    /// Client implementation name, if the client reported one.
    pub fn client_name(&self) -> Option<&str> {
        self.client_info.get("name").and_then(Value::as_str)
    }

    /// Client implementation version, if the client reported one.
    pub fn client_version(&self) -> Option<&str> {
        self.client_info.get("version").and_then(Value::as_str)
    }
}

/// Who sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Client,
    Server,
}

/// Kind of JSON-RPC message. `Error` is a response carrying an error object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Error,
    Notification,
}

impl MessageType {
    pub fn is_response(&self) -> bool {
        matches!(self, MessageType::Response | MessageType::Error)
    }
}

/// A recorded message, owned by exactly one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub session_id: String,
    pub direction: MessageDirection,
    pub message_type: MessageType,
    #[serde(default)]
    pub jsonrpc_id: Option<String>,
    #[serde(default)]
    pub message_text: Option<String>,
    #[serde(default)]
    pub message_json: Option<Value>,
    #[serde(default)]
    pub is_ping: bool,
    #[serde(default)]
    pub request_acknowledged: bool,
    #[serde(default)]
    pub request_cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message about to be recorded. The store assigns id, owner, and timestamps.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub direction: MessageDirection,
    pub message_type: MessageType,
    pub jsonrpc_id: Option<String>,
    pub message_text: Option<String>,
    pub message_json: Option<Value>,
    pub is_ping: bool,
}

impl NewMessage {
    pub fn new(direction: MessageDirection, message_type: MessageType) -> Self {
        Self {
            direction,
            message_type,
            jsonrpc_id: None,
            message_text: None,
            message_json: None,
            is_ping: false,
        }
    }

    pub fn request(id: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageDirection::Client, MessageType::Request)
            .with_id(id)
            .with_json(payload)
    }

    pub fn response(id: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageDirection::Server, MessageType::Response)
            .with_id(id)
            .with_json(payload)
    }

    pub fn error(id: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageDirection::Server, MessageType::Error)
            .with_id(id)
            .with_json(payload)
    }

    pub fn notification(direction: MessageDirection, payload: Value) -> Self {
        Self::new(direction, MessageType::Notification).with_json(payload)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.jsonrpc_id = Some(id.into());
        self
    }

    pub fn with_json(mut self, payload: Value) -> Self {
        self.message_json = Some(payload);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.message_text = Some(text.into());
        self
    }

    pub fn ping(mut self) -> Self {
        self.is_ping = true;
        self
    }
}

/// Task lifecycle status. Every status except `Working` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Working,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Working)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Working => "working",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A long-running invocation that outlives its request/response exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub session_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub request_method: Option<String>,
    #[serde(default)]
    pub request_name: Option<String>,
    #[serde(default)]
    pub request_params: Option<Value>,
    #[serde(default)]
    pub result_payload: Option<Value>,
    /// Time to live in milliseconds.
    #[serde(default)]
    pub ttl: Option<u64>,
    /// Suggested polling interval in milliseconds.
    #[serde(default)]
    pub poll_interval: Option<u64>,
    #[serde(default = "empty_object")]
    pub continuation_state: Value,
    #[serde(default)]
    pub progress_percent: Option<u8>,
    #[serde(default)]
    pub progress_message: Option<String>,
    #[serde(default)]
    pub last_step_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id.clone(),
            status: self.status,
            status_message: self.status_message.clone(),
            progress_percent: self.progress_percent,
            progress_message: self.progress_message.clone(),
            result: self.result_payload.clone(),
            ttl: self.ttl,
            poll_interval: self.poll_interval,
            created_at: self.created_at,
            last_updated_at: self.last_updated_at,
        }
    }

    pub fn has_continuation(&self) -> bool {
        match &self.continuation_state {
            Value::Null => false,
            Value::Object(map) => !map.is_empty(),
            _ => true,
        }
    }
}

/// Point-in-time view of a task returned by polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    pub status_message: Option<String>,
    pub progress_percent: Option<u8>,
    pub progress_message: Option<String>,
    pub result: Option<Value>,
    pub ttl: Option<u64>,
    pub poll_interval: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

pub(crate) fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Errors that can occur in the core library.
#[derive(thiserror::Error, Debug)]
pub enum SwitchboardError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type SwitchboardResult<T> = Result<T, SwitchboardError>;
