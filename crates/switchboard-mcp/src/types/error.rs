//! Error types and JSON-RPC error codes for the MCP server.

use serde_json::{json, Value};
use switchboard::{FieldError, SwitchboardError};

use super::message::{JsonRpcError, JsonRpcErrorObject, RequestId, JSONRPC_VERSION};

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// MCP-specific error codes.
pub mod mcp_error_codes {
    pub const REQUEST_CANCELLED: i32 = -32800;
    pub const RESOURCE_NOT_FOUND: i32 = -32802;
    pub const TOOL_NOT_FOUND: i32 = -32803;
    pub const PROMPT_NOT_FOUND: i32 = -32804;
    pub const TASK_NOT_FOUND: i32 = -32850;
    pub const SESSION_NOT_FOUND: i32 = -32851;
    pub const INVALID_STATE: i32 = -32852;
    pub const SESSION_CLOSED: i32 = -32853;
    pub const DUPLICATE_NAME: i32 = -32854;
    pub const UNKNOWN_PROFILE: i32 = -32855;
    pub const EXECUTION_ERROR: i32 = -32856;
    pub const TIMEOUT: i32 = -32857;

    /// Server: Unauthorized (missing or invalid bearer token).
    pub const UNAUTHORIZED: i32 = -32900;
}

/// All errors that can occur in the MCP server.
#[derive(thiserror::Error, Debug)]
pub enum McpError {
    #[error("Parse error: {0}")]
    MalformedPayload(String),

    #[error("Unsupported JSON-RPC version: {0}")]
    UnsupportedVersion(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Every argument that failed schema validation.
    #[error("Invalid arguments: {}", join_fields(.0))]
    InvalidArguments(Vec<FieldError>),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Request cancelled")]
    RequestCancelled,

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    /// A unit failed. `partial` holds whatever it rendered before the fault.
    #[error("{message}")]
    ExecutionError {
        message: String,
        partial: Option<Value>,
    },

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Unauthorized: missing or invalid bearer token.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl McpError {
    pub fn execution(message: impl Into<String>) -> Self {
        McpError::ExecutionError {
            message: message.into(),
            partial: None,
        }
    }

    pub fn code(&self) -> i32 {
        use error_codes::*;
        use mcp_error_codes::*;
        match self {
            McpError::MalformedPayload(_) => PARSE_ERROR,
            McpError::UnsupportedVersion(_) | McpError::InvalidRequest(_) => INVALID_REQUEST,
            McpError::MethodNotFound(_) => METHOD_NOT_FOUND,
            McpError::InvalidParams(_) | McpError::InvalidArguments(_) => INVALID_PARAMS,
            McpError::InternalError(_) => INTERNAL_ERROR,
            McpError::RequestCancelled => REQUEST_CANCELLED,
            McpError::ResourceNotFound(_) => RESOURCE_NOT_FOUND,
            McpError::ToolNotFound(_) => TOOL_NOT_FOUND,
            McpError::PromptNotFound(_) => PROMPT_NOT_FOUND,
            McpError::TaskNotFound(_) => TASK_NOT_FOUND,
            McpError::SessionNotFound(_) => SESSION_NOT_FOUND,
            McpError::InvalidState(_) => INVALID_STATE,
            McpError::SessionClosed(_) => SESSION_CLOSED,
            McpError::DuplicateName(_) => DUPLICATE_NAME,
            McpError::UnknownProfile(_) => UNKNOWN_PROFILE,
            McpError::ExecutionError { .. } => EXECUTION_ERROR,
            McpError::Timeout(_) => TIMEOUT,
            McpError::Unauthorized => UNAUTHORIZED,
            McpError::InvalidConfig(_)
            | McpError::Storage(_)
            | McpError::Transport(_)
            | McpError::Io(_) => INTERNAL_ERROR,
            McpError::Json(_) => PARSE_ERROR,
        }
    }

    /// Structured `data` attached to the JSON-RPC error object.
    pub fn data(&self) -> Option<Value> {
        match self {
            McpError::InvalidArguments(errors) => Some(json!({ "errors": errors })),
            McpError::UnsupportedVersion(received) => Some(json!({
                "supported": [JSONRPC_VERSION],
                "received": received,
            })),
            McpError::ExecutionError {
                partial: Some(partial),
                ..
            } => Some(json!({ "partial": partial })),
            _ => None,
        }
    }

    pub fn to_json_rpc_error(&self, id: RequestId) -> JsonRpcError {
        JsonRpcError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: JsonRpcErrorObject {
                code: self.code(),
                message: self.to_string(),
                data: self.data(),
            },
        }
    }
}

impl From<SwitchboardError> for McpError {
    fn from(e: SwitchboardError) -> Self {
        match e {
            SwitchboardError::SessionNotFound(id) => McpError::SessionNotFound(id),
            SwitchboardError::SessionClosed(id) => McpError::SessionClosed(id),
            SwitchboardError::TaskNotFound(id) => McpError::TaskNotFound(id),
            SwitchboardError::InvalidState(msg) => McpError::InvalidState(msg),
            SwitchboardError::DuplicateName(msg) => McpError::DuplicateName(msg),
            SwitchboardError::NotFound(msg) => McpError::ResourceNotFound(msg),
            SwitchboardError::Storage(msg) => McpError::Storage(msg),
            SwitchboardError::Io(e) => McpError::Io(e),
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;
