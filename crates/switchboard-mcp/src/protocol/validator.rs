//! JSON-RPC request validation and lifecycle gating.

use switchboard::SessionStatus;

use crate::types::{JsonRpcRequest, McpError, McpResult, RequestId};

/// Methods a session may call before `initialize` completes.
const PRE_INIT_METHODS: &[&str] = &["initialize", "ping"];

/// Validate that a JSON-RPC request is well-formed.
pub fn validate_request(request: &JsonRpcRequest) -> McpResult<()> {
    if request.method.is_empty() {
        return Err(McpError::InvalidRequest(
            "Method name must not be empty".to_string(),
        ));
    }

    if request.id == RequestId::Null {
        return Err(McpError::InvalidRequest(
            "Request id must not be null".to_string(),
        ));
    }

    if let Some(params) = &request.params {
        if !params.is_object() && !params.is_array() && !params.is_null() {
            return Err(McpError::InvalidRequest(
                "Params must be an object or array".to_string(),
            ));
        }
    }

    Ok(())
}

/// Reject methods the session's lifecycle phase does not allow.
pub fn check_phase(status: SessionStatus, method: &str) -> McpResult<()> {
    match status {
        SessionStatus::PreInitialize if !PRE_INIT_METHODS.contains(&method) => {
            Err(McpError::InvalidState(format!(
                "{method} is not allowed before initialize"
            )))
        }
        SessionStatus::Initialized if method == "initialize" => Err(McpError::InvalidState(
            "Session is already initialized".to_string(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pre_initialize_gating() {
        assert!(check_phase(SessionStatus::PreInitialize, "initialize").is_ok());
        assert!(check_phase(SessionStatus::PreInitialize, "ping").is_ok());
        assert!(matches!(
            check_phase(SessionStatus::PreInitialize, "tools/list"),
            Err(McpError::InvalidState(_))
        ));
        assert!(check_phase(SessionStatus::Initialized, "tools/list").is_ok());
        assert!(check_phase(SessionStatus::Initialized, "initialize").is_err());
    }

    #[test]
    fn test_request_shape() {
        let ok = JsonRpcRequest::new(RequestId::Number(1), "ping", None);
        assert!(validate_request(&ok).is_ok());

        let null_id = JsonRpcRequest::new(RequestId::Null, "ping", None);
        assert!(validate_request(&null_id).is_err());

        let scalar = JsonRpcRequest::new(RequestId::Number(1), "ping", Some(json!(3)));
        assert!(validate_request(&scalar).is_err());
    }
}
