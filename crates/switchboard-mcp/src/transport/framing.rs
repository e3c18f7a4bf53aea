//! Envelope codec and newline-delimited JSON framing.

use serde_json::{Map, Value};

use crate::types::{
    JsonRpcError, JsonRpcErrorObject, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, McpError, McpResult, RequestId, JSONRPC_VERSION,
};

/// Decode one envelope.
///
/// `method` with `id` is a request, `method` alone a notification, `id` with
/// `result` a response, and `id` with `error` an error response.
pub fn decode(bytes: &[u8]) -> McpResult<JsonRpcMessage> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| McpError::MalformedPayload(e.to_string()))?;

    let mut object = match value {
        Value::Object(object) => object,
        Value::Array(_) => {
            return Err(McpError::MalformedPayload(
                "Batch requests are not supported".to_string(),
            ))
        }
        other => {
            return Err(McpError::MalformedPayload(format!(
                "Expected a JSON object, got {}",
                kind_of(&other)
            )))
        }
    };

    match object.get("jsonrpc") {
        None => {}
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        Some(Value::String(v)) => return Err(McpError::UnsupportedVersion(v.clone())),
        Some(other) => return Err(McpError::UnsupportedVersion(other.to_string())),
    }

    let id = match object.remove("id") {
        None => None,
        Some(raw) => Some(RequestId::from_value(&raw).ok_or_else(|| {
            McpError::MalformedPayload(format!("Invalid id: {raw}"))
        })?),
    };

    let method = match object.remove("method") {
        None => None,
        Some(Value::String(m)) => Some(m),
        Some(other) => {
            return Err(McpError::MalformedPayload(format!(
                "Method must be a string, got {}",
                kind_of(&other)
            )))
        }
    };

    let params = object.remove("params");
    let jsonrpc = JSONRPC_VERSION.to_string();

    match (method, id) {
        (Some(method), Some(id)) => Ok(JsonRpcMessage::Request(JsonRpcRequest {
            jsonrpc,
            id,
            method,
            params,
        })),
        (Some(method), None) => Ok(JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc,
            method,
            params,
        })),
        (None, Some(id)) => decode_reply(id, object),
        (None, None) => Err(McpError::MalformedPayload(
            "Message has neither method nor id".to_string(),
        )),
    }
}

fn decode_reply(id: RequestId, mut object: Map<String, Value>) -> McpResult<JsonRpcMessage> {
    if let Some(error) = object.remove("error") {
        let error: JsonRpcErrorObject = serde_json::from_value(error)
            .map_err(|e| McpError::MalformedPayload(format!("Invalid error object: {e}")))?;
        return Ok(JsonRpcMessage::Error(JsonRpcError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error,
        }));
    }
    match object.remove("result") {
        Some(result) => Ok(JsonRpcMessage::Response(JsonRpcResponse::new(id, result))),
        None => Err(McpError::MalformedPayload(
            "Message with id needs method, result, or error".to_string(),
        )),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Best-effort id of a payload that failed to decode, so the error reply can
/// still be correlated.
pub fn recover_id(bytes: &[u8]) -> RequestId {
    serde_json::from_slice::<Value>(bytes)
        .ok()
        .and_then(|v| v.get("id").and_then(RequestId::from_value))
        .unwrap_or(RequestId::Null)
}

/// Encode one envelope. Always emits `"jsonrpc": "2.0"`.
pub fn encode(message: &JsonRpcMessage) -> Vec<u8> {
    let mut value = message.to_value();
    if let Value::Object(object) = &mut value {
        object.insert("jsonrpc".to_string(), Value::String(JSONRPC_VERSION.to_string()));
    }
    serde_json::to_vec(&value).unwrap_or_default()
}

/// Parse a single line of text as an envelope.
pub fn parse_message(line: &str) -> McpResult<JsonRpcMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(McpError::MalformedPayload("Empty message".to_string()));
    }
    decode(trimmed.as_bytes())
}

/// Serialize a value to a JSON line (with trailing newline).
pub fn frame_message(value: &Value) -> McpResult<String> {
    let mut json = serde_json::to_string(value).map_err(McpError::Json)?;
    json.push('\n');
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_discriminates_variants() {
        let cases = [
            (json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}), "request"),
            (json!({"jsonrpc": "2.0", "method": "notifications/initialized"}), "notification"),
            (json!({"jsonrpc": "2.0", "id": "a", "result": {}}), "response"),
            (
                json!({"jsonrpc": "2.0", "id": 2, "error": {"code": -1, "message": "x"}}),
                "error",
            ),
        ];
        for (payload, expected) in cases {
            let decoded = decode(payload.to_string().as_bytes()).unwrap();
            let kind = match decoded {
                JsonRpcMessage::Request(_) => "request",
                JsonRpcMessage::Notification(_) => "notification",
                JsonRpcMessage::Response(_) => "response",
                JsonRpcMessage::Error(_) => "error",
            };
            assert_eq!(kind, expected, "payload {payload}");
        }
    }

    #[test]
    fn test_malformed_payloads() {
        for raw in ["{not json", "42", "[]", r#"[{"id":1,"method":"ping"}]"#, "{}", r#"{"id":1}"#] {
            assert!(
                matches!(decode(raw.as_bytes()), Err(McpError::MalformedPayload(_))),
                "expected MalformedPayload for {raw}"
            );
        }
    }

    #[test]
    fn test_unsupported_version() {
        let err = decode(br#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#).unwrap_err();
        assert!(matches!(err, McpError::UnsupportedVersion(ref v) if v == "1.0"));
        assert_eq!(err.code(), -32600);
    }

    #[test]
    fn test_missing_version_accepted() {
        let decoded = decode(br#"{"id":7,"method":"ping"}"#).unwrap();
        assert_eq!(decoded.id(), Some(&RequestId::Number(7)));
    }

    #[test]
    fn test_encode_sets_version() {
        let msg = JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: String::new(),
            method: "notifications/cancelled".to_string(),
            params: None,
        });
        let value: Value = serde_json::from_slice(&encode(&msg)).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
    }

    #[test]
    fn test_recover_id() {
        assert_eq!(
            recover_id(br#"{"jsonrpc":"1.0","id":"abc","method":"ping"}"#),
            RequestId::String("abc".to_string())
        );
        assert_eq!(recover_id(b"garbage"), RequestId::Null);
    }
}
