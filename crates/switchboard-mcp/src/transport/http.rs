//! HTTP transport: one JSON-RPC envelope per POST, sessions by header, and /health.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Json as AxumJson, Response},
    routing::{get, post},
    Router,
};
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::protocol::ProtocolHandler;
use crate::session::SessionManager;
use crate::types::{JsonRpcMessage, McpError, McpResult, RequestId};

use super::framing;

/// Header carrying the session id issued on `initialize`.
pub const SESSION_HEADER: &str = "mcp-session-id";
/// Header carrying the caller's identity for profile selection.
pub const IDENTITY_HEADER: &str = "x-user-id";

/// Shared server state passed to all handlers via axum State.
pub struct ServerState {
    core: Arc<SessionManager>,
    token: Option<String>,
    connections: RwLock<HashMap<String, ProtocolHandler>>,
}

/// HTTP transport for web-based MCP clients.
pub struct HttpTransport {
    state: Arc<ServerState>,
}

impl HttpTransport {
    pub fn new(core: Arc<SessionManager>, token: Option<String>) -> Self {
        Self {
            state: Arc::new(ServerState {
                core,
                token,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn router(&self) -> Router {
        let state = self.state.clone();
        Router::new()
            .route("/mcp", post(handle_post).delete(handle_delete))
            .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
            .route("/health", get(handle_health))
            .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
            .with_state(state)
    }

    /// Run the HTTP server on the given address until Ctrl-C.
    pub async fn run(&self, addr: &str) -> McpResult<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(McpError::Io)?;

        tracing::info!("HTTP transport listening on {addr}");

        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
            tracing::info!("Ctrl-C received, shutting down HTTP transport");
        })
        .await
    }

    /// Serve on `listener` until `shutdown` resolves, then let in-flight
    /// requests finish.
    pub async fn serve<F>(&self, listener: tokio::net::TcpListener, shutdown: F) -> McpResult<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| McpError::Transport(e.to_string()))
    }
}

fn error_response(status: StatusCode, id: RequestId, error: McpError) -> Response {
    let body = JsonRpcMessage::Error(error.to_json_rpc_error(id)).to_value();
    (status, AxumJson(body)).into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Auth middleware: checks the bearer token if one is configured.
/// /health is handled by a separate route that bypasses this layer.
async fn auth_layer(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: middleware::Next,
) -> Response {
    if let Some(expected) = &state.token {
        let authorized = header(&headers, "authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected);

        if !authorized {
            return error_response(StatusCode::UNAUTHORIZED, RequestId::Null, McpError::Unauthorized);
        }
    }

    next.run(request).await
}

async fn handle_post(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message = match framing::decode(&body) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Rejected HTTP payload: {e}");
            return error_response(StatusCode::BAD_REQUEST, framing::recover_id(&body), e);
        }
    };

    let (handler, fresh) = match header(&headers, SESSION_HEADER) {
        Some(session_id) => {
            let known = state.connections.read().await.get(session_id).cloned();
            match known {
                Some(handler) => (handler, false),
                None => {
                    return error_response(
                        StatusCode::NOT_FOUND,
                        message.id().cloned().unwrap_or(RequestId::Null),
                        McpError::SessionNotFound(session_id.to_string()),
                    )
                }
            }
        }
        None if message.method() == Some("initialize") => {
            let identity = header(&headers, IDENTITY_HEADER).map(str::to_string);
            (ProtocolHandler::connect(state.core.clone(), identity).await, true)
        }
        None => {
            return error_response(
                StatusCode::BAD_REQUEST,
                message.id().cloned().unwrap_or(RequestId::Null),
                McpError::InvalidRequest("Missing Mcp-Session-Id header".to_string()),
            )
        }
    };

    let session_id = handler.session_id().to_string();
    let reply = handler.handle_message(message).await;

    if fresh {
        let initialized = reply.as_ref().is_some_and(|r| r.get("result").is_some());
        if !initialized {
            if let Err(e) = handler.disconnect().await {
                tracing::warn!("Failed to close session {session_id}: {e}");
            }
            return match reply {
                Some(reply) => (StatusCode::OK, AxumJson(reply)).into_response(),
                None => StatusCode::ACCEPTED.into_response(),
            };
        }
        state
            .connections
            .write()
            .await
            .insert(session_id.clone(), handler.clone());
    } else if handler.session().await.map_or(true, |s| s.is_closed()) {
        state.connections.write().await.remove(&session_id);
    }

    match reply {
        Some(reply) => ([(SESSION_HEADER, session_id)], AxumJson(reply)).into_response(),
        None => (StatusCode::ACCEPTED, [(SESSION_HEADER, session_id)]).into_response(),
    }
}

async fn handle_delete(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let Some(session_id) = header(&headers, SESSION_HEADER) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            RequestId::Null,
            McpError::InvalidRequest("Missing Mcp-Session-Id header".to_string()),
        );
    };

    let removed = state.connections.write().await.remove(session_id);
    match removed {
        Some(handler) => match handler.disconnect().await {
            Ok(_) => StatusCode::NO_CONTENT.into_response(),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, RequestId::Null, e),
        },
        None => error_response(
            StatusCode::NOT_FOUND,
            RequestId::Null,
            McpError::SessionNotFound(session_id.to_string()),
        ),
    }
}

/// Health check endpoint. No auth required.
async fn handle_health(State(state): State<Arc<ServerState>>) -> AxumJson<serde_json::Value> {
    AxumJson(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.connections.read().await.len(),
        "sessions": state.core.ledger().sessions.count().await,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::config::ServerConfig;

    fn transport(token: Option<&str>) -> HttpTransport {
        let core = Arc::new(SessionManager::in_memory(ServerConfig::default()).unwrap());
        HttpTransport::new(core, token.map(str::to_string))
    }

    fn post(body: &str, session: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .header("authorization", "Bearer secret");
        if let Some(session) = session {
            builder = builder.header(SESSION_HEADER, session);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_issues_session() {
        let transport = transport(Some("secret"));
        let init = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18"}}"#;

        let response = transport.router().oneshot(post(init, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let session = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();
        assert_eq!(json_body(response).await["result"]["protocolVersion"], "2025-06-18");

        let ping = r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#;
        let response = transport
            .router()
            .oneshot(post(ping, Some(&session)))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["id"], 2);

        let note = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let response = transport
            .router()
            .oneshot(post(note, Some(&session)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    async fn connections(transport: &HttpTransport) -> u64 {
        let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = transport.router().oneshot(health).await.unwrap();
        json_body(response).await["connections"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn test_failed_initialize_and_shutdown_release_connection() {
        let transport = transport(Some("secret"));

        let bad = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":7}}"#;
        let response = transport.router().oneshot(post(bad, None)).await.unwrap();
        assert!(response.headers().get(SESSION_HEADER).is_none());
        assert_eq!(json_body(response).await["error"]["code"], -32602);
        assert_eq!(connections(&transport).await, 0);

        let init = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18"}}"#;
        let response = transport.router().oneshot(post(init, None)).await.unwrap();
        let session = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();
        assert_eq!(connections(&transport).await, 1);

        let shutdown = r#"{"jsonrpc":"2.0","id":2,"method":"shutdown"}"#;
        let response = transport
            .router()
            .oneshot(post(shutdown, Some(&session)))
            .await
            .unwrap();
        assert!(json_body(response).await["result"].is_object());
        assert_eq!(connections(&transport).await, 0);
    }

    #[tokio::test]
    async fn test_serve_returns_on_shutdown_signal() {
        let transport = transport(None);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            transport
                .serve(listener, async {
                    let _ = stopped.await;
                })
                .await
        });
        stop.send(()).unwrap();

        let served = tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(served.is_ok());
    }

    #[tokio::test]
    async fn test_requires_token_and_session() {
        let transport = transport(Some("secret"));

        let unauthorized = Request::builder()
            .method("POST")
            .uri("/mcp")
            .body(Body::from("{}"))
            .unwrap();
        let response = transport.router().oneshot(unauthorized).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let ping = r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#;
        let response = transport.router().oneshot(post(ping, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = transport
            .router()
            .oneshot(post(ping, Some("missing")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = transport.router().oneshot(health).await.unwrap();
        assert_eq!(json_body(response).await["status"], "ok");
    }
}
