//! Session store: durable session records and their message logs.
//!
//! Each session lives in its own row behind its own lock. The row map is only
//! locked long enough to find or insert a row, so work on one session never
//! blocks another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::types::{
    ConsentState, Message, MessageType, NewMessage, Session, SessionRole, SessionStatus,
    SwitchboardError, SwitchboardResult,
};

struct SessionRow {
    session: Session,
    messages: Vec<Message>,
}

/// What `negotiate` records on a session.
#[derive(Debug, Clone)]
pub struct Negotiation {
    pub protocol_version: String,
    pub client_capabilities: Value,
    pub client_info: Value,
    pub server_capabilities: Value,
    pub server_info: Value,
}

/// Store of all sessions known to this process.
pub struct SessionStore {
    rows: RwLock<HashMap<String, Arc<Mutex<SessionRow>>>>,
    next_message_id: AtomicU64,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            next_message_id: AtomicU64::new(1),
        }
    }

    async fn row(&self, session_id: &str) -> SwitchboardResult<Arc<Mutex<SessionRow>>> {
        self.rows
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SwitchboardError::SessionNotFound(session_id.to_string()))
    }

    /// Create a fresh session in `pre_initialize`.
    pub async fn create_session(&self, role: SessionRole) -> Session {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Session::new(id.clone(), role);
        let row = SessionRow {
            session: session.clone(),
            messages: Vec::new(),
        };
        self.rows
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(row)));
        tracing::info!("Created session {id}");
        session
    }

    pub async fn get(&self, session_id: &str) -> SwitchboardResult<Session> {
        let row = self.row(session_id).await?;
        let row = row.lock().await;
        Ok(row.session.clone())
    }

    /// All sessions, oldest first.
    pub async fn list(&self) -> Vec<Session> {
        let rows: Vec<_> = self.rows.read().await.values().cloned().collect();
        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            sessions.push(row.lock().await.session.clone());
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub async fn count(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Record the initialize handshake and move the session to `initialized`.
    pub async fn negotiate(
        &self,
        session_id: &str,
        negotiation: Negotiation,
    ) -> SwitchboardResult<Session> {
        let row = self.row(session_id).await?;
        let mut row = row.lock().await;
        let session = &mut row.session;

        if session.status != SessionStatus::PreInitialize {
            return Err(SwitchboardError::InvalidState(format!(
                "session {session_id} is {}, expected pre_initialize",
                session.status
            )));
        }

        session.status = SessionStatus::Initialized;
        session.protocol_version = Some(negotiation.protocol_version);
        session.client_capabilities = negotiation.client_capabilities;
        session.client_info = negotiation.client_info;
        session.server_capabilities = negotiation.server_capabilities;
        session.server_info = negotiation.server_info;
        session.updated_at = Utc::now();

        tracing::info!(
            "Session {session_id} initialized with client {} v{}",
            session.client_name().unwrap_or("unknown"),
            session.client_version().unwrap_or("unknown")
        );
        Ok(session.clone())
    }

    /// Mark the client's `initialized` confirmation.
    pub async fn confirm_initialized(&self, session_id: &str) -> SwitchboardResult<()> {
        let row = self.row(session_id).await?;
        let mut row = row.lock().await;
        if row.session.status != SessionStatus::Initialized {
            return Err(SwitchboardError::InvalidState(format!(
                "session {session_id} is {}, expected initialized",
                row.session.status
            )));
        }
        row.session.initialized = true;
        row.session.updated_at = Utc::now();
        Ok(())
    }

    /// Append a message to the session log.
    pub async fn record_message(
        &self,
        session_id: &str,
        message: NewMessage,
    ) -> SwitchboardResult<Message> {
        let row = self.row(session_id).await?;
        let mut row = row.lock().await;

        if row.session.is_closed() {
            return Err(SwitchboardError::SessionClosed(session_id.to_string()));
        }

        let now = Utc::now();

        if message.message_type.is_response() {
            if let Some(jsonrpc_id) = &message.jsonrpc_id {
                let request_pos = row.messages.iter().rposition(|m| {
                    m.message_type == MessageType::Request
                        && m.jsonrpc_id.as_deref() == Some(jsonrpc_id.as_str())
                });

                if let Some(pos) = request_pos {
                    let already_answered = row.messages[pos + 1..].iter().any(|m| {
                        m.message_type.is_response()
                            && m.jsonrpc_id.as_deref() == Some(jsonrpc_id.as_str())
                    });
                    if already_answered {
                        return Err(SwitchboardError::InvalidState(format!(
                            "request {jsonrpc_id} already has a response"
                        )));
                    }

                    let request = &mut row.messages[pos];
                    if request.request_cancelled {
                        return Err(SwitchboardError::InvalidState(format!(
                            "request {jsonrpc_id} was cancelled"
                        )));
                    }
                    request.request_acknowledged = true;
                    request.updated_at = now;
                }
            }
        }

        let recorded = Message {
            id: self.next_message_id.fetch_add(1, Ordering::Relaxed),
            session_id: session_id.to_string(),
            direction: message.direction,
            message_type: message.message_type,
            jsonrpc_id: message.jsonrpc_id,
            message_text: message.message_text,
            message_json: message.message_json,
            is_ping: message.is_ping,
            request_acknowledged: false,
            request_cancelled: false,
            created_at: now,
            updated_at: now,
        };

        row.messages.push(recorded.clone());
        row.session.messages_count += 1;
        row.session.updated_at = now;
        Ok(recorded)
    }

    /// Flag the latest unanswered request with this id as cancelled.
    /// Returns `false` if no such request exists or it was already answered.
    pub async fn mark_request_cancelled(
        &self,
        session_id: &str,
        jsonrpc_id: &str,
    ) -> SwitchboardResult<bool> {
        let row = self.row(session_id).await?;
        let mut row = row.lock().await;

        let Some(request) = row.messages.iter_mut().rev().find(|m| {
            m.message_type == MessageType::Request && m.jsonrpc_id.as_deref() == Some(jsonrpc_id)
        }) else {
            return Ok(false);
        };

        if request.request_acknowledged {
            return Ok(false);
        }
        request.request_cancelled = true;
        request.updated_at = Utc::now();
        Ok(true)
    }

    /// Messages of a session in recording order.
    pub async fn messages(&self, session_id: &str) -> SwitchboardResult<Vec<Message>> {
        let row = self.row(session_id).await?;
        let row = row.lock().await;
        Ok(row.messages.clone())
    }

    /// Close a session. Idempotent: only the first call sets `ended_at`.
    pub async fn close_session(&self, session_id: &str) -> SwitchboardResult<Session> {
        let row = self.row(session_id).await?;
        let mut row = row.lock().await;

        if !row.session.is_closed() {
            let now = Utc::now();
            row.session.status = SessionStatus::Closed;
            row.session.ended_at = Some(now);
            row.session.updated_at = now;
            tracing::info!("Closed session {session_id}");
        }
        Ok(row.session.clone())
    }

    pub async fn grant_consent(&self, session_id: &str, key: &str) -> SwitchboardResult<()> {
        self.set_consent(session_id, key, ConsentState::Granted).await
    }

    pub async fn revoke_consent(&self, session_id: &str, key: &str) -> SwitchboardResult<()> {
        self.set_consent(session_id, key, ConsentState::Denied).await
    }

    pub async fn consent_granted(&self, session_id: &str, key: &str) -> SwitchboardResult<bool> {
        Ok(self.get(session_id).await?.consent_granted(key))
    }

    async fn set_consent(
        &self,
        session_id: &str,
        key: &str,
        state: ConsentState,
    ) -> SwitchboardResult<()> {
        let row = self.row(session_id).await?;
        let mut row = row.lock().await;
        if row.session.is_closed() {
            return Err(SwitchboardError::SessionClosed(session_id.to_string()));
        }
        row.session.consents.insert(key.to_string(), state);
        row.session.updated_at = Utc::now();
        Ok(())
    }

    /// Remove a session together with its messages. Returns the number of
    /// messages removed.
    pub async fn remove_session(&self, session_id: &str) -> SwitchboardResult<usize> {
        let row = self
            .rows
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| SwitchboardError::SessionNotFound(session_id.to_string()))?;
        let removed = row.lock().await.messages.len();
        tracing::info!("Removed session {session_id} ({removed} messages)");
        Ok(removed)
    }

    /// Copy out every session and message, messages in id order.
    pub async fn snapshot(&self) -> (Vec<Session>, Vec<Message>) {
        let rows: Vec<_> = self.rows.read().await.values().cloned().collect();
        let mut sessions = Vec::with_capacity(rows.len());
        let mut messages = Vec::new();
        for row in rows {
            let row = row.lock().await;
            sessions.push(row.session.clone());
            messages.extend(row.messages.iter().cloned());
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        messages.sort_by_key(|m| m.id);
        (sessions, messages)
    }

    /// Replace the store contents. Messages whose session is missing are dropped.
    pub async fn restore(&self, sessions: Vec<Session>, messages: Vec<Message>) {
        let mut rows: HashMap<String, SessionRow> = sessions
            .into_iter()
            .map(|s| {
                (
                    s.id.clone(),
                    SessionRow {
                        session: s,
                        messages: Vec::new(),
                    },
                )
            })
            .collect();

        let mut max_id = 0;
        let mut orphans = 0usize;
        for message in messages {
            max_id = max_id.max(message.id);
            match rows.get_mut(&message.session_id) {
                Some(row) => row.messages.push(message),
                None => orphans += 1,
            }
        }
        if orphans > 0 {
            tracing::warn!("Dropped {orphans} messages without a session");
        }
        for row in rows.values_mut() {
            row.messages.sort_by_key(|m| m.id);
        }

        let mut map = self.rows.write().await;
        *map = rows
            .into_iter()
            .map(|(id, row)| (id, Arc::new(Mutex::new(row))))
            .collect();
        self.next_message_id.store(max_id + 1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageDirection;
    use serde_json::json;

    fn negotiation() -> Negotiation {
        Negotiation {
            protocol_version: "2025-06-18".to_string(),
            client_capabilities: json!({}),
            client_info: json!({"name": "test-client", "version": "1.0"}),
            server_capabilities: json!({"tools": {}}),
            server_info: json!({"name": "switchboard", "version": "0.1.0"}),
        }
    }

    #[tokio::test]
    async fn test_create_starts_pre_initialize() {
        let store = SessionStore::new();
        let session = store.create_session(SessionRole::Server).await;
        assert_eq!(session.status, SessionStatus::PreInitialize);
        assert_eq!(session.messages_count, 0);
        assert!(!session.id.is_empty());
    }

    #[tokio::test]
    async fn test_negotiate_only_once() {
        let store = SessionStore::new();
        let session = store.create_session(SessionRole::Server).await;

        let negotiated = store.negotiate(&session.id, negotiation()).await.unwrap();
        assert_eq!(negotiated.status, SessionStatus::Initialized);
        assert_eq!(negotiated.client_name(), Some("test-client"));

        let err = store.negotiate(&session.id, negotiation()).await.unwrap_err();
        assert!(matches!(err, SwitchboardError::InvalidState(_)));
        assert_eq!(
            store.get(&session.id).await.unwrap().status,
            SessionStatus::Initialized
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = SessionStore::new();
        let session = store.create_session(SessionRole::Server).await;

        let first = store.close_session(&session.id).await.unwrap();
        let ended_at = first.ended_at.expect("ended_at set on close");
        let second = store.close_session(&session.id).await.unwrap();

        assert_eq!(second.status, SessionStatus::Closed);
        assert_eq!(second.ended_at, Some(ended_at));
    }

    #[tokio::test]
    async fn test_closed_session_rejects_messages_and_negotiation() {
        let store = SessionStore::new();
        let session = store.create_session(SessionRole::Server).await;
        store.close_session(&session.id).await.unwrap();

        let err = store
            .record_message(&session.id, NewMessage::request("1", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::SessionClosed(_)));

        let err = store.negotiate(&session.id, negotiation()).await.unwrap_err();
        assert!(matches!(err, SwitchboardError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_record_increments_counter_and_acknowledges() {
        let store = SessionStore::new();
        let session = store.create_session(SessionRole::Server).await;

        store
            .record_message(&session.id, NewMessage::request("7", json!({"method": "ping"})))
            .await
            .unwrap();
        store
            .record_message(&session.id, NewMessage::response("7", json!({})))
            .await
            .unwrap();

        let messages = store.messages(&session.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].request_acknowledged);
        assert!(messages[0].id < messages[1].id);
        assert_eq!(store.get(&session.id).await.unwrap().messages_count, 2);
    }

    #[tokio::test]
    async fn test_second_response_rejected() {
        let store = SessionStore::new();
        let session = store.create_session(SessionRole::Server).await;

        store
            .record_message(&session.id, NewMessage::request("1", json!({})))
            .await
            .unwrap();
        store
            .record_message(&session.id, NewMessage::response("1", json!({})))
            .await
            .unwrap();
        let err = store
            .record_message(&session.id, NewMessage::error("1", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::InvalidState(_)));

        // A reused id after the first exchange completes is a new request.
        store
            .record_message(&session.id, NewMessage::request("1", json!({})))
            .await
            .unwrap();
        store
            .record_message(&session.id, NewMessage::response("1", json!({})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_request_accepts_no_response() {
        let store = SessionStore::new();
        let session = store.create_session(SessionRole::Server).await;

        store
            .record_message(&session.id, NewMessage::request("9", json!({})))
            .await
            .unwrap();
        assert!(store.mark_request_cancelled(&session.id, "9").await.unwrap());
        assert!(!store.mark_request_cancelled(&session.id, "404").await.unwrap());

        let err = store
            .record_message(&session.id, NewMessage::response("9", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::InvalidState(_)));
        assert!(store.messages(&session.id).await.unwrap()[0].request_cancelled);
    }

    #[tokio::test]
    async fn test_response_order_follows_request_order() {
        let store = SessionStore::new();
        let session = store.create_session(SessionRole::Server).await;

        for id in ["a", "b"] {
            store
                .record_message(&session.id, NewMessage::request(id, json!({})))
                .await
                .unwrap();
        }
        for id in ["a", "b"] {
            store
                .record_message(&session.id, NewMessage::response(id, json!({})))
                .await
                .unwrap();
        }

        let responses: Vec<_> = store
            .messages(&session.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.direction == MessageDirection::Server)
            .collect();
        assert_eq!(responses[0].jsonrpc_id.as_deref(), Some("a"));
        assert!(responses[0].id < responses[1].id);
        assert!(responses[0].created_at <= responses[1].created_at);
    }

    #[tokio::test]
    async fn test_consents() {
        let store = SessionStore::new();
        let session = store.create_session(SessionRole::Server).await;

        assert!(!store.consent_granted(&session.id, "tools").await.unwrap());
        store.grant_consent(&session.id, "tools").await.unwrap();
        assert!(store.consent_granted(&session.id, "tools").await.unwrap());
        store.revoke_consent(&session.id, "tools").await.unwrap();
        assert!(!store.consent_granted(&session.id, "tools").await.unwrap());
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let store = Arc::new(SessionStore::new());
        let a = store.create_session(SessionRole::Server).await;
        let b = store.create_session(SessionRole::Server).await;

        let row_a = store.row(&a.id).await.unwrap();
        let _held = row_a.lock().await;

        // Session b stays usable while a's row is locked.
        store
            .record_message(&b.id, NewMessage::request("1", json!({})))
            .await
            .unwrap();
        assert_eq!(store.get(&b.id).await.unwrap().messages_count, 1);
    }

    #[tokio::test]
    async fn test_remove_cascades_and_restore() {
        let store = SessionStore::new();
        let session = store.create_session(SessionRole::Server).await;
        store
            .record_message(&session.id, NewMessage::request("1", json!({})))
            .await
            .unwrap();

        let (sessions, messages) = store.snapshot().await;
        assert_eq!(store.remove_session(&session.id).await.unwrap(), 1);
        assert!(store.get(&session.id).await.is_err());

        store.restore(sessions, messages).await;
        assert_eq!(store.messages(&session.id).await.unwrap().len(), 1);

        let next = store
            .record_message(&session.id, NewMessage::response("1", json!({})))
            .await
            .unwrap();
        assert_eq!(next.id, 2);
    }
}
