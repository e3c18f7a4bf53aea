//! The ledger owns the session store and task tracker and persists both.

use std::path::Path;

use crate::session::SessionStore;
use crate::storage::{SnapshotReader, SnapshotWriter, StoreSnapshot};
use crate::task::TaskTracker;
use crate::types::SwitchboardResult;

/// Sessions, their messages, and their tasks.
pub struct Ledger {
    pub sessions: SessionStore,
    pub tasks: TaskTracker,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(TaskTracker::default())
    }
}

impl Ledger {
    pub fn new(tasks: TaskTracker) -> Self {
        Self {
            sessions: SessionStore::new(),
            tasks,
        }
    }

    /// Remove a session with its messages and tasks.
    pub async fn remove_session(&self, session_id: &str) -> SwitchboardResult<()> {
        let messages = self.sessions.remove_session(session_id).await?;
        let tasks = self.tasks.purge_session(session_id).await;
        tracing::debug!("Removed session {session_id}: {messages} messages, {tasks} tasks");
        Ok(())
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let (sessions, messages) = self.sessions.snapshot().await;
        StoreSnapshot {
            sessions,
            messages,
            tasks: self.tasks.snapshot().await,
        }
    }

    /// Replace the ledger contents. Tasks whose session is missing are dropped.
    pub async fn restore(&self, snapshot: StoreSnapshot) {
        let StoreSnapshot {
            sessions,
            messages,
            tasks,
        } = snapshot;
        let tasks: Vec<_> = tasks
            .into_iter()
            .filter(|t| sessions.iter().any(|s| s.id == t.session_id))
            .collect();
        self.sessions.restore(sessions, messages).await;
        self.tasks.restore(tasks).await;
    }

    pub async fn save(&self, path: &Path) -> SwitchboardResult<()> {
        let snapshot = self.snapshot().await;
        SnapshotWriter::write_to_file(&snapshot, path)?;
        tracing::debug!(
            "Saved {} sessions, {} messages, {} tasks to {}",
            snapshot.sessions.len(),
            snapshot.messages.len(),
            snapshot.tasks.len(),
            path.display()
        );
        Ok(())
    }

    /// Load a snapshot from `path`. A missing file leaves the ledger empty.
    pub async fn load(&self, path: &Path) -> SwitchboardResult<()> {
        if !path.exists() {
            return Ok(());
        }
        let snapshot = SnapshotReader::read_from_file(path)?;
        tracing::info!(
            "Loaded {} sessions and {} tasks from {}",
            snapshot.sessions.len(),
            snapshot.tasks.len(),
            path.display()
        );
        self.restore(snapshot).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskRequest;
    use crate::types::{NewMessage, SessionRole, TaskStatus};
    use serde_json::json;

    #[tokio::test]
    async fn test_remove_session_cascades() {
        let ledger = Ledger::default();
        let session = ledger.sessions.create_session(SessionRole::Server).await;
        let other = ledger.sessions.create_session(SessionRole::Server).await;
        ledger
            .sessions
            .record_message(&session.id, NewMessage::request("1", json!({})))
            .await
            .unwrap();
        ledger
            .tasks
            .create(&session.id, TaskRequest::new("tools/call"))
            .await;
        ledger
            .tasks
            .create(&other.id, TaskRequest::new("tools/call"))
            .await;

        ledger.remove_session(&session.id).await.unwrap();
        assert!(ledger.sessions.get(&session.id).await.is_err());
        assert!(ledger.tasks.list(Some(&session.id), None).await.is_empty());
        assert_eq!(ledger.tasks.count().await, 1);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.swbd");

        let ledger = Ledger::default();
        let session = ledger.sessions.create_session(SessionRole::Server).await;
        let task = ledger
            .tasks
            .create(&session.id, TaskRequest::new("tools/call").name("count_to"))
            .await;
        ledger.save(&path).await.unwrap();

        let loaded = Ledger::default();
        loaded.load(&path).await.unwrap();
        assert_eq!(loaded.sessions.count().await, 1);
        assert_eq!(
            loaded.tasks.get(&task.id).await.unwrap().status,
            TaskStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::default();
        ledger.load(&dir.path().join("absent.swbd")).await.unwrap();
        assert_eq!(ledger.sessions.count().await, 0);
    }
}
