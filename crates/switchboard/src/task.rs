//! Task tracker: state machine for long-running invocations.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::types::{
    empty_object, SwitchboardError, SwitchboardResult, Task, TaskSnapshot, TaskStatus,
};

/// Default time to live for tasks (milliseconds).
pub const DEFAULT_TASK_TTL_MS: u64 = 60 * 60 * 1000;

/// Default suggested polling interval (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Longest TTL a caller may request (30 days, milliseconds).
pub const MAX_TASK_TTL_MS: u64 = 30 * 24 * 60 * 60 * 1000;

const RESTART_MESSAGE: &str = "Interrupted by server restart";

struct TaskRow {
    task: Task,
    token: CancellationToken,
}

/// What the caller asked to run as a task.
#[derive(Debug, Clone, Default)]
pub struct TaskRequest {
    pub method: String,
    pub name: Option<String>,
    pub params: Option<Value>,
    /// Overrides the tracker's default TTL.
    pub ttl: Option<u64>,
}

impl TaskRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn ttl(mut self, ttl: Option<u64>) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Tracks every task. Rows are locked individually.
pub struct TaskTracker {
    rows: RwLock<HashMap<String, Arc<Mutex<TaskRow>>>>,
    default_ttl: u64,
    default_poll_interval: u64,
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_TTL_MS, DEFAULT_POLL_INTERVAL_MS)
    }
}

impl TaskTracker {
    pub fn new(default_ttl: u64, default_poll_interval: u64) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            default_ttl,
            default_poll_interval,
        }
    }

    async fn row(&self, task_id: &str) -> SwitchboardResult<Arc<Mutex<TaskRow>>> {
        self.rows
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| SwitchboardError::TaskNotFound(task_id.to_string()))
    }

    /// Create a task in `working`.
    pub async fn create(&self, session_id: &str, request: TaskRequest) -> Task {
        let now = Utc::now();
        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            status: TaskStatus::Working,
            status_message: None,
            request_method: Some(request.method),
            request_name: request.name,
            request_params: request.params,
            result_payload: None,
            ttl: Some(request.ttl.unwrap_or(self.default_ttl).min(MAX_TASK_TTL_MS)),
            poll_interval: Some(self.default_poll_interval),
            continuation_state: empty_object(),
            progress_percent: None,
            progress_message: None,
            last_step_at: None,
            last_updated_at: now,
            created_at: now,
            updated_at: now,
        };

        let row = TaskRow {
            task: task.clone(),
            token: CancellationToken::new(),
        };
        self.rows
            .write()
            .await
            .insert(task.id.clone(), Arc::new(Mutex::new(row)));

        tracing::debug!(
            "Created task {} for {} in session {session_id}",
            task.id,
            task.request_name.as_deref().unwrap_or("-")
        );
        task
    }

    pub async fn get(&self, task_id: &str) -> SwitchboardResult<Task> {
        let row = self.row(task_id).await?;
        let row = row.lock().await;
        Ok(row.task.clone())
    }

    /// Current status, progress and result. Never waits on the task itself.
    pub async fn poll(&self, task_id: &str) -> SwitchboardResult<TaskSnapshot> {
        Ok(self.get(task_id).await?.snapshot())
    }

    /// Token cancelled when the task is cancelled.
    pub async fn cancellation_token(&self, task_id: &str) -> SwitchboardResult<CancellationToken> {
        let row = self.row(task_id).await?;
        let row = row.lock().await;
        Ok(row.token.clone())
    }

    /// Run `f` on a working task.
    async fn step<F>(&self, task_id: &str, f: F) -> SwitchboardResult<Task>
    where
        F: FnOnce(&mut Task),
    {
        let row = self.row(task_id).await?;
        let mut row = row.lock().await;
        if row.task.status.is_terminal() {
            return Err(SwitchboardError::InvalidState(format!(
                "task {task_id} is {}",
                row.task.status
            )));
        }
        f(&mut row.task);
        let now = Utc::now();
        row.task.last_updated_at = now;
        row.task.updated_at = now;
        if row.task.status.is_terminal() {
            row.task.continuation_state = empty_object();
        }
        Ok(row.task.clone())
    }

    pub async fn update_progress(
        &self,
        task_id: &str,
        percent: Option<u8>,
        message: Option<String>,
    ) -> SwitchboardResult<Task> {
        self.step(task_id, |task| {
            if let Some(percent) = percent {
                task.progress_percent = Some(percent.min(100));
            }
            if message.is_some() {
                task.progress_message = message;
            }
            task.last_step_at = Some(Utc::now());
        })
        .await
    }

    /// Store opaque state so a unit can resume where it left off.
    pub async fn set_continuation(&self, task_id: &str, state: Value) -> SwitchboardResult<Task> {
        self.step(task_id, |task| {
            task.continuation_state = state;
            task.last_step_at = Some(Utc::now());
        })
        .await
    }

    pub async fn complete(&self, task_id: &str, result: Value) -> SwitchboardResult<Task> {
        let task = self
            .step(task_id, |task| {
                task.status = TaskStatus::Completed;
                task.result_payload = Some(result);
                task.progress_percent = Some(100);
            })
            .await?;
        tracing::debug!("Task {task_id} completed");
        Ok(task)
    }

    pub async fn fail(&self, task_id: &str, error: impl Into<String>) -> SwitchboardResult<Task> {
        let error = error.into();
        let task = self
            .step(task_id, |task| {
                task.status = TaskStatus::Failed;
                task.status_message = Some(error);
            })
            .await?;
        tracing::warn!(
            "Task {task_id} failed: {}",
            task.status_message.as_deref().unwrap_or("")
        );
        Ok(task)
    }

    /// Cancel a working task. Cancelling a cancelled task succeeds without effect.
    pub async fn cancel(&self, task_id: &str) -> SwitchboardResult<Task> {
        let row = self.row(task_id).await?;
        let mut row = row.lock().await;

        match row.task.status {
            TaskStatus::Cancelled => return Ok(row.task.clone()),
            TaskStatus::Working => {}
            other => {
                return Err(SwitchboardError::InvalidState(format!(
                    "task {task_id} is {other}"
                )))
            }
        }

        let now = Utc::now();
        row.task.status = TaskStatus::Cancelled;
        row.task.status_message = Some("Cancelled by client".to_string());
        row.task.continuation_state = empty_object();
        row.task.last_updated_at = now;
        row.task.updated_at = now;
        row.token.cancel();

        tracing::info!("Task {task_id} cancelled");
        Ok(row.task.clone())
    }

    /// Tasks, optionally filtered, oldest first.
    pub async fn list(
        &self,
        session_id: Option<&str>,
        status: Option<TaskStatus>,
    ) -> Vec<Task> {
        let rows: Vec<_> = self.rows.read().await.values().cloned().collect();
        let mut tasks = Vec::new();
        for row in rows {
            let row = row.lock().await;
            let task = &row.task;
            if session_id.is_some_and(|s| s != task.session_id) {
                continue;
            }
            if status.is_some_and(|s| s != task.status) {
                continue;
            }
            tasks.push(task.clone());
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    pub async fn count(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Drop every task of a session, cancelling any still working.
    pub async fn purge_session(&self, session_id: &str) -> usize {
        let mut map = self.rows.write().await;
        let mut doomed = Vec::new();
        for (id, row) in map.iter() {
            let row = row.lock().await;
            if row.task.session_id == session_id {
                row.token.cancel();
                doomed.push(id.clone());
            }
        }
        for id in &doomed {
            map.remove(id);
        }
        doomed.len()
    }

    /// Remove terminal tasks whose TTL has elapsed since their last update.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut map = self.rows.write().await;
        let mut expired = Vec::new();
        for (id, row) in map.iter() {
            let row = row.lock().await;
            let task = &row.task;
            if !task.status.is_terminal() {
                continue;
            }
            let ttl = task.ttl.unwrap_or(self.default_ttl);
            // A deadline past the representable range never expires.
            let deadline = i64::try_from(ttl)
                .ok()
                .and_then(Duration::try_milliseconds)
                .and_then(|ttl| task.last_updated_at.checked_add_signed(ttl));
            if deadline.is_some_and(|deadline| deadline <= now) {
                expired.push(id.clone());
            }
        }
        for id in &expired {
            map.remove(id);
        }
        if !expired.is_empty() {
            tracing::debug!("Cleaned up {} expired tasks", expired.len());
        }
        expired.len()
    }

    pub async fn snapshot(&self) -> Vec<Task> {
        self.list(None, None).await
    }

    /// Replace the tracker contents. Tasks that were still working when the
    /// snapshot was taken cannot resume and are marked failed.
    pub async fn restore(&self, tasks: Vec<Task>) {
        let now = Utc::now();
        let rows = tasks
            .into_iter()
            .map(|mut task| {
                if task.status == TaskStatus::Working {
                    task.status = TaskStatus::Failed;
                    task.status_message = Some(RESTART_MESSAGE.to_string());
                    task.continuation_state = empty_object();
                    task.last_updated_at = now;
                    task.updated_at = now;
                }
                if task.status != TaskStatus::Completed {
                    task.result_payload = None;
                }
                let row = TaskRow {
                    task,
                    token: CancellationToken::new(),
                };
                (row.task.id.clone(), Arc::new(Mutex::new(row)))
            })
            .collect();
        *self.rows.write().await = rows;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> TaskRequest {
        TaskRequest::new("tools/call")
            .name("count_to")
            .params(json!({"target": 3}))
    }

    #[tokio::test]
    async fn test_create_is_working() {
        let tracker = TaskTracker::default();
        let task = tracker.create("s1", request()).await;
        assert_eq!(task.status, TaskStatus::Working);
        assert_eq!(task.ttl, Some(DEFAULT_TASK_TTL_MS));
        assert_eq!(task.request_name.as_deref(), Some("count_to"));
        assert!(task.result_payload.is_none());
    }

    #[tokio::test]
    async fn test_progress_then_complete() {
        let tracker = TaskTracker::default();
        let task = tracker.create("s1", request()).await;

        tracker
            .update_progress(&task.id, Some(150), Some("step 1".to_string()))
            .await
            .unwrap();
        let snap = tracker.poll(&task.id).await.unwrap();
        assert_eq!(snap.progress_percent, Some(100));
        assert_eq!(snap.progress_message.as_deref(), Some("step 1"));

        tracker
            .set_continuation(&task.id, json!({"next": 2}))
            .await
            .unwrap();
        assert!(tracker.get(&task.id).await.unwrap().has_continuation());

        let done = tracker.complete(&task.id, json!({"ok": true})).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result_payload, Some(json!({"ok": true})));
        assert!(!done.has_continuation());
    }

    #[tokio::test]
    async fn test_terminal_rejects_transitions() {
        let tracker = TaskTracker::default();
        let task = tracker.create("s1", request()).await;
        tracker.fail(&task.id, "boom").await.unwrap();

        for result in [
            tracker.update_progress(&task.id, Some(10), None).await,
            tracker.complete(&task.id, json!(1)).await,
            tracker.cancel(&task.id).await,
        ] {
            assert!(matches!(result, Err(SwitchboardError::InvalidState(_))));
        }

        let failed = tracker.get(&task.id).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.status_message.as_deref(), Some("boom"));
        assert!(failed.result_payload.is_none());
    }

    #[tokio::test]
    async fn test_cancel_twice_is_noop() {
        let tracker = TaskTracker::default();
        let task = tracker.create("s1", request()).await;
        let token = tracker.cancellation_token(&task.id).await.unwrap();

        let first = tracker.cancel(&task.id).await.unwrap();
        assert!(token.is_cancelled());
        let second = tracker.cancel(&task.id).await.unwrap();
        assert_eq!(second.status, TaskStatus::Cancelled);
        assert_eq!(first.updated_at, second.updated_at);
    }

    #[tokio::test]
    async fn test_requested_ttl_is_capped() {
        let tracker = TaskTracker::default();
        let task = tracker
            .create("s1", request().ttl(Some(i64::MAX as u64)))
            .await;
        assert_eq!(task.ttl, Some(MAX_TASK_TTL_MS));
    }

    #[tokio::test]
    async fn test_cleanup_survives_oversized_ttl() {
        let tracker = TaskTracker::default();
        let task = tracker.create("s1", request()).await;
        let mut done = tracker.complete(&task.id, json!({})).await.unwrap();

        for ttl in [i64::MAX as u64, u64::MAX] {
            done.ttl = Some(ttl);
            tracker.restore(vec![done.clone()]).await;
            assert_eq!(tracker.cleanup_expired().await, 0);
            assert_eq!(tracker.count().await, 1);
        }

        done.ttl = Some(0);
        tracker.restore(vec![done]).await;
        assert_eq!(tracker.cleanup_expired().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let tracker = TaskTracker::default();
        assert!(matches!(
            tracker.poll("missing").await,
            Err(SwitchboardError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_and_purge() {
        let tracker = TaskTracker::default();
        let a = tracker.create("s1", request()).await;
        tracker.create("s1", request()).await;
        tracker.create("s2", request()).await;
        tracker.complete(&a.id, json!({})).await.unwrap();

        assert_eq!(tracker.list(Some("s1"), None).await.len(), 2);
        assert_eq!(
            tracker.list(None, Some(TaskStatus::Working)).await.len(),
            2
        );

        assert_eq!(tracker.purge_session("s1").await, 2);
        assert_eq!(tracker.count().await, 1);
    }

    #[tokio::test]
    async fn test_cleanup_expired_only_terminal() {
        let tracker = TaskTracker::default();
        let done = tracker
            .create("s1", request().ttl(Some(0)))
            .await;
        let running = tracker.create("s1", request().ttl(Some(0))).await;
        tracker.complete(&done.id, json!(1)).await.unwrap();

        assert_eq!(tracker.cleanup_expired().await, 1);
        assert!(tracker.get(&done.id).await.is_err());
        assert!(tracker.get(&running.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_restore_fails_working_tasks() {
        let tracker = TaskTracker::default();
        let running = tracker.create("s1", request()).await;
        let done = tracker.create("s1", request()).await;
        tracker.complete(&done.id, json!("ok")).await.unwrap();

        let snapshot = tracker.snapshot().await;
        let restored = TaskTracker::default();
        restored.restore(snapshot).await;

        let running = restored.get(&running.id).await.unwrap();
        assert_eq!(running.status, TaskStatus::Failed);
        assert_eq!(running.status_message.as_deref(), Some(RESTART_MESSAGE));
        assert_eq!(
            restored.get(&done.id).await.unwrap().result_payload,
            Some(json!("ok"))
        );
    }
}
