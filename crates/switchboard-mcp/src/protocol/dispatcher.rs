//! Invocation dispatcher: resolve, validate, run, and time-box units.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use switchboard::{InputSchema, Ledger, Session, Task, TaskRequest};

use crate::config::{ServerConfig, TimeoutPolicy};
use crate::prompts::{Prompt, PromptRegistry};
use crate::render::{RenderContext, RenderOutput};
use crate::tools::{Tool, ToolRegistry};
use crate::types::{McpError, McpResult, TaskHint};

use super::negotiation::Profile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Tool,
    Prompt,
}

impl UnitKind {
    fn method(&self) -> &'static str {
        match self {
            UnitKind::Tool => "tools/call",
            UnitKind::Prompt => "prompts/get",
        }
    }
}

/// One call of a tool or prompt.
pub struct Invocation {
    pub session: Session,
    pub profile: Arc<Profile>,
    pub kind: UnitKind,
    pub name: String,
    pub arguments: Option<Value>,
    /// Run as a task from the start. Honoured for tools only.
    pub task: Option<TaskHint>,
    /// Cancelled when the client cancels the request.
    pub token: CancellationToken,
}

/// How an invocation ended, from the caller's point of view.
#[derive(Debug)]
pub enum Dispatched {
    Completed(RenderOutput),
    /// The unit failed; `output` holds what it rendered first.
    Failed { error: String, output: RenderOutput },
    /// The unit keeps running in the background behind this task.
    Deferred(Task),
}

enum Unit {
    Tool(Arc<dyn Tool>),
    Prompt(Arc<dyn Prompt>),
}

impl Unit {
    fn schema(&self) -> &InputSchema {
        match self {
            Unit::Tool(tool) => tool.schema(),
            Unit::Prompt(prompt) => prompt.schema(),
        }
    }

    async fn run(&self, args: Map<String, Value>, ctx: &RenderContext) -> anyhow::Result<()> {
        match self {
            Unit::Tool(tool) => tool.call(args, ctx).await,
            Unit::Prompt(prompt) => prompt.render(args, ctx).await,
        }
    }
}

pub struct Dispatcher {
    tools: Arc<ToolRegistry>,
    prompts: Arc<PromptRegistry>,
    ledger: Arc<Ledger>,
    call_timeout: Duration,
    policy: TimeoutPolicy,
}

impl Dispatcher {
    pub fn new(
        tools: Arc<ToolRegistry>,
        prompts: Arc<PromptRegistry>,
        ledger: Arc<Ledger>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            tools,
            prompts,
            ledger,
            call_timeout: Duration::from_millis(config.call_timeout_ms),
            policy: config.timeout_policy,
        }
    }

    fn resolve(&self, invocation: &Invocation) -> McpResult<Unit> {
        let name = invocation.name.as_str();
        match invocation.kind {
            UnitKind::Tool => {
                if !invocation.profile.allows_tool(name) {
                    return Err(McpError::ToolNotFound(name.to_string()));
                }
                self.tools.resolve(name).map(Unit::Tool)
            }
            UnitKind::Prompt => {
                if !invocation.profile.allows_prompt(name) {
                    return Err(McpError::PromptNotFound(name.to_string()));
                }
                self.prompts.resolve(name).map(Unit::Prompt)
            }
        }
    }

    pub async fn invoke(&self, invocation: Invocation) -> McpResult<Dispatched> {
        let unit = self.resolve(&invocation)?;
        let args = unit
            .schema()
            .validate(invocation.arguments.as_ref())
            .map_err(McpError::InvalidArguments)?;

        tracing::debug!(
            "Invoking {} '{}' in session {}",
            invocation.kind.method(),
            invocation.name,
            invocation.session.id
        );

        let ctx = RenderContext::new(
            invocation.session.clone(),
            self.ledger.clone(),
            invocation.token.clone(),
        );
        let mut handle = spawn_unit(unit, args.clone(), ctx.clone());

        if invocation.kind == UnitKind::Tool {
            if let Some(hint) = &invocation.task {
                let task = self
                    .defer(&invocation, args, hint.ttl, ctx, handle)
                    .await?;
                return Ok(Dispatched::Deferred(task));
            }
        }

        tokio::select! {
            biased;
            joined = &mut handle => Ok(settle(joined, &ctx)),
            _ = invocation.token.cancelled() => {
                handle.abort();
                Err(McpError::RequestCancelled)
            }
            _ = tokio::time::sleep(self.call_timeout) => {
                let timeout_ms = self.call_timeout.as_millis() as u64;
                if invocation.kind == UnitKind::Tool && self.policy == TimeoutPolicy::Task {
                    tracing::info!(
                        "'{}' exceeded {timeout_ms} ms, continuing as a task",
                        invocation.name
                    );
                    let task = self.defer(&invocation, args, None, ctx, handle).await?;
                    Ok(Dispatched::Deferred(task))
                } else {
                    tracing::warn!("'{}' aborted after {timeout_ms} ms", invocation.name);
                    handle.abort();
                    Err(McpError::Timeout(timeout_ms))
                }
            }
        }
    }

    /// Hand a running unit over to a task and finish it in the background.
    async fn defer(
        &self,
        invocation: &Invocation,
        args: Map<String, Value>,
        ttl: Option<u64>,
        ctx: RenderContext,
        mut handle: JoinHandle<anyhow::Result<()>>,
    ) -> McpResult<Task> {
        let request = TaskRequest::new(invocation.kind.method())
            .name(invocation.name.clone())
            .params(Value::Object(args))
            .ttl(ttl);
        let task = self.ledger.tasks.create(&invocation.session.id, request).await;
        let task_token = self.ledger.tasks.cancellation_token(&task.id).await?;
        ctx.attach_task(task.id.clone());

        let ledger = self.ledger.clone();
        let unit_token = invocation.token.clone();
        let task_id = task.id.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                // The request was cancelled before its task id reached the client.
                _ = unit_token.cancelled() => {
                    handle.abort();
                    if let Err(e) = ledger.tasks.cancel(&task_id).await {
                        tracing::debug!("Task {task_id} not cancelled: {e}");
                    }
                    tracing::debug!("Request behind task {task_id} was cancelled");
                }
                _ = task_token.cancelled() => {
                    unit_token.cancel();
                    handle.abort();
                    tracing::debug!("Stopped unit behind cancelled task {task_id}");
                }
                joined = &mut handle => {
                    finish(&ledger, &task_id, settle(joined, &ctx)).await;
                }
            }
        });

        Ok(task)
    }
}

fn spawn_unit(
    unit: Unit,
    args: Map<String, Value>,
    ctx: RenderContext,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { unit.run(args, &ctx).await })
}

fn settle(joined: Result<anyhow::Result<()>, JoinError>, ctx: &RenderContext) -> Dispatched {
    let output = ctx.output();
    match joined {
        Ok(Ok(())) => Dispatched::Completed(output),
        Ok(Err(e)) => Dispatched::Failed {
            error: e.to_string(),
            output,
        },
        Err(e) => Dispatched::Failed {
            error: panic_message(e),
            output,
        },
    }
}

fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return "Unit was aborted".to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("Unit panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("Unit panicked: {message}")
    } else {
        "Unit panicked".to_string()
    }
}

async fn finish(ledger: &Ledger, task_id: &str, outcome: Dispatched) {
    let recorded = match outcome {
        Dispatched::Completed(output) => {
            match serde_json::to_value(output.into_tool_result()) {
                Ok(result) => ledger.tasks.complete(task_id, result).await,
                Err(e) => ledger.tasks.fail(task_id, e.to_string()).await,
            }
        }
        Dispatched::Failed { error, .. } => ledger.tasks.fail(task_id, error).await,
        Dispatched::Deferred(_) => return,
    };
    if let Err(e) = recorded {
        tracing::debug!("Task {task_id} already settled: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use switchboard::{SessionRole, TaskStatus};

    use crate::protocol::negotiation::CapabilityNegotiator;

    struct Panics {
        schema: InputSchema,
    }

    #[async_trait]
    impl Tool for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn description(&self) -> &str {
            "Renders once then panics"
        }

        fn schema(&self) -> &InputSchema {
            &self.schema
        }

        async fn call(&self, _args: Map<String, Value>, ctx: &RenderContext) -> anyhow::Result<()> {
            ctx.text("before")?;
            panic!("kaboom");
        }
    }

    async fn setup(config: ServerConfig) -> (Dispatcher, Arc<Ledger>, Session, Arc<Profile>) {
        let mut tools = ToolRegistry::bundled().unwrap();
        tools
            .register(Arc::new(Panics {
                schema: InputSchema::new(),
            }))
            .unwrap();
        let prompts = PromptRegistry::bundled().unwrap();
        let negotiator =
            CapabilityNegotiator::new(&tools.names(), &prompts.names(), &BTreeMap::new(), false)
                .unwrap();
        let ledger = Arc::new(Ledger::default());
        let session = ledger.sessions.create_session(SessionRole::Server).await;
        let dispatcher = Dispatcher::new(Arc::new(tools), Arc::new(prompts), ledger.clone(), &config);
        (dispatcher, ledger, session, negotiator.default_profile())
    }

    fn call(session: &Session, profile: &Arc<Profile>, name: &str, args: Value) -> Invocation {
        Invocation {
            session: session.clone(),
            profile: profile.clone(),
            kind: UnitKind::Tool,
            name: name.to_string(),
            arguments: Some(args),
            task: None,
            token: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_panic_keeps_partial_output() {
        let (dispatcher, _, session, profile) = setup(ServerConfig::default()).await;
        let outcome = dispatcher
            .invoke(call(&session, &profile, "panics", serde_json::json!({})))
            .await
            .unwrap();
        match outcome {
            Dispatched::Failed { error, output } => {
                assert!(error.contains("kaboom"));
                assert_eq!(output.renders.len(), 1);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_task_hint_defers_immediately() {
        let (dispatcher, ledger, session, profile) = setup(ServerConfig::default()).await;
        let mut invocation = call(
            &session,
            &profile,
            "count_to",
            serde_json::json!({"target": 2, "delay_ms": 1}),
        );
        invocation.task = Some(TaskHint { ttl: Some(5000) });

        let Dispatched::Deferred(task) = dispatcher.invoke(invocation).await.unwrap() else {
            panic!("expected a task");
        };
        assert_eq!(task.ttl, Some(5000));

        for _ in 0..100 {
            if ledger.tasks.get(&task.id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let done = ledger.tasks.get(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress_percent, Some(100));
    }

    #[tokio::test]
    async fn test_request_cancel_after_timeout_cancels_task() {
        let config = ServerConfig {
            call_timeout_ms: 20,
            ..ServerConfig::default()
        };
        let (dispatcher, ledger, session, profile) = setup(config).await;
        let invocation = call(
            &session,
            &profile,
            "count_to",
            serde_json::json!({"target": 100, "delay_ms": 50}),
        );
        let token = invocation.token.clone();

        let Dispatched::Deferred(task) = dispatcher.invoke(invocation).await.unwrap() else {
            panic!("expected a task");
        };
        token.cancel();

        for _ in 0..100 {
            if ledger.tasks.get(&task.id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let cancelled = ledger.tasks.get(&task.id).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(cancelled.result_payload.is_none());
    }

    #[tokio::test]
    async fn test_abort_policy_times_out() {
        let config = ServerConfig {
            call_timeout_ms: 1,
            ..ServerConfig::default()
        };
        let (dispatcher, _, session, profile) = setup(config).await;
        let invocation = call(
            &session,
            &profile,
            "count_to",
            serde_json::json!({"target": 50, "delay_ms": 100}),
        );
        let dispatcher = Dispatcher {
            policy: TimeoutPolicy::Abort,
            ..dispatcher
        };
        assert!(matches!(
            dispatcher.invoke(invocation).await,
            Err(McpError::Timeout(1))
        ));
    }
}
