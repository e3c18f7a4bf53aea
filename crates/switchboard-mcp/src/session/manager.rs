//! Server-wide state: the ledger, the registries, and the store file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use switchboard::{Ledger, Session, TaskTracker};

use crate::config::ServerConfig;
use crate::prompts::PromptRegistry;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::negotiation::{CapabilityNegotiator, IdentityTable, ProfileResolver};
use crate::resources::ResourceRegistry;
use crate::tools::ToolRegistry;
use crate::types::{McpError, McpResult};

/// Everything connections share. Registries are fixed once the manager exists.
pub struct SessionManager {
    ledger: Arc<Ledger>,
    tools: Arc<ToolRegistry>,
    prompts: Arc<PromptRegistry>,
    resources: Arc<ResourceRegistry>,
    negotiator: CapabilityNegotiator,
    dispatcher: Dispatcher,
    config: ServerConfig,
    store_path: Option<PathBuf>,
}

impl SessionManager {
    /// Open the store at `store_path` with the bundled units.
    pub async fn open(config: ServerConfig, store_path: PathBuf) -> McpResult<Self> {
        if let Some(parent) = store_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    McpError::Io(std::io::Error::other(format!(
                        "Failed to create directory {}: {e}",
                        parent.display()
                    )))
                })?;
            }
        }

        let manager = Self::with_registries(
            config,
            ToolRegistry::bundled()?,
            PromptRegistry::bundled()?,
            ResourceRegistry::bundled()?,
            Some(store_path),
        )?;

        if let Some(path) = &manager.store_path {
            if path.exists() {
                tracing::info!("Opening existing store: {}", path.display());
            } else {
                tracing::info!("Creating new store: {}", path.display());
            }
            manager.ledger.load(path).await?;
        }
        let expired = manager.ledger.tasks.cleanup_expired().await;
        if expired > 0 {
            tracing::info!("Dropped {expired} expired tasks");
        }

        tracing::info!(
            "Store has {} sessions and {} tasks. Serving {} tools, {} prompts",
            manager.ledger.sessions.count().await,
            manager.ledger.tasks.count().await,
            manager.tools.len(),
            manager.prompts.len()
        );
        Ok(manager)
    }

    /// In-memory manager with the bundled units. Nothing is persisted.
    pub fn in_memory(config: ServerConfig) -> McpResult<Self> {
        Self::with_registries(
            config,
            ToolRegistry::bundled()?,
            PromptRegistry::bundled()?,
            ResourceRegistry::bundled()?,
            None,
        )
    }

    pub fn with_registries(
        config: ServerConfig,
        tools: ToolRegistry,
        prompts: PromptRegistry,
        resources: ResourceRegistry,
        store_path: Option<PathBuf>,
    ) -> McpResult<Self> {
        let ledger = Arc::new(Ledger::new(TaskTracker::new(
            config.task_ttl_ms,
            config.task_poll_interval_ms,
        )));
        let negotiator = CapabilityNegotiator::new(
            &tools.names(),
            &prompts.names(),
            &config.profiles,
            !resources.is_empty(),
        )?
        .with_resolver(Arc::new(IdentityTable::new(config.identities.clone())));

        let tools = Arc::new(tools);
        let prompts = Arc::new(prompts);
        let dispatcher = Dispatcher::new(tools.clone(), prompts.clone(), ledger.clone(), &config);

        Ok(Self {
            ledger,
            tools,
            prompts,
            resources: Arc::new(resources),
            negotiator,
            dispatcher,
            config,
            store_path,
        })
    }

    /// Replace the identity → profile resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn ProfileResolver>) -> Self {
        self.negotiator = self.negotiator.with_resolver(resolver);
        self
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn prompts(&self) -> &PromptRegistry {
        &self.prompts
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    pub fn negotiator(&self) -> &CapabilityNegotiator {
        &self.negotiator
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store_path(&self) -> Option<&Path> {
        self.store_path.as_deref()
    }

    /// Write the ledger to the store file, if there is one.
    pub async fn save(&self) -> McpResult<()> {
        let Some(path) = &self.store_path else {
            return Ok(());
        };
        self.ledger.save(path).await?;
        tracing::debug!("Saved store to {}", path.display());
        Ok(())
    }

    /// Close a session and persist the result.
    pub async fn close_session(&self, session_id: &str) -> McpResult<Session> {
        let session = self.ledger.sessions.close_session(session_id).await?;
        if let Err(e) = self.save().await {
            tracing::warn!("Failed to save store after closing {session_id}: {e}");
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard::{SessionRole, SessionStatus};

    #[tokio::test]
    async fn test_close_persists_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.swbd");

        let manager = SessionManager::open(ServerConfig::default(), path.clone())
            .await
            .unwrap();
        let session = manager
            .ledger()
            .sessions
            .create_session(SessionRole::Server)
            .await;
        manager.close_session(&session.id).await.unwrap();
        assert!(path.exists());

        let reopened = SessionManager::open(ServerConfig::default(), path).await.unwrap();
        let restored = reopened.ledger().sessions.get(&session.id).await.unwrap();
        assert_eq!(restored.status, SessionStatus::Closed);
        assert_eq!(restored.ended_at, manager.ledger().sessions.get(&session.id).await.unwrap().ended_at);
    }

    #[test]
    fn test_invalid_profile_rejected() {
        let config = ServerConfig::parse("[profiles.x]\ntools = [\"nope\"]").unwrap();
        assert!(matches!(
            SessionManager::in_memory(config),
            Err(McpError::InvalidConfig(_))
        ));
    }
}
