//! Configuration loading and resolution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use switchboard::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_TASK_TTL_MS};

use crate::types::{McpError, McpResult, SERVER_NAME};

const CONFIG_ENV: &str = "SWITCHBOARD_CONFIG";
const STORE_ENV: &str = "SWITCHBOARD_STORE";
const CONFIG_FILE: &str = "switchboard.toml";
const STORE_FILE: &str = ".switchboard/store.swbd";

/// What happens when a call outlives `call_timeout_ms`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Keep running in the background and hand back a task.
    #[default]
    Task,
    /// Abort the call and report a timeout.
    Abort,
}

/// A named subset of the registered tools and prompts. An absent list means all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub prompts: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    pub server_name: String,
    pub instructions: Option<String>,
    pub call_timeout_ms: u64,
    pub timeout_policy: TimeoutPolicy,
    pub task_ttl_ms: u64,
    pub task_poll_interval_ms: u64,
    /// Bearer token required by the HTTP transport.
    pub auth_token: Option<String>,
    pub profiles: BTreeMap<String, ProfileConfig>,
    /// Identity → profile name.
    pub identities: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: SERVER_NAME.to_string(),
            instructions: Some(
                "Switchboard MCP server. Call tools with tools/call; long calls return a task \
                 you can follow with tasks/poll."
                    .to_string(),
            ),
            call_timeout_ms: 30_000,
            timeout_policy: TimeoutPolicy::Task,
            task_ttl_ms: DEFAULT_TASK_TTL_MS,
            task_poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            auth_token: None,
            profiles: BTreeMap::new(),
            identities: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn parse(raw: &str) -> McpResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| McpError::InvalidConfig(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::parse(&raw)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))
    }

    /// Load from the resolved path, or defaults when there is no file.
    pub fn resolve(explicit: Option<&str>) -> anyhow::Result<Self> {
        match resolve_config_path(explicit) {
            Some(path) => {
                tracing::info!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            None => {
                tracing::debug!("No configuration file, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn check(&self) -> McpResult<()> {
        if self.call_timeout_ms == 0 {
            return Err(McpError::InvalidConfig(
                "call_timeout_ms must be greater than 0".to_string(),
            ));
        }
        for (identity, profile) in &self.identities {
            if profile != crate::protocol::negotiation::DEFAULT_PROFILE
                && !self.profiles.contains_key(profile)
            {
                tracing::warn!("Identity '{identity}' maps to undefined profile '{profile}'");
            }
        }
        Ok(())
    }
}

/// Config file: explicit → `SWITCHBOARD_CONFIG` → `./switchboard.toml`.
pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(env_path));
    }

    let cwd_config = PathBuf::from(CONFIG_FILE);
    cwd_config.exists().then_some(cwd_config)
}

/// Snapshot file: explicit → `SWITCHBOARD_STORE` → `./.switchboard/store.swbd`
/// when present → `$HOME/.switchboard/store.swbd`.
pub fn resolve_store_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var(STORE_ENV) {
        return PathBuf::from(env_path);
    }

    let cwd_store = PathBuf::from(STORE_FILE);
    if cwd_store.exists() {
        return cwd_store;
    }

    resolve_default_store_path()
}

fn resolve_default_store_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    PathBuf::from(home).join(STORE_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config = ServerConfig::parse("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.timeout_policy, TimeoutPolicy::Task);
    }

    #[test]
    fn test_full_config() {
        let config = ServerConfig::parse(
            r#"
            server_name = "board"
            call_timeout_ms = 250
            timeout_policy = "abort"

            [profiles.minimal]
            tools = ["echo"]
            prompts = []

            [identities]
            alice = "minimal"
            "#,
        )
        .unwrap();
        assert_eq!(config.server_name, "board");
        assert_eq!(config.timeout_policy, TimeoutPolicy::Abort);
        assert_eq!(
            config.profiles["minimal"].tools,
            Some(vec!["echo".to_string()])
        );
        assert_eq!(config.identities["alice"], "minimal");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(matches!(
            ServerConfig::parse("verbose = true"),
            Err(McpError::InvalidConfig(_))
        ));
        assert!(matches!(
            ServerConfig::parse("[profiles.x]\nresources = []"),
            Err(McpError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(ServerConfig::parse("call_timeout_ms = 0").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.toml");
        std::fs::write(&path, "task_ttl_ms = 5000\n").unwrap();
        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.task_ttl_ms, 5000);
    }

    #[test]
    fn test_explicit_paths_win() {
        assert_eq!(
            resolve_config_path(Some("/tmp/x.toml")),
            Some(PathBuf::from("/tmp/x.toml"))
        );
        assert_eq!(
            resolve_store_path(Some("/tmp/store.swbd")),
            PathBuf::from("/tmp/store.swbd")
        );
    }
}
