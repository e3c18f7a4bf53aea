//! MCP capability negotiation and per-identity profile selection.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::ProfileConfig;
use crate::types::{
    McpError, McpResult, PromptsCapability, ResourcesCapability, ServerCapabilities,
    TasksCapability, ToolsCapability, LoggingCapability, SUPPORTED_PROTOCOL_VERSIONS,
};

/// Name of the profile that exposes everything.
pub const DEFAULT_PROFILE: &str = "default";

/// The tool and prompt names one session may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    tools: BTreeSet<String>,
    prompts: BTreeSet<String>,
}

impl Profile {
    pub fn allows_tool(&self, name: &str) -> bool {
        self.tools.contains(name)
    }

    pub fn allows_prompt(&self, name: &str) -> bool {
        self.prompts.contains(name)
    }

    pub fn tools(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(String::as_str)
    }

    pub fn prompts(&self) -> impl Iterator<Item = &str> {
        self.prompts.iter().map(String::as_str)
    }
}

/// Maps an authenticated identity to a profile name.
pub trait ProfileResolver: Send + Sync {
    fn resolve(&self, identity: &str) -> Option<String>;
}

/// Resolver backed by the `[identities]` table.
pub struct IdentityTable(BTreeMap<String, String>);

impl IdentityTable {
    pub fn new(identities: BTreeMap<String, String>) -> Self {
        Self(identities)
    }
}

impl ProfileResolver for IdentityTable {
    fn resolve(&self, identity: &str) -> Option<String> {
        self.0.get(identity).cloned()
    }
}

/// Selects profiles, protocol versions, and server capabilities.
pub struct CapabilityNegotiator {
    default: Arc<Profile>,
    profiles: BTreeMap<String, Arc<Profile>>,
    resolver: Option<Arc<dyn ProfileResolver>>,
    has_resources: bool,
}

impl CapabilityNegotiator {
    /// Build from the registered names and configured profiles. Profiles that
    /// name unregistered tools or prompts are rejected.
    pub fn new(
        tool_names: &[String],
        prompt_names: &[String],
        profiles: &BTreeMap<String, ProfileConfig>,
        has_resources: bool,
    ) -> McpResult<Self> {
        let all_tools: BTreeSet<String> = tool_names.iter().cloned().collect();
        let all_prompts: BTreeSet<String> = prompt_names.iter().cloned().collect();

        let default = Arc::new(Profile {
            name: DEFAULT_PROFILE.to_string(),
            tools: all_tools.clone(),
            prompts: all_prompts.clone(),
        });

        let mut built = BTreeMap::new();
        for (name, config) in profiles {
            if name == DEFAULT_PROFILE {
                return Err(McpError::InvalidConfig(format!(
                    "profile name '{DEFAULT_PROFILE}' is reserved"
                )));
            }
            let tools = subset(name, "tool", config.tools.as_deref(), &all_tools)?;
            let prompts = subset(name, "prompt", config.prompts.as_deref(), &all_prompts)?;
            built.insert(
                name.clone(),
                Arc::new(Profile {
                    name: name.clone(),
                    tools,
                    prompts,
                }),
            );
        }

        Ok(Self {
            default,
            profiles: built,
            resolver: None,
            has_resources,
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ProfileResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn default_profile(&self) -> Arc<Profile> {
        self.default.clone()
    }

    /// Profile by name.
    pub fn profile(&self, name: &str) -> McpResult<Arc<Profile>> {
        if name == DEFAULT_PROFILE {
            return Ok(self.default.clone());
        }
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::UnknownProfile(name.to_string()))
    }

    /// Active profile for an identity. No identity, or no mapping, selects the
    /// default profile; a mapping to an unknown profile falls back to it too.
    pub fn select(&self, identity: Option<&str>) -> Arc<Profile> {
        let name = match (identity, &self.resolver) {
            (Some(identity), Some(resolver)) => resolver.resolve(identity),
            _ => None,
        };
        let Some(name) = name else {
            return self.default.clone();
        };
        match self.profile(&name) {
            Ok(profile) => {
                tracing::debug!("Selected profile '{name}'");
                profile
            }
            Err(e) => {
                tracing::warn!("{e}; falling back to '{DEFAULT_PROFILE}'");
                self.default.clone()
            }
        }
    }

    /// Echo the client's version when supported, else offer the newest.
    pub fn protocol_version(&self, requested: &str) -> String {
        if SUPPORTED_PROTOCOL_VERSIONS.contains(&requested) {
            return requested.to_string();
        }
        tracing::warn!(
            "Client requested protocol version {requested}, server supports {}. Proceeding with {}.",
            SUPPORTED_PROTOCOL_VERSIONS.join(", "),
            SUPPORTED_PROTOCOL_VERSIONS[0]
        );
        SUPPORTED_PROTOCOL_VERSIONS[0].to_string()
    }

    pub fn server_capabilities(&self, profile: &Profile) -> ServerCapabilities {
        ServerCapabilities {
            logging: Some(LoggingCapability {}),
            tools: (!profile.tools.is_empty()).then(ToolsCapability::default),
            prompts: (!profile.prompts.is_empty()).then(PromptsCapability::default),
            resources: self.has_resources.then(ResourcesCapability::default),
            tasks: Some(TasksCapability {
                list: true,
                cancel: true,
            }),
        }
    }
}

fn subset(
    profile: &str,
    kind: &str,
    names: Option<&[String]>,
    registered: &BTreeSet<String>,
) -> McpResult<BTreeSet<String>> {
    let Some(names) = names else {
        return Ok(registered.clone());
    };
    let mut chosen = BTreeSet::new();
    for name in names {
        if !registered.contains(name) {
            return Err(McpError::InvalidConfig(format!(
                "profile '{profile}' lists unknown {kind} '{name}'"
            )));
        }
        chosen.insert(name.clone());
    }
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn negotiator() -> CapabilityNegotiator {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "minimal".to_string(),
            ProfileConfig {
                tools: Some(names(&["echo"])),
                prompts: Some(Vec::new()),
            },
        );
        let mut identities = BTreeMap::new();
        identities.insert("alice".to_string(), "minimal".to_string());
        identities.insert("bob".to_string(), "ghost".to_string());

        CapabilityNegotiator::new(
            &names(&["echo", "count_to"]),
            &names(&["code_review"]),
            &profiles,
            true,
        )
        .unwrap()
        .with_resolver(Arc::new(IdentityTable::new(identities)))
    }

    #[test]
    fn test_select_by_identity() {
        let n = negotiator();
        let alice = n.select(Some("alice"));
        assert_eq!(alice.name, "minimal");
        assert!(alice.allows_tool("echo"));
        assert!(!alice.allows_tool("count_to"));
        assert_eq!(n.select(None).name, DEFAULT_PROFILE);
        assert_eq!(n.select(Some("carol")).name, DEFAULT_PROFILE);
    }

    #[test]
    fn test_unknown_profile_falls_back() {
        let n = negotiator();
        assert!(matches!(n.profile("ghost"), Err(McpError::UnknownProfile(_))));
        assert_eq!(n.select(Some("bob")).name, DEFAULT_PROFILE);
    }

    #[test]
    fn test_profile_with_unregistered_tool_rejected() {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "broken".to_string(),
            ProfileConfig {
                tools: Some(names(&["missing"])),
                prompts: None,
            },
        );
        let result = CapabilityNegotiator::new(&names(&["echo"]), &[], &profiles, false);
        assert!(matches!(result, Err(McpError::InvalidConfig(_))));
    }

    #[test]
    fn test_capabilities_follow_profile() {
        let n = negotiator();
        let caps = n.server_capabilities(&n.select(Some("alice")));
        assert!(caps.tools.is_some());
        assert!(caps.prompts.is_none());
        assert!(caps.resources.is_some());
        assert!(caps.tasks.is_some());
    }

    #[test]
    fn test_protocol_version() {
        let n = negotiator();
        assert_eq!(n.protocol_version("2024-11-05"), "2024-11-05");
        assert_eq!(n.protocol_version("1999-01-01"), SUPPORTED_PROTOCOL_VERSIONS[0]);
    }
}
