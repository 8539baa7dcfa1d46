use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

fn default_transport() -> String {
    "url".into()
}

fn default_enabled() -> bool {
    true
}

/// A configured MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct McpServerEntry {
    pub name: String,
    pub url: String,
    #[serde(rename = "type", default = "default_transport")]
    pub transport: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_token: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl McpServerEntry {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            transport: default_transport(),
            authorization_token: None,
            enabled: true,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.authorization_token = Some(token.into());
        self
    }
}

impl From<&concierge_config::McpServerConfig> for McpServerEntry {
    fn from(cfg: &concierge_config::McpServerConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            url: cfg.url.clone(),
            transport: cfg.transport.clone(),
            authorization_token: cfg.authorization_token.clone(),
            enabled: true,
        }
    }
}

/// Server descriptor attached to a model call. Field names follow the
/// Messages API `mcp_servers` parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpServerParam {
    #[serde(rename = "type")]
    pub transport: String,
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct McpStats {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub servers: Vec<String>,
}

/// In-memory cache of MCP server configuration, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct McpRegistry {
    servers: BTreeMap<String, McpServerEntry>,
}

impl McpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from persisted entries. Invalid entries are skipped.
    pub fn from_entries(entries: impl IntoIterator<Item = McpServerEntry>) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            if let Err(e) = registry.add_server(entry) {
                tracing::warn!("Skipping stored MCP server: {e}");
            }
        }
        registry
    }

    /// Insert or replace a server by name.
    pub fn add_server(&mut self, entry: McpServerEntry) -> Result<(), ValidationError> {
        if entry.name.trim().is_empty() {
            return Err(ValidationError::EmptyField("name"));
        }
        if entry.url.trim().is_empty() {
            return Err(ValidationError::EmptyField("url"));
        }
        self.servers.insert(entry.name.clone(), entry);
        Ok(())
    }

    pub fn remove_server(&mut self, name: &str) -> bool {
        self.servers.remove(name).is_some()
    }

    pub fn toggle_server(&mut self, name: &str, enabled: bool) -> bool {
        match self.servers.get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn get_server(&self, name: &str) -> Option<&McpServerEntry> {
        self.servers.get(name)
    }

    pub fn list_enabled(&self) -> Vec<&McpServerEntry> {
        self.servers.values().filter(|s| s.enabled).collect()
    }

    pub fn list_all(&self) -> Vec<&McpServerEntry> {
        self.servers.values().collect()
    }

    pub fn has_enabled(&self) -> bool {
        self.servers.values().any(|s| s.enabled)
    }

    /// Call descriptors for every enabled server, ordered by name.
    pub fn build_call_list(&self) -> Vec<McpServerParam> {
        self.servers
            .values()
            .filter(|s| s.enabled)
            .map(|s| McpServerParam {
                transport: s.transport.clone(),
                url: s.url.clone(),
                name: s.name.clone(),
                authorization_token: s.authorization_token.clone(),
            })
            .collect()
    }

    /// Owned copy of every entry, used for persistence.
    pub fn snapshot(&self) -> Vec<McpServerEntry> {
        self.servers.values().cloned().collect()
    }

    pub fn stats(&self) -> McpStats {
        let enabled = self.servers.values().filter(|s| s.enabled).count();
        McpStats {
            total: self.servers.len(),
            enabled,
            disabled: self.servers.len() - enabled,
            servers: self.servers.keys().cloned().collect(),
        }
    }
}
