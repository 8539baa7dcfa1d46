use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentConfig,
    pub memory: MemoryConfig,
    pub providers: ProvidersConfig,
    pub tools: ToolsConfig,
    pub scheduler: SchedulerConfig,
    /// MCP servers seeded into the registry at startup, in addition to the
    /// ones persisted in the memory store.
    pub mcp_servers: Vec<McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub name: String,
    /// One of: anthropic, openai, ollama.
    pub provider: String,
    pub model: String,
    pub max_tokens: u64,
    pub temperature: f64,
    pub enable_mcp: bool,
    /// Number of history entries sent to the model on each call.
    pub history_window: usize,
    /// Number of stored turns injected as prior context.
    pub memory_context_limit: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Digital Life Assistant".into(),
            provider: "anthropic".into(),
            model: "claude-sonnet-4-5".into(),
            max_tokens: 4096,
            temperature: 1.0,
            enable_mcp: true,
            history_window: 10,
            memory_context_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    pub db_path: String,
    /// Days of conversation history kept by `memory prune` when no explicit
    /// value is passed.
    pub retention_days: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: "~/.concierge/agent-memory.db".into(),
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub anthropic: Option<ProviderConfig>,
    pub openai: Option<ProviderConfig>,
    pub ollama: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    pub web: WebToolsConfig,
    pub files: FileToolConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebToolsConfig {
    pub search: WebSearchConfig,
    pub timeout_secs: u64,
}

impl Default for WebToolsConfig {
    fn default() -> Self {
        Self {
            search: WebSearchConfig::default(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSearchConfig {
    pub api_key: String,
    pub max_results: u32,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            max_results: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileToolConfig {
    /// When set, file tasks may only touch paths under this directory.
    pub restrict_to: Option<String>,
    pub backup_dir: String,
}

impl Default for FileToolConfig {
    fn default() -> Self {
        Self {
            restrict_to: None,
            backup_dir: "./backups".into(),
        }
    }
}

/// SMTP account used by email tasks. Sending is disabled until `host`,
/// `username` and `password` are all set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Sender address; the username when unset.
    pub from: Option<String>,
    /// Upgrade the connection with STARTTLS. Only disable for local relays.
    pub starttls: bool,
    pub timeout_secs: u64,
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.trim().is_empty()
            && !self.username.trim().is_empty()
            && !self.password.is_empty()
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from: None,
            starttls: true,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tasks: Vec<ScheduleEntry>,
}

/// A recurring task registered when the daemon starts.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub description: String,
    pub cron: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_mcp_transport", rename = "type")]
    pub transport: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_token: Option<String>,
}

fn default_mcp_transport() -> String {
    "url".to_string()
}
