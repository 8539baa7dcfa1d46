pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, concierge_home, default_config_path, find_config_path, load_config,
    resolve_path, save_config, validate, CONFIG_ENV,
};
pub use schema::{
    AgentConfig, Config, EmailConfig, FileToolConfig, McpServerConfig, MemoryConfig, ProviderConfig,
    ProvidersConfig, ScheduleEntry, SchedulerConfig, ToolsConfig, WebSearchConfig,
    WebToolsConfig,
};
