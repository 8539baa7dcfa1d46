use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::Config;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "CONCIERGE_CONFIG";

const CONFIG_FILE: &str = "config.json";
const PROVIDERS: [&str; 3] = ["anthropic", "openai", "ollama"];

/// Expand a leading `~` to the home directory.
pub fn resolve_path(path: &str) -> PathBuf {
    if path.starts_with("~/") || path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.strip_prefix("~/").unwrap_or(""));
        }
    }
    PathBuf::from(path)
}

/// `~/.concierge`, or `./.concierge` when there is no home directory. Holds
/// the config file, the memory database and the REPL history.
pub fn concierge_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".concierge")
}

pub fn default_config_path() -> PathBuf {
    concierge_home().join(CONFIG_FILE)
}

/// Pick the config file: `$CONCIERGE_CONFIG`, then `./config.json`, then
/// `~/.concierge/config.json` (which need not exist yet).
pub fn find_config_path() -> PathBuf {
    find_config_path_from(
        std::env::var(CONFIG_ENV).ok(),
        Path::new(CONFIG_FILE),
        default_config_path(),
    )
}

fn find_config_path_from(explicit: Option<String>, local: &Path, fallback: PathBuf) -> PathBuf {
    if let Some(path) = explicit.filter(|p| !p.trim().is_empty()) {
        return resolve_path(&path);
    }
    if local.is_file() {
        return local.to_path_buf();
    }
    fallback
}

/// Load and validate a config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config '{}'", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read config '{}'", path.display()))
        }
    };
    validate(&config).with_context(|| format!("invalid config '{}'", path.display()))?;
    Ok(config)
}

/// Reject settings the agent cannot start with.
pub fn validate(config: &Config) -> Result<()> {
    let mut problems = Vec::new();

    if !PROVIDERS.contains(&config.agent.provider.as_str()) {
        problems.push(format!(
            "agent.provider '{}' is not one of {}",
            config.agent.provider,
            PROVIDERS.join(", ")
        ));
    }
    if config.agent.history_window == 0 {
        problems.push("agent.historyWindow must be at least 1".to_string());
    }
    for (i, entry) in config.scheduler.tasks.iter().enumerate() {
        if entry.description.trim().is_empty() || entry.cron.trim().is_empty() {
            problems.push(format!("scheduler.tasks[{i}] needs a description and a cron"));
        }
    }
    for (i, server) in config.mcp_servers.iter().enumerate() {
        if server.name.trim().is_empty() || server.url.trim().is_empty() {
            problems.push(format!("mcpServers[{i}] needs a name and a url"));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        anyhow::bail!(problems.join("; "))
    }
}

/// Write the config as pretty JSON. The file is replaced atomically so an
/// interrupted write never leaves a truncated config behind.
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    let contents = serde_json::to_string_pretty(config)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("failed to create config directory '{}'", parent.display())
        })?;
    }
    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, contents)
        .with_context(|| format!("failed to write config '{}'", staging.display()))?;
    std::fs::rename(&staging, path)
        .with_context(|| format!("failed to replace config '{}'", path.display()))?;
    Ok(())
}

/// Apply the environment variables the agent has always honoured on top of
/// the file config. Empty values are ignored.
pub fn apply_env_overrides(config: &mut Config) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

fn apply_overrides_from(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(name) = get("AGENT_NAME") {
        config.agent.name = name;
    }
    if let Some(model) = get("AGENT_MODEL") {
        config.agent.model = model;
    }
    if let Some(db_path) = get("DB_PATH") {
        config.memory.db_path = db_path;
    }
    if let Some(key) = get("BRAVE_API_KEY") {
        if config.tools.web.search.api_key.is_empty() {
            config.tools.web.search.api_key = key;
        }
    }

    let email = &mut config.tools.email;
    if let Some(host) = get("EMAIL_HOST") {
        email.host = host;
    }
    if let Some(port) = get("EMAIL_PORT").and_then(|p| p.trim().parse().ok()) {
        email.port = port;
    }
    if let Some(user) = get("EMAIL_USER") {
        email.username = user;
    }
    if let Some(pass) = get("EMAIL_PASS") {
        email.password = pass;
    }
}
