use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use concierge_config::{
    apply_env_overrides, concierge_home, default_config_path, find_config_path, load_config,
    resolve_path, save_config, validate,
};
use concierge_core::agent::{AgentEvent, RigLanguageModel, MCP_SERVERS_KEY};
use concierge_core::capabilities;
use concierge_core::cron::parse_cron;
use concierge_core::mcp::{McpRegistry, McpServerEntry};
use concierge_core::{AgentSettings, MemoryStore, MessageOptions, Orchestrator};
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::client::{CompletionClient, Nothing};
use rig::providers::{anthropic, ollama, openai};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "concierge", about = "Conversational assistant for everyday digital chores", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging for the agent core
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant
    Chat {
        /// Single message mode (non-interactive)
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Run a task once
    Task {
        description: String,
    },
    /// Schedule a recurring task and keep running until Ctrl-C
    Schedule {
        description: String,
        /// Cron expression (e.g. "0 9 * * *")
        cron: String,
    },
    /// Run every task listed under scheduler.tasks until Ctrl-C
    Daemon,
    /// Show configuration and stored data summary
    Status,
    /// Inspect or prune stored memory
    Memory {
        #[command(subcommand)]
        action: MemoryCommands,
    },
    /// Manage MCP servers
    Mcp {
        #[command(subcommand)]
        action: McpCommands,
    },
    /// Write a default config file
    Onboard {
        /// Skip interactive prompts and write defaults
        #[arg(long)]
        non_interactive: bool,
    },
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Row counts
    Stats,
    /// Keyword search over past conversations
    Search {
        query: String,
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Delete conversations older than N days (0 deletes everything)
    Prune {
        /// Defaults to memory.retentionDays
        #[arg(short, long)]
        days: Option<u32>,
    },
    /// Recent task history
    History {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum McpCommands {
    /// Add or replace a server
    Add {
        name: String,
        url: String,
        /// Bearer token sent to the server
        #[arg(long)]
        token: Option<String>,
    },
    /// Remove a server
    Remove { name: String },
    /// List configured servers
    List,
    /// Enable a server
    Enable { name: String },
    /// Disable a server
    Disable { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = if cli.verbose {
        format!("{base_filter},concierge_core=debug")
    } else {
        base_filter
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Onboard { non_interactive } => {
            run_onboard(cli.config, non_interactive)?;
        }
        Commands::Chat { message } => {
            let (_, config) = load_settings(cli.config)?;
            let agent = build_orchestrator(&config)?;
            let result = match message {
                Some(msg) => run_single_message(&agent, &msg).await,
                None => run_interactive(&agent).await,
            };
            agent.shutdown();
            result?;
        }
        Commands::Task { description } => {
            let (_, config) = load_settings(cli.config)?;
            let agent = build_orchestrator(&config)?;
            let outcome = agent.execute_task(&description).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            agent.shutdown();
        }
        Commands::Schedule { description, cron } => {
            parse_cron(&cron)?;
            let (_, config) = load_settings(cli.config)?;
            let agent = build_orchestrator(&config)?;
            let result = agent.schedule_task(&description, &cron);
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.success {
                println!("Running until Ctrl-C...");
                tokio::signal::ctrl_c().await?;
            }
            agent.shutdown();
        }
        Commands::Daemon => {
            let (_, config) = load_settings(cli.config)?;
            run_daemon(&config).await?;
        }
        Commands::Status => {
            let (config_path, config) = load_settings(cli.config)?;
            run_status(&config_path, &config)?;
        }
        Commands::Memory { action } => {
            let (_, config) = load_settings(cli.config)?;
            let memory = open_memory(&config)?;
            run_memory_command(action, &memory, config.memory.retention_days)?;
            memory.close();
        }
        Commands::Mcp { action } => {
            let (_, config) = load_settings(cli.config)?;
            let memory = open_memory(&config)?;
            run_mcp_command(action, &memory)?;
            memory.close();
        }
    }

    Ok(())
}

/// Locate and load the config file, then apply environment overrides.
fn load_settings(config_arg: Option<PathBuf>) -> Result<(PathBuf, concierge_config::Config)> {
    let config_path = config_arg.unwrap_or_else(find_config_path);
    let mut config = load_config(&config_path)?;
    apply_env_overrides(&mut config);
    Ok((config_path, config))
}

/// Resolve an API key from config, falling back to an environment variable.
fn resolve_api_key(
    provider_cfg: &Option<concierge_config::ProviderConfig>,
    env_var: &str,
) -> Option<String> {
    provider_cfg
        .as_ref()
        .and_then(|c| c.api_key.clone())
        .filter(|k| !k.is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.is_empty()))
}

fn api_base(provider_cfg: &Option<concierge_config::ProviderConfig>) -> Option<String> {
    provider_cfg
        .as_ref()
        .and_then(|c| c.api_base.clone())
        .filter(|b| !b.is_empty())
}

/// Create the completion model named in `agent.provider` / `agent.model`.
#[allow(deprecated)]
fn create_model(config: &concierge_config::Config) -> Result<CompletionModelHandle<'static>> {
    let provider = config.agent.provider.as_str();
    let model_name = config.agent.model.as_str();
    if model_name.is_empty() {
        anyhow::bail!("No model configured. Set agent.model in config.json or AGENT_MODEL.");
    }

    match provider {
        "anthropic" => {
            let key = resolve_api_key(&config.providers.anthropic, "ANTHROPIC_API_KEY")
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "Anthropic provider selected but no API key found. \
                     Set providers.anthropic.apiKey in config.json or ANTHROPIC_API_KEY env var."
                    )
                })?;
            let client: anthropic::Client = anthropic::Client::builder()
                .api_key(&key)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Anthropic client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using Anthropic provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        "openai" => {
            let key =
                resolve_api_key(&config.providers.openai, "OPENAI_API_KEY").ok_or_else(|| {
                    anyhow::anyhow!(
                        "OpenAI provider selected but no API key found. \
                     Set providers.openai.apiKey in config.json or OPENAI_API_KEY env var."
                    )
                })?;
            let mut builder = openai::CompletionsClient::builder().api_key(&key);
            if let Some(ref base) = api_base(&config.providers.openai) {
                builder = builder.base_url(base);
                tracing::info!("Using OpenAI provider with custom base: {base}");
            }
            let client: openai::CompletionsClient = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create OpenAI client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using OpenAI provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        "ollama" => {
            let mut builder = ollama::Client::builder().api_key(Nothing);
            if let Some(ref base) = api_base(&config.providers.ollama) {
                builder = builder.base_url(base);
            }
            let client: ollama::Client = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Ollama client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using Ollama provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        other => {
            anyhow::bail!("Unknown provider '{other}'. Valid providers: anthropic, openai, ollama");
        }
    }
}

fn open_memory(config: &concierge_config::Config) -> Result<Arc<MemoryStore>> {
    let db_path = resolve_path(&config.memory.db_path);
    let memory = MemoryStore::open(&db_path)
        .with_context(|| format!("failed to open memory database '{}'", db_path.display()))?;
    Ok(Arc::new(memory))
}

/// Wire memory, model, capabilities and MCP servers into an orchestrator.
fn build_orchestrator(config: &concierge_config::Config) -> Result<Arc<Orchestrator>> {
    let memory = open_memory(config)?;
    let model = RigLanguageModel::new(create_model(config)?);
    let registry = capabilities::builtin(&config.tools, memory.clone())?;

    let agent = Orchestrator::new(
        AgentSettings::from(&config.agent),
        memory,
        Arc::new(model),
        registry,
    );
    agent.initialize();

    // Seed servers from config that are not already stored
    if config.agent.enable_mcp {
        let known: Vec<String> = agent.mcp_servers().into_iter().map(|s| s.name).collect();
        for server in &config.mcp_servers {
            if !known.contains(&server.name) {
                let result = agent.add_mcp_server(McpServerEntry::from(server));
                if !result.success {
                    tracing::warn!(
                        "Ignoring MCP server '{}' from config: {}",
                        server.name,
                        result.error.unwrap_or_default()
                    );
                }
            }
        }
    }

    tokio::spawn(log_events(agent.subscribe()));
    Ok(Arc::new(agent))
}

async fn log_events(mut events: broadcast::Receiver<AgentEvent>) {
    loop {
        match events.recv().await {
            Ok(AgentEvent::TaskExecuted { task, outcome }) => {
                tracing::info!(
                    "Task '{}' finished: {}",
                    task.description,
                    outcome.summary()
                );
            }
            Ok(AgentEvent::Shutdown) | Err(broadcast::error::RecvError::Closed) => break,
            Ok(event) => tracing::debug!("Agent event: {event:?}"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!("Event logger skipped {n} events");
            }
        }
    }
}

async fn run_single_message(agent: &Orchestrator, message: &str) -> Result<()> {
    let reply = agent.process_message(message, &MessageOptions::default()).await?;
    println!("{}", reply.response);
    if let Some(outcome) = reply.task_outcome {
        println!("\n[task] {}", serde_json::to_string(&outcome)?);
    }
    Ok(())
}

async fn run_interactive(agent: &Orchestrator) -> Result<()> {
    let history_dir = concierge_home().join("history");
    std::fs::create_dir_all(&history_dir)?;
    let history_path = history_dir.join("cli_history");

    let mut rl = DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    println!(
        "{} (type /help for commands, Ctrl-D to quit)",
        agent.settings().name
    );
    println!();

    let result = loop {
        match rl.readline("you> ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);

                match input {
                    "exit" | "quit" | "/exit" | "/quit" => break Ok(()),
                    "/help" => {
                        println!("Commands:");
                        println!("  /clear   - Clear the conversation history");
                        println!("  /status  - Show agent status");
                        println!("  /exit    - Exit");
                        println!();
                        continue;
                    }
                    "/clear" => {
                        agent.clear_history().await;
                        println!("History cleared.");
                        println!();
                        continue;
                    }
                    "/status" => {
                        let status = agent.status().await;
                        println!("{}", serde_json::to_string_pretty(&status)?);
                        println!();
                        continue;
                    }
                    _ => {}
                }

                match agent.process_message(input, &MessageOptions::default()).await {
                    Ok(reply) => {
                        println!("\n{}\n", reply.response);
                        if let Some(outcome) = reply.task_outcome {
                            println!("[task] {}\n", outcome.summary());
                        }
                    }
                    Err(e) => {
                        tracing::error!("Error: {e}");
                        println!("Sorry, that failed: {e}\n");
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break Ok(()),
            Err(e) => break Err(anyhow::anyhow!("readline error: {e}")),
        }
    };

    let _ = rl.save_history(&history_path);
    result
}

async fn run_daemon(config: &concierge_config::Config) -> Result<()> {
    if !config.scheduler.enabled {
        anyhow::bail!("Scheduler is disabled. Set scheduler.enabled to true in config.json.");
    }
    if config.scheduler.tasks.is_empty() {
        anyhow::bail!("No tasks configured under scheduler.tasks.");
    }

    let agent = build_orchestrator(config)?;
    for entry in &config.scheduler.tasks {
        let result = agent.schedule_task(&entry.description, &entry.cron);
        if result.success {
            tracing::info!(
                "Scheduled '{}' ({}) as {}",
                entry.description,
                entry.cron,
                result.task_id.unwrap_or_default()
            );
        } else {
            tracing::warn!(
                "Skipping '{}': {}",
                entry.description,
                result.error.unwrap_or_default()
            );
        }
    }

    if agent.scheduled_tasks().is_empty() {
        agent.shutdown();
        anyhow::bail!("None of the configured tasks could be scheduled.");
    }

    println!(
        "{} task(s) scheduled. Running until Ctrl-C...",
        agent.scheduled_tasks().len()
    );
    tokio::signal::ctrl_c().await?;
    agent.shutdown();
    Ok(())
}

fn run_status(config_path: &Path, config: &concierge_config::Config) -> Result<()> {
    println!("Config: {}", config_path.display());
    println!("Agent: {}", config.agent.name);
    println!("Model: {} ({})", config.agent.model, config.agent.provider);
    println!(
        "Email: {}",
        if config.tools.email.is_configured() {
            config.tools.email.host.as_str()
        } else {
            "not configured"
        }
    );
    println!(
        "MCP: {}",
        if config.agent.enable_mcp { "enabled" } else { "disabled" }
    );

    let db_path = resolve_path(&config.memory.db_path);
    println!("Memory: {}", db_path.display());
    if db_path.exists() {
        let memory = open_memory(config)?;
        let stats = memory.stats()?;
        println!("  Conversations: {}", stats.total_conversations);
        println!("  Tasks: {}", stats.total_tasks);
        println!("  Preferences: {}", stats.total_preferences);
        let servers = load_mcp_registry(&memory)?.stats();
        println!(
            "  MCP servers: {} ({} enabled)",
            servers.total, servers.enabled
        );
        memory.close();
    } else {
        println!("  (not created yet)");
    }

    println!(
        "Scheduler: {} ({} configured task(s))",
        if config.scheduler.enabled { "enabled" } else { "disabled" },
        config.scheduler.tasks.len()
    );
    Ok(())
}

fn run_memory_command(action: MemoryCommands, memory: &MemoryStore, retention_days: u32) -> Result<()> {
    match action {
        MemoryCommands::Stats => {
            println!("{}", serde_json::to_string_pretty(&memory.stats()?)?);
        }
        MemoryCommands::Search { query, limit } => {
            let turns = memory.search_memories(&query, limit);
            if turns.is_empty() {
                println!("No matching conversations.");
            }
            for turn in turns {
                let when = chrono::DateTime::from_timestamp_millis(turn.timestamp_ms)
                    .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("[{when}] you: {}", turn.user_message);
                println!("        assistant: {}\n", turn.agent_response);
            }
        }
        MemoryCommands::Prune { days } => {
            let days = days.unwrap_or(retention_days);
            let removed = memory.clear_old_memories(days)?;
            println!("Removed {removed} conversation(s) older than {days} day(s).");
        }
        MemoryCommands::History { limit } => {
            let records = memory.tasks_history(limit)?;
            if records.is_empty() {
                println!("No tasks recorded.");
            }
            for record in records {
                println!(
                    "#{} [{}] ({}) {}",
                    record.id,
                    record.status.as_str(),
                    record.task_type,
                    record.description
                );
            }
        }
    }
    Ok(())
}

fn load_mcp_registry(memory: &MemoryStore) -> Result<McpRegistry> {
    let entries: Vec<McpServerEntry> = memory.load_preference(MCP_SERVERS_KEY)?.unwrap_or_default();
    Ok(McpRegistry::from_entries(entries))
}

fn save_mcp_registry(memory: &MemoryStore, registry: &McpRegistry) -> Result<()> {
    memory.save_preference(MCP_SERVERS_KEY, &serde_json::to_value(registry.snapshot())?)?;
    Ok(())
}

fn run_mcp_command(action: McpCommands, memory: &MemoryStore) -> Result<()> {
    let mut registry = load_mcp_registry(memory)?;

    match action {
        McpCommands::Add { name, url, token } => {
            let mut entry = McpServerEntry::new(name.clone(), url);
            if let Some(token) = token {
                entry = entry.with_token(token);
            }
            registry.add_server(entry)?;
            save_mcp_registry(memory, &registry)?;
            println!("MCP server '{name}' added.");
        }
        McpCommands::Remove { name } => {
            if !registry.remove_server(&name) {
                anyhow::bail!("MCP server '{name}' not found");
            }
            save_mcp_registry(memory, &registry)?;
            println!("MCP server '{name}' removed.");
        }
        McpCommands::Enable { name } => {
            if !registry.toggle_server(&name, true) {
                anyhow::bail!("MCP server '{name}' not found");
            }
            save_mcp_registry(memory, &registry)?;
            println!("MCP server '{name}' enabled.");
        }
        McpCommands::Disable { name } => {
            if !registry.toggle_server(&name, false) {
                anyhow::bail!("MCP server '{name}' not found");
            }
            save_mcp_registry(memory, &registry)?;
            println!("MCP server '{name}' disabled.");
        }
        McpCommands::List => {
            let servers = registry.list_all();
            if servers.is_empty() {
                println!("No MCP servers configured.");
            }
            for server in servers {
                let state = if server.enabled { "enabled" } else { "disabled" };
                println!("{:<20} {:<10} {}", server.name, state, server.url);
            }
        }
    }
    Ok(())
}

fn prompt_with_default(prompt: &str, default: &str) -> Result<String> {
    use std::io::{self, Write};
    print!("{prompt} [{default}]: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim();
    if trimmed.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

fn run_onboard(config_arg: Option<PathBuf>, non_interactive: bool) -> Result<()> {
    let config_path = config_arg.unwrap_or_else(default_config_path);

    if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
        println!("To reset, delete it and run `concierge onboard` again.");
        return Ok(());
    }

    let mut cfg = concierge_config::Config::default();
    if !non_interactive {
        println!("Interactive setup");
        cfg.agent.name = prompt_with_default("Assistant name", &cfg.agent.name)?;
        cfg.agent.provider =
            prompt_with_default("Provider (anthropic/openai/ollama)", &cfg.agent.provider)?;
        cfg.agent.model = prompt_with_default("Model", &cfg.agent.model)?;
        cfg.memory.db_path = prompt_with_default("Memory database", &cfg.memory.db_path)?;
    }

    validate(&cfg)?;
    save_config(&config_path, &cfg)?;
    println!("Created config: {}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_onboard_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("concierge/config.json");

        run_onboard(Some(path.clone()), true).unwrap();
        let (loaded_path, config) = load_settings(Some(path.clone())).unwrap();
        assert_eq!(loaded_path, path);
        assert_eq!(config.agent.provider, "anthropic");
    }

    #[test]
    fn test_onboard_keeps_existing_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "agent": { "name": "Kept" } }"#).unwrap();

        run_onboard(Some(path.clone()), true).unwrap();
        let (_, config) = load_settings(Some(path)).unwrap();
        assert_eq!(config.agent.name, "Kept");
    }

    #[test]
    fn test_command_parsing() {
        let cli = Cli::try_parse_from(["concierge", "onboard", "--non-interactive"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Onboard {
                non_interactive: true
            }
        ));

        let cli = Cli::try_parse_from([
            "concierge",
            "--config",
            "/tmp/c.json",
            "schedule",
            "backup files in ~/docs",
            "0 2 * * *",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
        match cli.command {
            Commands::Schedule { description, cron } => {
                assert_eq!(description, "backup files in ~/docs");
                assert_eq!(cron, "0 2 * * *");
            }
            _ => panic!("expected schedule command"),
        }

        assert!(Cli::try_parse_from(["concierge", "mcp", "enable"]).is_err());
    }
}
