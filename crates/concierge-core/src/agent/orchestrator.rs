use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use concierge_config::AgentConfig;

use super::context::{build_context_message, build_system_prompt};
use super::directive::DirectiveExtractor;
use super::history::ConversationHistory;
use super::model::{ChatMessage, LanguageModel, ModelRequest, Usage};
use crate::cron::{ScheduleResult, ScheduledTaskInfo, Scheduler};
use crate::error::{AgentError, ValidationError};
use crate::mcp::{McpRegistry, McpServerEntry, McpStats};
use crate::memory::{InteractionMetadata, MemoryStats, MemoryStore};
use crate::task::{CapabilityRegistry, TaskExecutor, TaskOutcome, TaskRequest, TaskRouter};

/// Preference key holding the persisted MCP server list.
pub const MCP_SERVERS_KEY: &str = "mcp_servers";

const DISCOVERY_PROMPT: &str = "What tools do you have available?";
const DISCOVERY_MAX_TOKENS: u64 = 1000;
const EVENT_CAPACITY: usize = 64;

/// Runtime settings for the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub name: String,
    pub model: String,
    pub max_tokens: u64,
    pub temperature: f64,
    pub enable_mcp: bool,
    pub history_window: usize,
    pub memory_context_limit: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for AgentSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            name: config.name.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            enable_mcp: config.enable_mcp,
            history_window: config.history_window,
            memory_context_limit: config.memory_context_limit,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    /// Appended to the system prompt for this exchange only.
    pub additional_context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageReply {
    pub response: String,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_outcome: Option<TaskOutcome>,
}

/// Result of an MCP management call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct McpActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Model reply for tool discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl McpActionResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub name: String,
    pub model: String,
    pub is_running: bool,
    pub conversation_count: usize,
    pub memory_stats: Option<MemoryStats>,
    pub scheduled_tasks: Vec<ScheduledTaskInfo>,
    /// `None` when MCP is disabled.
    pub mcp_servers: Option<McpStats>,
}

/// Lifecycle notifications published by the orchestrator.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum AgentEvent {
    Initialized,
    Processing { message: String },
    TaskExecuted { task: TaskRequest, outcome: TaskOutcome },
    ResponseGenerated { message: String, usage: Usage },
    Error { message: String },
    Shutdown,
}

/// Decrements the in-flight counter when a call finishes, however it exits.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Ties the memory store, task executor, scheduler and MCP registry to a
/// language model.
pub struct Orchestrator {
    settings: AgentSettings,
    memory: Arc<MemoryStore>,
    model: Arc<dyn LanguageModel>,
    executor: Arc<TaskExecutor>,
    scheduler: Scheduler,
    mcp: Mutex<McpRegistry>,
    history: tokio::sync::Mutex<ConversationHistory>,
    directives: DirectiveExtractor,
    in_flight: AtomicUsize,
    shut_down: AtomicBool,
    events: broadcast::Sender<AgentEvent>,
}

impl Orchestrator {
    pub fn new(
        settings: AgentSettings,
        memory: Arc<MemoryStore>,
        model: Arc<dyn LanguageModel>,
        capabilities: CapabilityRegistry,
    ) -> Self {
        Self::with_router(settings, memory, model, capabilities, TaskRouter::with_defaults())
    }

    pub fn with_router(
        settings: AgentSettings,
        memory: Arc<MemoryStore>,
        model: Arc<dyn LanguageModel>,
        capabilities: CapabilityRegistry,
        router: TaskRouter,
    ) -> Self {
        let executor = Arc::new(TaskExecutor::new(router, capabilities, memory.clone()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            settings,
            memory,
            model,
            scheduler: Scheduler::new(executor.clone()),
            executor,
            mcp: Mutex::new(McpRegistry::new()),
            history: tokio::sync::Mutex::new(ConversationHistory::new()),
            directives: DirectiveExtractor::with_defaults(),
            in_flight: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
            events,
        }
    }

    /// Replace the rule table used to find task directives in model replies.
    pub fn with_directives(mut self, directives: DirectiveExtractor) -> Self {
        self.directives = directives;
        self
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    /// Receive lifecycle events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn registry(&self) -> MutexGuard<'_, McpRegistry> {
        self.mcp.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Restore persisted MCP servers.
    pub fn initialize(&self) {
        if self.settings.enable_mcp {
            match self
                .memory
                .load_preference::<Vec<McpServerEntry>>(MCP_SERVERS_KEY)
            {
                Ok(Some(saved)) => {
                    let count = saved.len();
                    let mut registry = self.registry();
                    for entry in saved {
                        if let Err(e) = registry.add_server(entry) {
                            warn!("Skipping stored MCP server: {e}");
                        }
                    }
                    if count > 0 {
                        info!("Loaded {count} MCP server(s)");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to load MCP servers: {e}"),
            }
        }

        info!("{} initialized", self.settings.name);
        self.emit(AgentEvent::Initialized);
    }

    /// Run one conversational exchange.
    pub async fn process_message(
        &self,
        message: &str,
        options: &MessageOptions,
    ) -> Result<MessageReply, AgentError> {
        if message.trim().is_empty() {
            return Err(ValidationError::EmptyField("message").into());
        }

        let _guard = InFlight::enter(&self.in_flight);
        self.emit(AgentEvent::Processing {
            message: message.to_string(),
        });

        let system = build_system_prompt(
            &self.settings.name,
            &Local::now(),
            options.additional_context.as_deref(),
        );

        let memories = self
            .memory
            .search_memories(message, self.settings.memory_context_limit);
        let mut messages: Vec<ChatMessage> = build_context_message(&memories)
            .map(ChatMessage::user)
            .into_iter()
            .collect();
        messages.extend(
            self.history
                .lock()
                .await
                .window_with(message, self.settings.history_window),
        );

        let mcp_servers = if self.settings.enable_mcp {
            let registry = self.registry();
            registry.has_enabled().then(|| registry.build_call_list())
        } else {
            None
        };

        let request = ModelRequest {
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            system,
            messages,
            mcp_servers,
        };

        debug!(
            "Processing message with {} context turns",
            memories.len()
        );

        let response = match self.model.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                error!("Error processing message: {e:#}");
                self.emit(AgentEvent::Error {
                    message: format!("{e:#}"),
                });
                return Err(AgentError::ExternalCall(format!("{e:#}")));
            }
        };

        let Some(reply) = response.first_text().map(str::to_string) else {
            self.emit(AgentEvent::Error {
                message: AgentError::EmptyResponse.to_string(),
            });
            return Err(AgentError::EmptyResponse);
        };
        let usage = response.usage;

        self.history.lock().await.push_exchange(message, &reply);

        let metadata = InteractionMetadata {
            tokens_used: Some(usage.total()),
            tags: Vec::new(),
        };
        if let Err(e) = self.memory.save_interaction(message, &reply, &metadata) {
            warn!("Failed to save interaction: {e}");
        }

        let task = self.directives.extract(&reply);
        let task_outcome = match &task {
            Some(task) => {
                info!("Detected task directive: {}", task.description);
                let outcome = self.executor.execute_task(task).await;
                self.emit(AgentEvent::TaskExecuted {
                    task: task.clone(),
                    outcome: outcome.clone(),
                });
                Some(outcome)
            }
            None => None,
        };

        self.emit(AgentEvent::ResponseGenerated {
            message: reply.clone(),
            usage,
        });

        Ok(MessageReply {
            response: reply,
            usage,
            task,
            task_outcome,
        })
    }

    /// Run a task directly as a `general` task.
    pub async fn execute_task(&self, description: &str) -> TaskOutcome {
        info!("Executing task: {description}");
        self.executor
            .execute_task(&TaskRequest::with_type(description, "general"))
            .await
    }

    pub fn schedule_task(&self, description: &str, cron_expression: &str) -> ScheduleResult {
        self.scheduler.schedule_task(description, cron_expression)
    }

    pub fn cancel_scheduled_task(&self, task_id: &str) -> ScheduleResult {
        self.scheduler.cancel_scheduled_task(task_id)
    }

    pub fn scheduled_tasks(&self) -> Vec<ScheduledTaskInfo> {
        self.scheduler.scheduled_tasks()
    }

    pub async fn status(&self) -> AgentStatus {
        let memory_stats = match self.memory.stats() {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("Failed to read memory stats: {e}");
                None
            }
        };

        AgentStatus {
            name: self.settings.name.clone(),
            model: self.settings.model.clone(),
            is_running: self.in_flight.load(Ordering::SeqCst) > 0,
            conversation_count: self.history.lock().await.exchange_count(),
            memory_stats,
            scheduled_tasks: self.scheduler.scheduled_tasks(),
            mcp_servers: self
                .settings
                .enable_mcp
                .then(|| self.registry().stats()),
        }
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
        info!("Conversation history cleared");
    }

    /// Number of entries in the in-session history.
    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    /// A copy of the in-session history.
    pub async fn history(&self) -> Vec<super::history::HistoryEntry> {
        self.history.lock().await.entries().to_vec()
    }

    pub fn mcp_servers(&self) -> Vec<McpServerEntry> {
        self.registry().snapshot()
    }

    fn persist_mcp(&self, snapshot: &[McpServerEntry]) -> Result<(), AgentError> {
        let value = serde_json::to_value(snapshot).map_err(crate::error::StorageError::from)?;
        self.memory.save_preference(MCP_SERVERS_KEY, &value)?;
        Ok(())
    }

    pub fn add_mcp_server(&self, entry: McpServerEntry) -> McpActionResult {
        let name = entry.name.clone();
        let snapshot = {
            let mut registry = self.registry();
            if let Err(e) = registry.add_server(entry) {
                warn!("Failed to add MCP server: {e}");
                return McpActionResult::failed(e.to_string());
            }
            registry.snapshot()
        };

        if let Err(e) = self.persist_mcp(&snapshot) {
            warn!("Failed to persist MCP servers: {e}");
            return McpActionResult::failed(e.to_string());
        }
        info!("Added MCP server: {name}");
        McpActionResult::ok(format!("MCP server '{name}' added successfully"))
    }

    pub fn remove_mcp_server(&self, name: &str) -> McpActionResult {
        let snapshot = {
            let mut registry = self.registry();
            if !registry.remove_server(name) {
                return McpActionResult::rejected(format!("MCP server '{name}' not found"));
            }
            registry.snapshot()
        };

        if let Err(e) = self.persist_mcp(&snapshot) {
            warn!("Failed to persist MCP servers: {e}");
            return McpActionResult::failed(e.to_string());
        }
        info!("Removed MCP server: {name}");
        McpActionResult::ok(format!("MCP server '{name}' removed successfully"))
    }

    pub fn toggle_mcp_server(&self, name: &str, enabled: bool) -> McpActionResult {
        let snapshot = {
            let mut registry = self.registry();
            if !registry.toggle_server(name, enabled) {
                return McpActionResult::rejected(format!("MCP server '{name}' not found"));
            }
            registry.snapshot()
        };

        if let Err(e) = self.persist_mcp(&snapshot) {
            warn!("Failed to persist MCP servers: {e}");
            return McpActionResult::failed(e.to_string());
        }
        let state = if enabled { "enabled" } else { "disabled" };
        info!("MCP server {name} {state}");
        McpActionResult::ok(format!("MCP server '{name}' {state}"))
    }

    /// Ask the model which tools the enabled MCP servers expose.
    pub async fn discover_mcp_tools(&self) -> McpActionResult {
        if !self.settings.enable_mcp {
            return McpActionResult::rejected("MCP is not enabled");
        }

        let servers = self.registry().build_call_list();
        if servers.is_empty() {
            return McpActionResult::rejected("No MCP servers configured");
        }

        let request = ModelRequest {
            model: self.settings.model.clone(),
            max_tokens: DISCOVERY_MAX_TOKENS,
            temperature: self.settings.temperature,
            system: String::new(),
            messages: vec![ChatMessage::user(DISCOVERY_PROMPT)],
            mcp_servers: Some(servers),
        };

        match self.model.complete(request).await {
            Ok(response) => McpActionResult {
                response: response.first_text().map(str::to_string),
                ..McpActionResult::ok("Tools discovered successfully")
            },
            Err(e) => {
                warn!("MCP tool discovery failed: {e:#}");
                McpActionResult::failed(format!("{e:#}"))
            }
        }
    }

    /// Stop all schedules and close the memory store. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down {}", self.settings.name);
        self.scheduler.shutdown();
        self.memory.close();
        self.emit(AgentEvent::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::model::ModelResponse;
    use async_trait::async_trait;

    /// Replies with a fixed text and records every request.
    struct ScriptedModel {
        reply: String,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedModel {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn last_request(&self) -> ModelRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, request: ModelRequest) -> anyhow::Result<ModelResponse> {
            self.requests.lock().unwrap().push(request);
            Ok(ModelResponse::text(
                self.reply.clone(),
                Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
            ))
        }
    }

    struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn complete(&self, _request: ModelRequest) -> anyhow::Result<ModelResponse> {
            anyhow::bail!("rate limited")
        }
    }

    fn orchestrator(model: Arc<dyn LanguageModel>) -> Orchestrator {
        let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
        Orchestrator::new(
            AgentSettings::default(),
            memory,
            model,
            CapabilityRegistry::new(),
        )
    }

    #[tokio::test]
    async fn test_process_message_records_exchange() {
        let model = ScriptedModel::new("Hello there!");
        let agent = orchestrator(model.clone());

        let reply = agent
            .process_message("hi", &MessageOptions::default())
            .await
            .unwrap();
        assert_eq!(reply.response, "Hello there!");
        assert_eq!(reply.usage.total(), 15);
        assert!(reply.task.is_none());

        assert_eq!(agent.history_len().await, 2);
        assert_eq!(agent.memory().stats().unwrap().total_conversations, 1);
        let stored = agent.memory().recent_conversations(1).unwrap();
        assert_eq!(stored[0].tokens_used, Some(15));

        let request = model.last_request();
        assert_eq!(request.messages, vec![ChatMessage::user("hi")]);
        assert!(request.mcp_servers.is_none());
        assert!(request.system.contains("Digital Life Assistant"));
    }

    #[tokio::test]
    async fn test_context_message_from_memory() {
        let model = ScriptedModel::new("ok");
        let agent = orchestrator(model.clone());
        agent
            .memory()
            .save_interaction(
                "remember my dentist appointment",
                "Noted",
                &InteractionMetadata::default(),
            )
            .unwrap();

        agent
            .process_message("my dentist appointment", &MessageOptions::default())
            .await
            .unwrap();

        let request = model.last_request();
        assert_eq!(request.messages.len(), 2);
        assert!(request.messages[0]
            .content
            .starts_with("Previous relevant context:\n"));
        assert_eq!(
            request.messages[1],
            ChatMessage::user("my dentist appointment")
        );
    }

    #[tokio::test]
    async fn test_additional_context_in_system_prompt() {
        let model = ScriptedModel::new("ok");
        let agent = orchestrator(model.clone());
        let options = MessageOptions {
            additional_context: Some("The user is travelling.".into()),
        };
        agent.process_message("hello", &options).await.unwrap();
        assert!(model.last_request().system.contains("The user is travelling."));
    }

    #[tokio::test]
    async fn test_model_failure_leaves_history_untouched() {
        let agent = orchestrator(Arc::new(FailingModel));
        let mut events = agent.subscribe();

        let err = agent
            .process_message("hi", &MessageOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ExternalCall(ref m) if m.contains("rate limited")));
        assert_eq!(agent.history_len().await, 0);
        assert_eq!(agent.memory().stats().unwrap().total_conversations, 0);
        assert!(!agent.status().await.is_running);

        assert!(matches!(events.recv().await.unwrap(), AgentEvent::Processing { .. }));
        assert!(matches!(events.recv().await.unwrap(), AgentEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let agent = orchestrator(ScriptedModel::new("ok"));
        let err = agent
            .process_message("   ", &MessageOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Validation(ValidationError::EmptyField("message"))
        ));
    }

    #[tokio::test]
    async fn test_directive_runs_task() {
        let agent = orchestrator(ScriptedModel::new("Sure.\nTASK: water the plants"));
        let mut events = agent.subscribe();

        let reply = agent
            .process_message("please water the plants", &MessageOptions::default())
            .await
            .unwrap();
        let task = reply.task.unwrap();
        assert_eq!(task.description, "water the plants");
        assert_eq!(task.task_type.as_deref(), Some("auto-detected"));
        // No capability is registered for it
        assert!(!reply.task_outcome.unwrap().success);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(matches!(seen[0], AgentEvent::Processing { .. }));
        assert!(matches!(seen[1], AgentEvent::TaskExecuted { .. }));
        assert!(matches!(seen[2], AgentEvent::ResponseGenerated { .. }));
    }

    #[tokio::test]
    async fn test_custom_directive_rules() {
        let mut directives = DirectiveExtractor::new(Vec::new());
        directives.push_pattern(regex::Regex::new(r"(?i)REMIND:\s*(.+)").unwrap());
        let agent = orchestrator(ScriptedModel::new("TASK: ignored\nremind: call the plumber"))
            .with_directives(directives);

        let reply = agent
            .process_message("remind me to call the plumber", &MessageOptions::default())
            .await
            .unwrap();
        assert_eq!(reply.task.unwrap().description, "call the plumber");

        let silent = orchestrator(ScriptedModel::new("I will do it"))
            .with_directives(DirectiveExtractor::new(Vec::new()));
        let reply = silent
            .process_message("hello", &MessageOptions::default())
            .await
            .unwrap();
        assert!(reply.task.is_none());
        assert!(reply.task_outcome.is_none());
    }

    #[tokio::test]
    async fn test_mcp_servers_attached_when_enabled() {
        let model = ScriptedModel::new("ok");
        let agent = orchestrator(model.clone());

        assert!(agent
            .add_mcp_server(McpServerEntry::new("calendar", "https://mcp.example/cal"))
            .success);
        agent
            .process_message("hi", &MessageOptions::default())
            .await
            .unwrap();
        let servers = model.last_request().mcp_servers.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "calendar");

        assert!(agent.toggle_mcp_server("calendar", false).success);
        agent
            .process_message("again", &MessageOptions::default())
            .await
            .unwrap();
        assert!(model.last_request().mcp_servers.is_none());
    }

    #[tokio::test]
    async fn test_mcp_management_results() {
        let agent = orchestrator(ScriptedModel::new("ok"));
        let bad = agent.add_mcp_server(McpServerEntry::new("x", ""));
        assert!(!bad.success);
        assert!(bad.error.is_some());

        assert!(!agent.remove_mcp_server("missing").success);
        assert!(!agent.toggle_mcp_server("missing", true).success);

        agent.add_mcp_server(McpServerEntry::new("drive", "https://d"));
        let stored: Vec<McpServerEntry> = agent
            .memory()
            .load_preference(MCP_SERVERS_KEY)
            .unwrap()
            .unwrap();
        assert_eq!(stored.len(), 1);

        assert!(agent.remove_mcp_server("drive").success);
        let stored: Vec<McpServerEntry> = agent
            .memory()
            .load_preference(MCP_SERVERS_KEY)
            .unwrap()
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_discover_tools() {
        let model = ScriptedModel::new("I can read your calendar.");
        let agent = orchestrator(model.clone());

        let none = agent.discover_mcp_tools().await;
        assert_eq!(none.message.as_deref(), Some("No MCP servers configured"));

        agent.add_mcp_server(McpServerEntry::new("calendar", "https://c"));
        let found = agent.discover_mcp_tools().await;
        assert!(found.success);
        assert_eq!(found.response.as_deref(), Some("I can read your calendar."));
        let request = model.last_request();
        assert_eq!(request.messages, vec![ChatMessage::user(DISCOVERY_PROMPT)]);
        assert_eq!(request.max_tokens, DISCOVERY_MAX_TOKENS);
    }

    #[tokio::test]
    async fn test_discover_tools_disabled() {
        let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
        let settings = AgentSettings {
            enable_mcp: false,
            ..AgentSettings::default()
        };
        let agent = Orchestrator::new(
            settings,
            memory,
            ScriptedModel::new("ok"),
            CapabilityRegistry::new(),
        );
        let result = agent.discover_mcp_tools().await;
        assert_eq!(result.message.as_deref(), Some("MCP is not enabled"));
        assert!(agent.status().await.mcp_servers.is_none());
    }

    #[tokio::test]
    async fn test_status_and_clear_history() {
        let agent = orchestrator(ScriptedModel::new("ok"));
        agent
            .process_message("one", &MessageOptions::default())
            .await
            .unwrap();
        agent
            .process_message("two", &MessageOptions::default())
            .await
            .unwrap();
        agent.schedule_task("water the plants", "0 9 * * *");

        let status = agent.status().await;
        assert_eq!(status.conversation_count, 2);
        assert!(!status.is_running);
        assert_eq!(status.scheduled_tasks.len(), 1);
        assert_eq!(status.memory_stats.unwrap().total_conversations, 2);
        assert_eq!(status.mcp_servers.unwrap().total, 0);

        agent.clear_history().await;
        assert_eq!(agent.status().await.conversation_count, 0);
        agent.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let agent = orchestrator(ScriptedModel::new("ok"));
        let mut events = agent.subscribe();
        agent.schedule_task("water the plants", "0 9 * * *");

        agent.shutdown();
        agent.shutdown();

        assert!(agent.scheduled_tasks().is_empty());
        assert!(agent.memory().is_closed());
        assert_eq!(events.recv().await.unwrap(), AgentEvent::Shutdown);
        assert!(events.try_recv().is_err());
    }
}
