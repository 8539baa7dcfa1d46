pub mod context;
pub mod directive;
pub mod history;
pub mod model;
pub mod orchestrator;

pub use directive::{DirectiveExtractor, AUTO_DETECTED_TASK};
pub use history::{ConversationHistory, HistoryEntry};
pub use model::{
    ChatMessage, ContentBlock, LanguageModel, ModelRequest, ModelResponse, RigLanguageModel, Role,
    Usage,
};
pub use orchestrator::{
    AgentEvent, AgentSettings, AgentStatus, McpActionResult, MessageOptions, MessageReply,
    Orchestrator, MCP_SERVERS_KEY,
};
