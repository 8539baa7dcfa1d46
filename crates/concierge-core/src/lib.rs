pub mod agent;
pub mod capabilities;
pub mod cron;
pub mod error;
pub mod mcp;
pub mod memory;
pub mod task;

// Re-export key types
pub use agent::{AgentEvent, AgentSettings, MessageOptions, MessageReply, Orchestrator};
pub use error::{AgentError, StorageError, ValidationError};
pub use memory::MemoryStore;
