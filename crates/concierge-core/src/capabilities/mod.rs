//! Built-in task capabilities.

pub mod email;
pub mod file;
pub mod web;

use std::sync::Arc;

use anyhow::Result;
use concierge_config::ToolsConfig;

use crate::memory::MemoryStore;
use crate::task::CapabilityRegistry;

pub use email::EmailCapability;
pub use file::FileCapability;
pub use web::WebCapability;

/// Registry with the email, file and web capabilities configured from `tools`.
pub fn builtin(tools: &ToolsConfig, memory: Arc<MemoryStore>) -> Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();
    registry.register(Arc::new(EmailCapability::new(&tools.email)?));
    registry.register(Arc::new(FileCapability::new(&tools.files)?));
    registry.register(Arc::new(WebCapability::new(&tools.web, memory)?));
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
        let registry = builtin(&ToolsConfig::default(), memory).unwrap();
        assert_eq!(registry.task_types(), vec!["email", "file", "web"]);
    }
}
