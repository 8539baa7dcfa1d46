use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::router::TaskRouter;
use super::types::{TaskOutcome, TaskRequest};
use crate::memory::MemoryStore;

/// Message returned when no capability handles the resolved task type.
pub const UNSUPPORTED_TASK: &str = "unsupported task type";

/// A handler for one task type.
#[async_trait]
pub trait Capability: Send + Sync {
    /// The task type this capability serves, e.g. `"file"`.
    fn task_type(&self) -> &str;
    async fn execute(&self, task: &TaskRequest) -> Result<TaskOutcome>;
}

/// Capabilities keyed by the task type they serve.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability, replacing any previous one for the same type.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        self.capabilities
            .insert(capability.task_type().to_string(), capability);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(task_type).cloned()
    }

    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.capabilities.keys().cloned().collect();
        types.sort();
        types
    }
}

/// Routes tasks to capabilities and records every attempt in task history.
pub struct TaskExecutor {
    router: TaskRouter,
    capabilities: CapabilityRegistry,
    memory: Arc<MemoryStore>,
}

impl TaskExecutor {
    pub fn new(router: TaskRouter, capabilities: CapabilityRegistry, memory: Arc<MemoryStore>) -> Self {
        Self {
            router,
            capabilities,
            memory,
        }
    }

    pub fn router(&self) -> &TaskRouter {
        &self.router
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    /// Run a task. Always returns an outcome; failures are reported in it.
    pub async fn execute_task(&self, task: &TaskRequest) -> TaskOutcome {
        let task_type = self
            .router
            .resolve(&task.description, task.task_type.as_deref());
        let record = TaskRequest::with_type(task.description.clone(), task_type.clone());

        let Some(capability) = self.capabilities.get(&task_type) else {
            warn!("No capability for task type '{task_type}': {}", task.description);
            if let Err(e) = self.memory.save_task(&record, None) {
                warn!("Failed to record pending task: {e}");
            }
            return TaskOutcome::rejected(UNSUPPORTED_TASK);
        };

        debug!("Executing {task_type} task: {}", task.description);
        let outcome = match AssertUnwindSafe(capability.execute(task)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!("Task execution failed ({task_type}): {e:#}");
                TaskOutcome::failed(format!("{e:#}"))
            }
            Err(panic) => {
                let reason = panic_reason(panic.as_ref());
                error!("Capability for '{task_type}' panicked: {reason}");
                TaskOutcome::failed(format!("capability panicked: {reason}"))
            }
        };

        match serde_json::to_value(&outcome) {
            Ok(result) => {
                if let Err(e) = self.memory.save_task(&record, Some(&result)) {
                    warn!("Failed to record task result: {e}");
                }
            }
            Err(e) => warn!("Failed to serialize task outcome: {e}"),
        }

        info!(
            "Task '{}' ({task_type}) finished: success={}",
            task.description, outcome.success
        );
        outcome
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::TaskStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Capability for Echo {
        fn task_type(&self) -> &str {
            "file"
        }

        async fn execute(&self, task: &TaskRequest) -> Result<TaskOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TaskOutcome::ok(format!("done: {}", task.description)))
        }
    }

    struct Broken;

    #[async_trait]
    impl Capability for Broken {
        fn task_type(&self) -> &str {
            "web"
        }

        async fn execute(&self, _task: &TaskRequest) -> Result<TaskOutcome> {
            anyhow::bail!("network unreachable")
        }
    }

    struct Panicking;

    #[async_trait]
    impl Capability for Panicking {
        fn task_type(&self) -> &str {
            "file"
        }

        async fn execute(&self, task: &TaskRequest) -> Result<TaskOutcome> {
            let parts: Vec<&str> = Vec::new();
            Ok(TaskOutcome::ok(format!("{}: {}", parts[3], task.description)))
        }
    }

    fn executor() -> (TaskExecutor, Arc<Echo>, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let mut registry = CapabilityRegistry::new();
        registry.register(echo.clone());
        registry.register(Arc::new(Broken));
        let executor = TaskExecutor::new(TaskRouter::with_defaults(), registry, memory.clone());
        (executor, echo, memory)
    }

    #[tokio::test]
    async fn test_dispatches_to_registered_capability() {
        let (executor, echo, memory) = executor();
        let outcome = executor
            .execute_task(&TaskRequest::new("organize downloads"))
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.message.as_deref(), Some("done: organize downloads"));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);

        let history = memory.tasks_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].task_type, "file");
        assert_eq!(history[0].status, TaskStatus::Completed);
        assert_eq!(history[0].result.as_ref().unwrap()["success"], true);
    }

    #[tokio::test]
    async fn test_unsupported_type_records_pending() {
        let (executor, echo, memory) = executor();
        let outcome = executor
            .execute_task(&TaskRequest::with_type("send an email to Ann", "x"))
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.message.as_deref(), Some(UNSUPPORTED_TASK));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);

        let history = memory.tasks_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].task_type, "email");
        assert_eq!(history[0].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_capability_error_becomes_failed_outcome() {
        let (executor, _echo, memory) = executor();
        let outcome = executor
            .execute_task(&TaskRequest::new("browse example.com"))
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("network unreachable"));

        let record = &memory.tasks_history(1).unwrap()[0];
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result.as_ref().unwrap()["error"], "network unreachable");
    }

    #[tokio::test]
    async fn test_capability_panic_becomes_failed_outcome() {
        let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(Panicking));
        let executor = Arc::new(TaskExecutor::new(
            TaskRouter::with_defaults(),
            registry,
            memory.clone(),
        ));

        let handle = {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .execute_task(&TaskRequest::new("organize downloads"))
                    .await
            })
        };
        let outcome = handle.await.expect("panic escaped the executor");

        assert!(!outcome.success);
        assert!(outcome
            .error
            .as_deref()
            .unwrap()
            .starts_with("capability panicked: index out of bounds"));

        let history = memory.tasks_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TaskStatus::Completed);
        assert_eq!(history[0].result.as_ref().unwrap()["success"], false);
    }

    #[tokio::test]
    async fn test_closed_store_does_not_change_outcome() {
        let (executor, _echo, memory) = executor();
        memory.close();
        let outcome = executor.execute_task(&TaskRequest::new("backup notes")).await;
        assert!(outcome.success);
    }

    #[test]
    fn test_registry_lists_sorted_types() {
        let (executor, _echo, _memory) = executor();
        assert_eq!(executor.capabilities().task_types(), vec!["file", "web"]);
        assert!(executor.capabilities().get("email").is_none());
    }
}
