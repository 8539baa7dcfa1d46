use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local, Utc};
use croner::Cron;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::types::{ScheduleResult, ScheduledTaskInfo};
use crate::error::ValidationError;
use crate::task::{TaskExecutor, TaskRequest};

/// Task type attached to every scheduled firing.
pub const SCHEDULED_TASK: &str = "scheduled";

/// Owns a timer task and aborts it when dropped.
#[derive(Debug)]
pub struct TimerHandle(JoinHandle<()>);

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct ScheduledTask {
    info: ScheduledTaskInfo,
    order: u64,
    _timer: TimerHandle,
}

/// Parse a cron expression. Five fields, an optional leading seconds field,
/// or an `@daily`-style alias.
pub fn parse_cron(expr: &str) -> Result<Cron, ValidationError> {
    Cron::new(expr)
        .with_seconds_optional()
        .parse()
        .map_err(|e| ValidationError::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })
}

/// Next firing strictly after `after`, in local time.
pub fn next_occurrence(cron: &Cron, after: &DateTime<Local>) -> Option<DateTime<Local>> {
    cron.find_next_occurrence(after, false).ok()
}

/// Cron-driven recurring task runner.
///
/// Each scheduled task gets its own tokio timer. Every firing runs the
/// description through the executor as a `"scheduled"` task on a separate
/// spawned task, so a slow run never delays the next tick.
pub struct Scheduler {
    executor: Arc<TaskExecutor>,
    tasks: Mutex<HashMap<String, ScheduledTask>>,
    seq: AtomicU64,
}

impl Scheduler {
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Self {
            executor,
            tasks: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ScheduledTask>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a recurring task. Must be called from within a tokio runtime.
    pub fn schedule_task(&self, description: &str, cron_expression: &str) -> ScheduleResult {
        let cron = match parse_cron(cron_expression) {
            Ok(cron) => cron,
            Err(e) => {
                warn!("Failed to schedule task: {e}");
                return ScheduleResult::failed(e.to_string());
            }
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => return ScheduleResult::failed(format!("no async runtime available: {e}")),
        };

        let now_ms = Utc::now().timestamp_millis();
        let order = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("task_{now_ms}_{order}");

        let timer = runtime.spawn(run_timer(
            id.clone(),
            cron,
            description.to_string(),
            self.executor.clone(),
        ));

        let info = ScheduledTaskInfo {
            id: id.clone(),
            description: description.to_string(),
            cron_expression: cron_expression.to_string(),
            created_at_ms: now_ms,
        };
        self.lock().insert(
            id.clone(),
            ScheduledTask {
                info,
                order,
                _timer: TimerHandle(timer),
            },
        );

        info!("Scheduled task {id}: {description} ({cron_expression})");
        ScheduleResult::scheduled(id)
    }

    /// Stop a task's timer. Runs already in flight are not interrupted.
    pub fn cancel_scheduled_task(&self, task_id: &str) -> ScheduleResult {
        match self.lock().remove(task_id) {
            Some(_) => {
                info!("Cancelled scheduled task {task_id}");
                ScheduleResult::cancelled()
            }
            None => ScheduleResult::not_found(),
        }
    }

    /// Active tasks in creation order.
    pub fn scheduled_tasks(&self) -> Vec<ScheduledTaskInfo> {
        let guard = self.lock();
        let mut tasks: Vec<&ScheduledTask> = guard.values().collect();
        tasks.sort_by_key(|t| t.order);
        tasks.into_iter().map(|t| t.info.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every task. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let drained: Vec<ScheduledTask> = self.lock().drain().map(|(_, t)| t).collect();
        if !drained.is_empty() {
            info!("Scheduler stopped ({} tasks cancelled)", drained.len());
        }
    }
}

async fn run_timer(id: String, cron: Cron, description: String, executor: Arc<TaskExecutor>) {
    let mut last_fire: Option<DateTime<Local>> = None;
    loop {
        let now = Local::now();
        // Never compute from before the previous tick, or an early wakeup fires twice
        let from = last_fire.map_or(now, |last| last.max(now));
        let Some(next) = next_occurrence(&cron, &from) else {
            warn!("Scheduled task {id} has no further occurrences");
            break;
        };

        let wait = (next - Local::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
        last_fire = Some(next);

        debug!("Running scheduled task {id}: {description}");
        let executor = executor.clone();
        let task = TaskRequest::with_type(description.clone(), SCHEDULED_TASK);
        let task_id = id.clone();
        tokio::spawn(async move {
            let outcome = executor.execute_task(&task).await;
            if !outcome.success {
                warn!("Scheduled task {task_id} failed: {}", outcome.summary());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::task::{Capability, CapabilityRegistry, TaskOutcome, TaskRouter};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl Capability for Counter {
        fn task_type(&self) -> &str {
            SCHEDULED_TASK
        }

        async fn execute(&self, _task: &TaskRequest) -> anyhow::Result<TaskOutcome> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(TaskOutcome::ok("ran"))
        }
    }

    fn scheduler() -> (Scheduler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(Counter(count.clone())));
        let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
        let executor = Arc::new(TaskExecutor::new(
            TaskRouter::with_defaults(),
            registry,
            memory,
        ));
        (Scheduler::new(executor), count)
    }

    #[test]
    fn test_parse_cron() {
        assert!(parse_cron("0 9 * * *").is_ok());
        assert!(parse_cron("*/5 * * * * *").is_ok());
        assert!(parse_cron("@daily").is_ok());
        assert!(matches!(
            parse_cron("not a cron"),
            Err(ValidationError::InvalidCron { .. })
        ));
        assert!(parse_cron("61 * * * *").is_err());
    }

    #[test]
    fn test_next_occurrence_is_after() {
        let cron = parse_cron("0 9 * * *").unwrap();
        let now = Local::now();
        let next = next_occurrence(&cron, &now).unwrap();
        assert!(next > now);
        assert!(next - now <= chrono::Duration::days(1));
    }

    #[tokio::test]
    async fn test_invalid_cron_is_rejected() {
        let (scheduler, _count) = scheduler();
        let result = scheduler.schedule_task("water the plants", "every tuesday");
        assert!(!result.success);
        assert!(result.error.unwrap().contains("invalid cron expression"));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_requires_runtime() {
        let (scheduler, _count) = scheduler();
        let result = scheduler.schedule_task("water the plants", "0 9 * * *");
        assert!(!result.success);
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_list_and_cancel() {
        let (scheduler, _count) = scheduler();
        let a = scheduler.schedule_task("water the plants", "0 9 * * *");
        let b = scheduler.schedule_task("water the plants", "0 9 * * *");
        assert!(a.success && b.success);
        assert_ne!(a.task_id, b.task_id);

        let listed = scheduler.scheduled_tasks();
        assert_eq!(listed.len(), 2);
        assert_eq!(Some(listed[0].id.clone()), a.task_id);
        assert_eq!(listed[0].cron_expression, "0 9 * * *");

        let missing = scheduler.cancel_scheduled_task("task_0_0");
        assert!(!missing.success);
        assert_eq!(missing.message.as_deref(), Some("Task not found"));
        assert_eq!(scheduler.len(), 2);

        let cancelled = scheduler.cancel_scheduled_task(a.task_id.as_deref().unwrap());
        assert!(cancelled.success);
        assert_eq!(scheduler.scheduled_tasks().len(), 1);
        assert_eq!(Some(scheduler.scheduled_tasks()[0].id.clone()), b.task_id);
    }

    #[tokio::test]
    async fn test_task_fires_as_scheduled_type() {
        let (scheduler, count) = scheduler();
        let result = scheduler.schedule_task("water the plants", "* * * * * *");
        assert!(result.success);

        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_prevents_firing() {
        let (scheduler, count) = scheduler();
        scheduler.schedule_task("water the plants", "* * * * * *");
        scheduler.schedule_task("feed the cat", "* * * * * *");
        scheduler.shutdown();
        scheduler.shutdown();

        assert!(scheduler.is_empty());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
