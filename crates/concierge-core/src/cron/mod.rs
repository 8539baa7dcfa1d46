pub mod scheduler;
pub mod types;

pub use scheduler::{parse_cron, Scheduler, TimerHandle, SCHEDULED_TASK};
pub use types::{ScheduleResult, ScheduledTaskInfo};
