use serde::{Deserialize, Serialize};

/// Public view of a scheduled task. Carries no timer handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTaskInfo {
    pub id: String,
    pub description: String,
    pub cron_expression: String,
    pub created_at_ms: i64,
}

/// Result of a schedule or cancel request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScheduleResult {
    pub fn scheduled(task_id: String) -> Self {
        Self {
            success: true,
            task_id: Some(task_id),
            message: Some("Task scheduled successfully".into()),
            error: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            success: true,
            message: Some("Task cancelled".into()),
            ..Self::default()
        }
    }

    pub fn not_found() -> Self {
        Self {
            success: false,
            message: Some("Task not found".into()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}
