use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A unit of work submitted to the executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub description: String,
    /// Declared task type. Used only when no routing rule matches.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
}

impl TaskRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            task_type: None,
        }
    }

    pub fn with_type(description: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            task_type: Some(task_type.into()),
        }
    }
}

/// Result of running a task: `{success, message?, error?, ..payload}`.
///
/// Serialises flat so capability-specific payload fields sit beside the
/// status fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TaskOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl TaskOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// A failure described by a human-readable message (e.g. unsupported
    /// action) rather than an error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
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

    /// Attach a payload field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// The message, or the error when there is no message.
    pub fn summary(&self) -> &str {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or("")
    }
}
