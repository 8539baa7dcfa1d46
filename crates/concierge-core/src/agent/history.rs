use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::model::{ChatMessage, Role};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub timestamp_ms: i64,
}

/// In-session conversation log. Entries are only ever appended in
/// user/assistant pairs.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    entries: Vec<HistoryEntry>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one completed exchange.
    pub fn push_exchange(&mut self, user: &str, assistant: &str) {
        let now = Utc::now().timestamp_millis();
        self.entries.push(HistoryEntry {
            role: Role::User,
            content: user.to_string(),
            timestamp_ms: now,
        });
        self.entries.push(HistoryEntry {
            role: Role::Assistant,
            content: assistant.to_string(),
            timestamp_ms: now,
        });
    }

    /// The last `window - 1` entries followed by `pending`, which is the
    /// inbound user message not yet committed. At most `window` messages.
    pub fn window_with(&self, pending: &str, window: usize) -> Vec<ChatMessage> {
        if window == 0 {
            return Vec::new();
        }
        let keep = window - 1;
        let start = self.entries.len().saturating_sub(keep);
        let mut messages: Vec<ChatMessage> = self.entries[start..]
            .iter()
            .map(|e| ChatMessage {
                role: e.role,
                content: e.content.clone(),
            })
            .collect();
        messages.push(ChatMessage::user(pending));
        messages
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of completed exchanges.
    pub fn exchange_count(&self) -> usize {
        self.entries.len() / 2
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
