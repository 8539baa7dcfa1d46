use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::task::TaskRequest;

/// Query tokens shorter than this are ignored by `search_memories`.
const MIN_KEYWORD_CHARS: usize = 4;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// One persisted user/assistant exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub id: i64,
    pub user_message: String,
    pub agent_response: String,
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Optional data stored alongside an interaction.
#[derive(Debug, Clone, Default)]
pub struct InteractionMetadata {
    pub tokens_used: Option<u64>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// A task submission and, once available, its result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: i64,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub created_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<i64>,
}

/// Point-in-time row counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_conversations: u64,
    pub total_tasks: u64,
    pub total_preferences: u64,
}

/// Durable store for conversation turns, preferences and task history.
///
/// A single SQLite connection shared behind a mutex. `close()` drops the
/// connection; every later call fails with [`StorageError::Closed`].
pub struct MemoryStore {
    conn: Mutex<Option<Connection>>,
}

impl MemoryStore {
    /// Open (or create) the store at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self::with_connection(conn)?;
        info!("Connected to memory database at {}", db_path.display());
        Ok(store)
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_message TEXT NOT NULL,
                agent_response TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                tokens_used INTEGER,
                context_tags TEXT
            );

            CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                description TEXT NOT NULL,
                type TEXT NOT NULL,
                status TEXT NOT NULL,
                result TEXT,
                created_at_ms INTEGER NOT NULL,
                completed_at_ms INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_timestamp
                ON conversations(timestamp_ms DESC);

            CREATE INDEX IF NOT EXISTS idx_tasks_status
                ON tasks_history(status, created_at_ms DESC);",
        )?;

        debug!("Memory tables initialized");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let guard = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;
        f(conn)
    }

    /// Append a conversation turn. Returns the new row id.
    pub fn save_interaction(
        &self,
        user_message: &str,
        agent_response: &str,
        metadata: &InteractionMetadata,
    ) -> Result<i64, StorageError> {
        let tags = if metadata.tags.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&metadata.tags)?)
        };
        let now = Utc::now().timestamp_millis();

        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (user_message, agent_response, timestamp_ms, tokens_used, context_tags)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user_message,
                    agent_response,
                    now,
                    metadata.tokens_used.map(|t| t as i64),
                    tags
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        debug!("Interaction {id} saved to memory");
        Ok(id)
    }

    /// Keyword search over stored turns, most recent first.
    ///
    /// Tokens shorter than four characters are dropped and the survivors must
    /// appear in order (`%tok1%tok2%`) in either side of the exchange. A query
    /// with no surviving tokens matches every turn. Failures are logged and
    /// yield an empty result.
    pub fn search_memories(&self, query: &str, limit: usize) -> Vec<ConversationTurn> {
        let pattern = build_like_pattern(query);
        let result = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_message, agent_response, timestamp_ms, tokens_used, context_tags
                 FROM conversations
                 WHERE LOWER(user_message) LIKE ?1 ESCAPE '\\'
                    OR LOWER(agent_response) LIKE ?1 ESCAPE '\\'
                 ORDER BY timestamp_ms DESC, id DESC
                 LIMIT ?2",
            )?;
            let turns = stmt
                .query_map(params![pattern, limit as i64], turn_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(turns)
        });

        match result {
            Ok(turns) => turns,
            Err(e) => {
                warn!("Failed to search memories: {e}");
                Vec::new()
            }
        }
    }

    /// The most recent turns, newest first.
    pub fn recent_conversations(&self, limit: usize) -> Result<Vec<ConversationTurn>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_message, agent_response, timestamp_ms, tokens_used, context_tags
                 FROM conversations
                 ORDER BY timestamp_ms DESC, id DESC
                 LIMIT ?1",
            )?;
            let turns = stmt
                .query_map([limit as i64], turn_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(turns)
        })
    }

    /// Upsert a preference. Last write wins.
    pub fn save_preference(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let json = serde_json::to_string(value)?;
        let now = Utc::now().timestamp_millis();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO preferences (key, value, updated_at_ms) VALUES (?1, ?2, ?3)",
                params![key, json, now],
            )?;
            Ok(())
        })?;
        debug!("Preference saved: {key}");
        Ok(())
    }

    /// Read a preference, returning `default` when it is missing or
    /// unreadable.
    pub fn get_preference(&self, key: &str, default: Value) -> Value {
        match self.load_preference::<Value>(key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                warn!("Failed to get preference '{key}': {e}");
                default
            }
        }
    }

    /// Read and deserialize a preference.
    pub fn load_preference<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let raw: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT value FROM preferences WHERE key = ?1", [key], |row| {
                    row.get(0)
                })
                .optional()?)
        })?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Record a task. Completed when `result` is present, pending otherwise.
    /// Returns the record id.
    pub fn save_task(&self, task: &TaskRequest, result: Option<&Value>) -> Result<i64, StorageError> {
        let task_type = task
            .task_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or("general");
        let (status, result_json, completed_at) = match result {
            Some(value) => (
                TaskStatus::Completed,
                Some(serde_json::to_string(value)?),
                Some(Utc::now().timestamp_millis()),
            ),
            None => (TaskStatus::Pending, None, None),
        };
        let now = Utc::now().timestamp_millis();

        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks_history (description, type, status, result, created_at_ms, completed_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    task.description,
                    task_type,
                    status.as_str(),
                    result_json,
                    now,
                    completed_at
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        debug!("Task {id} saved to history ({})", status.as_str());
        Ok(id)
    }

    /// Move a pending task to completed. Returns `false` when the task is
    /// unknown or already completed; completed records are never rewritten.
    pub fn complete_task(&self, id: i64, result: &Value) -> Result<bool, StorageError> {
        let json = serde_json::to_string(result)?;
        let now = Utc::now().timestamp_millis();
        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE tasks_history SET status = 'completed', result = ?2, completed_at_ms = ?3
                 WHERE id = ?1 AND status = 'pending'",
                params![id, json, now],
            )?)
        })?;
        Ok(changed > 0)
    }

    /// Task history, newest first.
    pub fn tasks_history(&self, limit: usize) -> Result<Vec<TaskRecord>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, description, type, status, result, created_at_ms, completed_at_ms
                 FROM tasks_history
                 ORDER BY created_at_ms DESC, id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit as i64], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, Option<i64>>(6)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(
                    |(id, description, task_type, status, result, created_at_ms, completed_at_ms)| {
                        let result = match result {
                            Some(json) => Some(serde_json::from_str(&json)?),
                            None => None,
                        };
                        Ok(TaskRecord {
                            id,
                            description,
                            task_type,
                            status: TaskStatus::from_str(&status).unwrap_or(TaskStatus::Pending),
                            result,
                            created_at_ms,
                            completed_at_ms,
                        })
                    },
                )
                .collect()
        })
    }

    /// Delete turns older than `days_to_keep` days. Zero removes every turn.
    pub fn clear_old_memories(&self, days_to_keep: u32) -> Result<usize, StorageError> {
        let removed = self.with_conn(|conn| {
            if days_to_keep == 0 {
                Ok(conn.execute("DELETE FROM conversations", [])?)
            } else {
                let cutoff = Utc::now().timestamp_millis() - i64::from(days_to_keep) * MS_PER_DAY;
                Ok(conn.execute(
                    "DELETE FROM conversations WHERE timestamp_ms < ?1",
                    [cutoff],
                )?)
            }
        })?;
        info!("Cleared {removed} old conversations");
        Ok(removed)
    }

    pub fn stats(&self) -> Result<MemoryStats, StorageError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, StorageError> {
                let n: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
                Ok(n as u64)
            };
            Ok(MemoryStats {
                total_conversations: count("conversations")?,
                total_tasks: count("tasks_history")?,
                total_preferences: count("preferences")?,
            })
        })
    }

    /// Release the underlying connection. Safe to call more than once.
    pub fn close(&self) {
        let mut guard = match self.conn.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(conn) = guard.take() {
            if let Err((_, e)) = conn.close() {
                warn!("Error closing memory database: {e}");
            } else {
                info!("Memory database connection closed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().map(|g| g.is_none()).unwrap_or(true)
    }
}

fn turn_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationTurn> {
    let tags: Option<String> = row.get(5)?;
    Ok(ConversationTurn {
        id: row.get(0)?,
        user_message: row.get(1)?,
        agent_response: row.get(2)?,
        timestamp_ms: row.get(3)?,
        tokens_used: row.get::<_, Option<i64>>(4)?.map(|t| t as u64),
        tags: tags
            .and_then(|t| serde_json::from_str(&t).ok())
            .unwrap_or_default(),
    })
}

/// Build the LIKE pattern for a memory search query.
fn build_like_pattern(query: &str) -> String {
    let tokens: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .filter(|token| token.chars().count() >= MIN_KEYWORD_CHARS)
        .map(escape_like)
        .collect();
    format!("%{}%", tokens.join("%"))
}

fn escape_like(token: &str) -> String {
    let mut escaped = String::with_capacity(token.len());
    for c in token.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
