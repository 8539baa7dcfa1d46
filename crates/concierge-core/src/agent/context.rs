use chrono::{DateTime, Local, TimeZone};

use crate::memory::ConversationTurn;

const CAPABILITIES: &[&str] = &[
    "Email management (sending, organizing, filtering)",
    "Calendar management (scheduling, reminders)",
    "File operations (organizing, searching, backing up)",
    "Web research and information gathering",
    "Data analysis and reporting",
    "Task scheduling and automation",
    "Remembering context and user preferences",
];

const GUIDELINES: &[&str] = &[
    "Be proactive in suggesting task automation",
    "Ask clarifying questions when needed",
    "Execute tasks step by step",
    "Provide clear feedback on task completion",
    "Remember user preferences and context",
    "Be concise but thorough",
    "Reply in the language the user writes in",
    "To hand work to the task runner, put it on its own line as `TASK: <description>`",
];

/// Build the system prompt for one exchange.
pub fn build_system_prompt(
    agent_name: &str,
    now: &DateTime<Local>,
    additional_context: Option<&str>,
) -> String {
    let mut prompt = format!(
        "You are {agent_name}, an AI assistant specialized in automating digital life tasks.\n\n\
         Current Date/Time: {}\n\n\
         Your capabilities include:\n",
        now.format("%A, %B %-d, %Y at %-I:%M %p")
    );
    for capability in CAPABILITIES {
        prompt.push_str(&format!("- {capability}\n"));
    }
    prompt.push_str("\nGuidelines:\n");
    for guideline in GUIDELINES {
        prompt.push_str(&format!("- {guideline}\n"));
    }

    if let Some(extra) = additional_context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push('\n');
        prompt.push_str(extra);
        prompt.push('\n');
    }
    prompt
}

/// Render recalled turns as a single user-role context message.
pub fn build_context_message(memories: &[ConversationTurn]) -> Option<String> {
    if memories.is_empty() {
        return None;
    }

    let entries: Vec<String> = memories
        .iter()
        .map(|turn| {
            format!(
                "[{}] User: {}\nAssistant: {}",
                format_timestamp(turn.timestamp_ms),
                turn.user_message,
                turn.agent_response
            )
        })
        .collect();

    Some(format!("Previous relevant context:\n{}", entries.join("\n\n")))
}

fn format_timestamp(ms: i64) -> String {
    match Local.timestamp_millis_opt(ms).single() {
        Some(ts) => ts.format("%Y-%m-%d %H:%M").to_string(),
        None => ms.to_string(),
    }
}
