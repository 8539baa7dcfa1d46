use anyhow::Result;
use async_trait::async_trait;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::completion::{CompletionModel, CompletionRequest, Message};
use rig::message::{AssistantContent, Text, UserContent};
use rig::OneOrMany;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::mcp::McpServerParam;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One completion call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub max_tokens: u64,
    pub temperature: f64,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<Vec<McpServerParam>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentBlock {
    pub text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ModelResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>, usage: Usage) -> Self {
        Self {
            content: vec![ContentBlock { text: text.into() }],
            usage,
        }
    }

    /// The reply text: the first content block.
    pub fn first_text(&self) -> Option<&str> {
        self.content.first().map(|block| block.text.as_str())
    }
}

/// A chat completion backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse>;
}

/// [`LanguageModel`] backed by a rig provider client.
///
/// Enabled MCP servers are forwarded as the `mcp_servers` request parameter.
#[allow(deprecated)]
pub struct RigLanguageModel {
    handle: CompletionModelHandle<'static>,
}

#[allow(deprecated)]
impl RigLanguageModel {
    pub fn new(handle: CompletionModelHandle<'static>) -> Self {
        Self { handle }
    }
}

fn to_rig_message(message: &ChatMessage) -> Message {
    let text = Text {
        text: message.content.clone(),
    };
    match message.role {
        Role::User => Message::User {
            content: OneOrMany::one(UserContent::Text(text)),
        },
        Role::Assistant => Message::Assistant {
            id: None,
            content: OneOrMany::one(AssistantContent::Text(text)),
        },
    }
}

#[async_trait]
#[allow(deprecated)]
impl LanguageModel for RigLanguageModel {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse> {
        let history: Vec<Message> = request.messages.iter().map(to_rig_message).collect();
        let chat_history = OneOrMany::many(history)
            .map_err(|_| anyhow::anyhow!("completion request has no messages"))?;

        let additional_params = match &request.mcp_servers {
            Some(servers) if !servers.is_empty() => {
                Some(serde_json::json!({ "mcp_servers": servers }))
            }
            _ => None,
        };

        debug!(
            "LLM request: model={}, {} messages, temp={}, max_tokens={}",
            request.model,
            request.messages.len(),
            request.temperature,
            request.max_tokens
        );

        let rig_request = CompletionRequest {
            preamble: (!request.system.is_empty()).then_some(request.system),
            chat_history,
            documents: Vec::new(),
            tools: Vec::new(),
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            tool_choice: None,
            additional_params,
        };

        let response = self
            .handle
            .completion(rig_request)
            .await
            .map_err(|e| anyhow::anyhow!("LLM completion error: {e}"))?;

        let content = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(t) => Some(ContentBlock {
                    text: t.text.clone(),
                }),
                _ => None,
            })
            .collect();

        Ok(ModelResponse {
            content,
            usage: Usage {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
            },
        })
    }
}
