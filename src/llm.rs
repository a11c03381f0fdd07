//! Chat model abstraction and the OpenAI-compatible client.
//!
//! Conversation turns are a tagged [`ChatMessage`] enum (system, human, ai,
//! tool) rather than loose JSON, and tool calls and usage metadata are typed
//! fields on the `Ai` variant. [`ChatModel`] is the seam the agent talks to;
//! [`OpenAiChatModel`] implements it over `POST {endpoint}/v1/chat/completions`,
//! which both OpenAI and Ollama serve.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::LlmConfig;
use crate::tools::ToolDefinition;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Token usage reported by the provider for one model turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System {
        content: String,
    },
    Human {
        content: String,
    },
    Ai {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<UsageMetadata>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::System {
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        ChatMessage::Human {
            content: content.into(),
        }
    }

    /// A final assistant answer with no tool calls.
    pub fn ai(content: impl Into<String>) -> Self {
        ChatMessage::Ai {
            content: content.into(),
            tool_calls: Vec::new(),
            usage: None,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            ChatMessage::System { content }
            | ChatMessage::Human { content }
            | ChatMessage::Ai { content, .. }
            | ChatMessage::Tool { content, .. } => content,
        }
    }
}

/// Errors from a chat model call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing API key for provider '{0}'")]
    MissingApiKey(String),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status}: {snippet}")]
    Status { status: u16, snippet: String },

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("provider returned no choices")]
    EmptyChoices,
}

/// A chat model that can answer with text or request tool calls.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier used in reasoning and logs.
    fn model_name(&self) -> &str;

    /// Send the conversation and return the next `Ai` message.
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, LlmError>;
}

/// Build a model for `cfg` if the provider is available, else `None`.
pub fn create_chat_model(cfg: &LlmConfig) -> Result<Option<Arc<dyn ChatModel>>, LlmError> {
    if !cfg.is_available() {
        return Ok(None);
    }
    Ok(Some(Arc::new(OpenAiChatModel::new(cfg)?)))
}

/// Client for OpenAI-style chat completions with function calling.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAiChatModel {
    pub fn new(cfg: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = cfg.resolve_api_key();
        if cfg.provider == "openai" && api_key.is_none() {
            return Err(LlmError::MissingApiKey(cfg.provider.clone()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        let base = cfg.endpoint_or_default();
        let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));

        tracing::info!(provider = %cfg.provider, model = %cfg.model, %url, "chat model initialized");

        Ok(Self {
            client,
            model: cfg.model.clone(),
            url,
            api_key,
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        })
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(to_wire_message).collect::<Vec<_>>(),
        });
        if !tools.is_empty() {
            body["tools"] = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
        }
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, LlmError> {
        let started = Instant::now();
        let mut request = self
            .client
            .post(&self.url)
            .json(&self.request_body(messages, tools));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(300).collect();
            tracing::error!(%status, %snippet, model = %self.model, "chat completion failed");
            return Err(LlmError::Status {
                status: status.as_u16(),
                snippet,
            });
        }

        let out: WireResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;
        let choice = out.choices.into_iter().next().ok_or(LlmError::EmptyChoices)?;

        tracing::debug!(
            model = %self.model,
            latency_ms = started.elapsed().as_millis() as u64,
            tool_calls = choice.message.tool_calls.len(),
            "chat completion received"
        );

        Ok(ChatMessage::Ai {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(|tc| ToolCall {
                    id: tc.id,
                    arguments: serde_json::from_str(&tc.function.arguments)
                        .unwrap_or(Value::String(tc.function.arguments)),
                    name: tc.function.name,
                })
                .collect(),
            usage: out.usage.map(|u| UsageMetadata {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }
}

fn to_wire_message(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System { content } => json!({ "role": "system", "content": content }),
        ChatMessage::Human { content } => json!({ "role": "user", "content": content }),
        ChatMessage::Ai {
            content,
            tool_calls,
            ..
        } => {
            let mut msg = json!({ "role": "assistant", "content": content });
            if !tool_calls.is_empty() {
                msg["tool_calls"] = tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
            }
            msg
        }
        ChatMessage::Tool {
            tool_call_id,
            content,
            ..
        } => json!({ "role": "tool", "tool_call_id": tool_call_id, "content": content }),
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}
