//! Agentic LLM source context detection.
//!
//! The [`AgenticDetector`] gives a chat model a read-only view of the project
//! (see [`crate::tools`]) and lets it call tools until it answers with a JSON
//! verdict:
//!
//! ```json
//! { "files": ["src/a.ts"], "folders": ["src/lib/"], "confidence": "high",
//!   "reasoning": ["..."] }
//! ```
//!
//! One attempt per document. Every failure (model error, step cap, bad JSON)
//! degrades to an empty low-confidence response with the cause in its
//! reasoning; [`AgenticDetector::detect`] never returns an error.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::config::AgentConfig;
use crate::llm::{ChatMessage, ChatModel};
use crate::models::{Confidence, SourceContext};
use crate::tools::{ToolContext, ToolRegistry};

/// Characters of tool output kept in debug logs.
const LOG_PREVIEW_CHARS: usize = 500;

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You map documentation pages to the source code they describe.

You can browse the project with read-only tools. Start broad (folders, file lists), narrow down with find_files, and read files only when a name is not conclusive. Prefer specific files over whole folders. Do not guess paths you have not seen in a tool result.

When you are done, answer with only a JSON object:
{"files": [relative file paths], "folders": [relative folder paths], "confidence": "high" | "medium" | "low", "reasoning": [short sentences]}

Use "high" only when the page clearly documents the listed code."#;

/// Prompt configuration for one detector instance.
#[derive(Debug, Clone)]
pub struct AgentPromptConfig {
    pub system_prompt: String,
    pub allowed_tools: Vec<String>,
    /// Maximum model invocations per document.
    pub max_iterations: usize,
    /// Characters of page content included in the prompt.
    pub content_budget: usize,
}

impl Default for AgentPromptConfig {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for AgentPromptConfig {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            system_prompt: cfg
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            allowed_tools: cfg.allowed_tools.clone(),
            max_iterations: cfg.max_iterations,
            content_budget: cfg.content_budget,
        }
    }
}

/// Everything the agent is told about one page. Also the cache key input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub doc_path: String,
    pub doc_title: String,
    pub doc_content: String,
    pub available_files: Vec<String>,
    pub available_folders: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_mapping: Option<SourceContext>,
}

/// The agent's verdict for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub files: Vec<String>,
    pub folders: Vec<String>,
    pub confidence: Confidence,
    pub reasoning: Vec<String>,
    pub tokens_used: u64,
    pub tool_calls: usize,
    pub model: String,
    #[serde(default)]
    pub cached: bool,
}

impl AgentResponse {
    fn failed(model: &str, reason: String) -> Self {
        Self {
            files: Vec::new(),
            folders: Vec::new(),
            confidence: Confidence::Low,
            reasoning: vec![reason],
            tokens_used: 0,
            tool_calls: 0,
            model: model.to_string(),
            cached: false,
        }
    }
}

/// A finished detection with its full message trace.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub response: AgentResponse,
    pub trace: Vec<ChatMessage>,
    /// Set when the run degraded to a fallback response.
    pub failure: Option<String>,
}

/// Drives the bounded tool-calling loop for one page at a time.
pub struct AgenticDetector {
    model: Arc<dyn ChatModel>,
    prompt: AgentPromptConfig,
    tools: ToolRegistry,
}

impl AgenticDetector {
    pub fn new(model: Arc<dyn ChatModel>, prompt: AgentPromptConfig) -> Self {
        let tools = ToolRegistry::allowed(&prompt.allowed_tools);
        Self {
            model,
            prompt,
            tools,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run the agent for `request` against the snapshot in `ctx`.
    pub async fn detect(&self, request: &AgentRequest, ctx: &ToolContext) -> AgentRun {
        let mut trace = vec![
            ChatMessage::system(self.prompt.system_prompt.clone()),
            ChatMessage::human(build_user_prompt(request, self.prompt.content_budget)),
        ];

        match self.run_loop(&mut trace, ctx).await {
            Ok((final_text, tool_calls)) => {
                let verdict = parse_agent_response(&final_text);
                let failure = verdict.parse_error.clone();
                let mut reasoning = verdict.reasoning;
                if let Some(err) = &verdict.parse_error {
                    tracing::warn!(doc = %request.doc_path, error = %err, "agent answer was not valid JSON");
                    reasoning.push(format!("Failed to parse agent response: {}", err));
                }
                AgentRun {
                    response: AgentResponse {
                        files: verdict.files,
                        folders: verdict.folders,
                        confidence: verdict.confidence,
                        reasoning,
                        tokens_used: count_tokens(&trace),
                        tool_calls,
                        model: self.model_name().to_string(),
                        cached: false,
                    },
                    trace,
                    failure,
                }
            }
            Err(err) => {
                tracing::warn!(doc = %request.doc_path, error = %err, "agentic detection failed");
                let reason = format!("Agentic detection failed: {}", err);
                let mut response = AgentResponse::failed(self.model_name(), reason.clone());
                response.tokens_used = count_tokens(&trace);
                AgentRun {
                    response,
                    trace,
                    failure: Some(reason),
                }
            }
        }
    }

    /// Invoke the model until it answers without tool calls. Returns the
    /// final text and the number of tool calls made.
    async fn run_loop(&self, trace: &mut Vec<ChatMessage>, ctx: &ToolContext) -> Result<(String, usize)> {
        let definitions = self.tools.definitions();
        let mut tool_calls_made = 0;

        for _ in 0..self.prompt.max_iterations {
            let reply = self.model.invoke(trace, &definitions).await?;
            let calls = match &reply {
                ChatMessage::Ai { tool_calls, .. } => tool_calls.clone(),
                other => bail!("model returned a non-ai message: {:?}", other),
            };
            let content = reply.content().to_string();
            trace.push(reply);

            if calls.is_empty() {
                return Ok((content, tool_calls_made));
            }

            for call in calls {
                let outcome = self.tools.call(&call.name, &call.arguments, ctx).await;
                let body = outcome.to_json().to_string();
                tracing::debug!(
                    tool = %call.name,
                    args = %call.arguments,
                    ok = outcome.is_ok(),
                    response = %preview(&body, LOG_PREVIEW_CHARS),
                    "agent tool call"
                );
                tool_calls_made += 1;
                trace.push(ChatMessage::Tool {
                    tool_call_id: call.id,
                    name: call.name,
                    content: body,
                });
            }
        }

        bail!(
            "agent did not produce a final answer within {} steps",
            self.prompt.max_iterations
        )
    }
}

/// Build the human turn: page identity, a bounded content excerpt, the
/// snapshot size, and any existing mapping marked as revisable.
pub fn build_user_prompt(request: &AgentRequest, content_budget: usize) -> String {
    let mut prompt = format!(
        "Documentation page: {}\nTitle: {}\n\nThe project has {} files in {} folders.\n\n",
        request.doc_path,
        request.doc_title,
        request.available_files.len(),
        request.available_folders.len()
    );

    prompt.push_str("Page content:\n```\n");
    if request.doc_content.chars().count() > content_budget {
        let excerpt: String = request.doc_content.chars().take(content_budget).collect();
        prompt.push_str(&excerpt);
        prompt.push_str("\n[... content truncated ...]");
    } else {
        prompt.push_str(&request.doc_content);
    }
    prompt.push_str("\n```\n");

    if let Some(existing) = &request.existing_mapping {
        prompt.push_str(
            "\nExisting mapping (may be outdated; confirm or revise it, do not assume it is correct):\n",
        );
        prompt.push_str(&format!("- files: {}\n", existing.files.join(", ")));
        prompt.push_str(&format!("- folders: {}\n", existing.folders.join(", ")));
    }

    prompt.push_str("\nExplore the project with the tools, then answer with the JSON object.");
    prompt
}

/// A verdict after lenient coercion of the model's JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedVerdict {
    pub files: Vec<String>,
    pub folders: Vec<String>,
    pub confidence: Confidence,
    pub reasoning: Vec<String>,
    pub parse_error: Option<String>,
}

/// Extract the verdict from bare JSON or a fenced ```json / ``` block.
/// Unparsable text yields an empty low-confidence verdict with
/// `parse_error` set.
pub fn parse_agent_response(text: &str) -> ParsedVerdict {
    let candidate = fenced_block(text).unwrap_or_else(|| text.trim());
    let value: Value = match serde_json::from_str(candidate) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => return unparsed("response is not a JSON object".to_string()),
        Err(err) => return unparsed(err.to_string()),
    };

    ParsedVerdict {
        files: string_array(&value["files"]),
        folders: string_array(&value["folders"]),
        confidence: value["confidence"]
            .as_str()
            .and_then(Confidence::parse)
            .unwrap_or(Confidence::Low),
        reasoning: string_array(&value["reasoning"]),
        parse_error: None,
    }
}

fn unparsed(err: String) -> ParsedVerdict {
    ParsedVerdict {
        files: Vec::new(),
        folders: Vec::new(),
        confidence: Confidence::Low,
        reasoning: Vec::new(),
        parse_error: Some(err),
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    let end = after.find("```")?;
    Some(after[..end].trim())
}

fn string_array(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Token usage for a trace: provider usage metadata when any message has it,
/// otherwise total AI message characters divided by four.
pub fn count_tokens(trace: &[ChatMessage]) -> u64 {
    let mut reported = None;
    let mut chars = 0u64;
    for message in trace {
        if let ChatMessage::Ai { content, usage, .. } = message {
            chars += content.chars().count() as u64;
            if let Some(usage) = usage {
                *reported.get_or_insert(0) += usage.total_tokens;
            }
        }
    }
    reported.unwrap_or(chars / 4)
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{}…", head)
    }
}
