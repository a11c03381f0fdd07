//! End-to-end detection through the public library API.

use async_trait::async_trait;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use source_context::config::Config;
use source_context::detect::ContextDetector;
use source_context::llm::{ChatMessage, ChatModel, LlmError, ToolCall, UsageMetadata};
use source_context::models::{Confidence, SourceContext};
use source_context::tools::ToolDefinition;

fn project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("src/storage")).unwrap();
    fs::create_dir_all(root.join("src/widget")).unwrap();
    fs::create_dir_all(root.join("node_modules/dep")).unwrap();
    fs::write(
        root.join("src/storage/FileStorageAdapter.ts"),
        "export class FileStorageAdapter {}",
    )
    .unwrap();
    fs::write(
        root.join("src/storage/FeedbackStorageAdapter.ts"),
        "export class FeedbackStorageAdapter {}",
    )
    .unwrap();
    fs::write(root.join("src/widget/FeedbackWidget.tsx"), "export {}").unwrap();
    fs::write(root.join("node_modules/dep/storage.js"), "").unwrap();
    tmp
}

const STORAGE_DOC: &str = r#"---
title: Storage Adapters
---
# Storage Adapters

Feedback is persisted through `FileStorageAdapter` or `FeedbackStorageAdapter`.

## Writing a custom adapter
"#;

/// Replays scripted turns and keeps every conversation it was sent.
struct ScriptedModel {
    replies: Mutex<Vec<ChatMessage>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    fn new(mut replies: Vec<ChatMessage>) -> Arc<Self> {
        replies.reverse();
        Arc::new(Self {
            replies: Mutex::new(replies),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted-gpt"
    }

    async fn invoke(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<ChatMessage, LlmError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop()
            .ok_or(LlmError::EmptyChoices)
    }
}

fn tool_turn(id: &str, name: &str, args: serde_json::Value) -> ChatMessage {
    ChatMessage::Ai {
        content: String::new(),
        tool_calls: vec![ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args,
        }],
        usage: Some(UsageMetadata {
            input_tokens: 100,
            output_tokens: 10,
            total_tokens: 110,
        }),
    }
}

#[tokio::test]
async fn storage_adapters_rule_and_keyword_detection() {
    let tmp = project();
    let detector = ContextDetector::from_config(&Config::minimal()).unwrap();

    let result = detector
        .detect_source_context("docs/guides/storage-adapters.md", STORAGE_DOC, tmp.path(), None)
        .await
        .unwrap();

    assert!(result
        .source_context
        .files
        .iter()
        .any(|f| f.starts_with("src/storage/")));
    assert!(matches!(result.confidence, Confidence::High | Confidence::Medium));
    assert!(!result.reasoning.is_empty());
    assert!(result
        .source_context
        .files
        .iter()
        .all(|f| !f.starts_with("node_modules")));
}

#[tokio::test]
async fn repeated_detection_is_stable() {
    let tmp = project();
    let detector = ContextDetector::from_config(&Config::minimal()).unwrap();
    let a = detector
        .detect_source_context("docs/storage-adapters.md", STORAGE_DOC, tmp.path(), None)
        .await
        .unwrap();
    let b = detector
        .detect_source_context("docs/storage-adapters.md", STORAGE_DOC, tmp.path(), None)
        .await
        .unwrap();
    assert_eq!(a.source_context.files, b.source_context.files);
    assert_eq!(a.reasoning, b.reasoning);
    assert_eq!(a.suggestions, b.suggestions);
}

#[tokio::test]
async fn custom_rule_is_applied_after_defaults() {
    let tmp = project();
    let config: Config = toml::from_str(
        r#"
[[rules]]
name = "feedback-widget"
doc_glob = "**/widget*.md"
source_patterns = ["src/widget/**/*.tsx"]
confidence = 0.9
"#,
    )
    .unwrap();
    let detector = ContextDetector::from_config(&config).unwrap();
    let result = detector
        .detect_source_context("docs/widget.md", "# Widget", tmp.path(), None)
        .await
        .unwrap();
    assert!(result
        .source_context
        .files
        .contains(&"src/widget/FeedbackWidget.tsx".to_string()));
    assert!(result
        .reasoning
        .iter()
        .any(|r| r.contains("Rule 'feedback-widget'")));
}

#[tokio::test]
async fn agent_browses_project_and_wins() {
    let tmp = project();
    let model = ScriptedModel::new(vec![
        tool_turn("c1", "list_folders", json!({ "max_depth": 2 })),
        tool_turn("c2", "find_files", json!({ "pattern": "*StorageAdapter*" })),
        ChatMessage::ai(
            "```json\n{\"files\":[\"src/storage/FileStorageAdapter.ts\",\"src/storage/FeedbackStorageAdapter.ts\"],\"folders\":[\"src/storage/\"],\"confidence\":\"high\",\"reasoning\":[\"Both adapters are named in the page\"]}\n```",
        ),
    ]);
    let detector = ContextDetector::with_model(&Config::minimal(), model.clone()).unwrap();

    let existing = SourceContext::detected(vec!["src/old.ts".into()], vec![], Confidence::Medium);
    let result = detector
        .detect_source_context("docs/storage-adapters.md", STORAGE_DOC, tmp.path(), Some(&existing))
        .await
        .unwrap();

    assert_eq!(result.confidence, Confidence::High);
    assert_eq!(result.reasoning[0], "LLM-powered detection (scripted-gpt)");
    assert!(result
        .reasoning
        .iter()
        .any(|r| r == "Agent made 2 tool calls using 220 tokens"));
    assert_eq!(result.source_context.folders, vec!["src/storage/"]);

    let seen = model.seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    let prompt = seen[0][1].content();
    assert!(prompt.contains("Title: Storage Adapters"));
    assert!(prompt.contains("src/old.ts"));

    // The find_files result fed back on the last turn lists both adapters.
    let ChatMessage::Tool { content, .. } = seen[2].last().unwrap() else {
        panic!("expected a tool message");
    };
    assert!(content.contains("FileStorageAdapter.ts"));
    assert!(content.contains("FeedbackStorageAdapter.ts"));
}

#[tokio::test]
async fn agent_garbage_falls_back_to_rules() {
    let tmp = project();
    let model = ScriptedModel::new(vec![ChatMessage::ai("Sorry, I cannot help with that.")]);
    let detector = ContextDetector::with_model(&Config::minimal(), model).unwrap();
    let result = detector
        .detect_source_context("docs/storage-adapters.md", STORAGE_DOC, tmp.path(), None)
        .await
        .unwrap();
    assert_eq!(result.reasoning[0], "Rule-based detection");
    assert_eq!(
        result.reasoning[1],
        "LLM-powered detection (scripted-gpt) returned low confidence; falling back to rules"
    );
    assert!(result
        .reasoning
        .iter()
        .any(|r| r.starts_with("Failed to parse agent response")));
    assert_ne!(result.confidence, Confidence::Low);
}

#[tokio::test]
async fn read_file_cannot_escape_snapshot() {
    let tmp = project();
    let model = ScriptedModel::new(vec![
        tool_turn("c1", "read_file", json!({ "path": "../../etc/passwd" })),
        tool_turn("c2", "read_file", json!({ "path": "node_modules/dep/storage.js" })),
        ChatMessage::ai(r#"{"files":[],"folders":[],"confidence":"low","reasoning":[]}"#),
    ]);
    let mut config = Config::minimal();
    config.detection.fallback_to_rules = false;
    let detector = ContextDetector::with_model(&config, model.clone()).unwrap();
    detector
        .detect_source_context("docs/x.md", "# X", tmp.path(), None)
        .await
        .unwrap();

    let seen = model.seen.lock().unwrap();
    for (turn, call) in [(1usize, "c1"), (2usize, "c2")] {
        let ChatMessage::Tool {
            tool_call_id,
            content,
            ..
        } = seen[turn].last().unwrap()
        else {
            panic!("expected a tool message");
        };
        assert_eq!(tool_call_id, call);
        assert!(content.contains("\"ok\":false"));
        assert!(content.contains("not found in project"));
    }
}

#[tokio::test]
async fn missing_project_root_is_the_only_error() {
    let detector = ContextDetector::from_config(&Config::minimal()).unwrap();
    let missing = Path::new("/this/project/does/not/exist");
    assert!(detector
        .detect_source_context("docs/a.md", "# A", missing, None)
        .await
        .is_err());
}
