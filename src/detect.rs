//! Detection orchestrator.
//!
//! [`ContextDetector`] is the long-lived service behind every detection. It
//! owns the rule matcher, the response cache and (when a provider is
//! available) the agentic detector, and combines them per page:
//!
//! 1. Snapshot the project tree.
//! 2. If an agent is configured, ask it (through the cache). Keep its answer
//!    unless it is `low` confidence and rule fallback is enabled.
//! 3. Otherwise run the rule matcher, then keyword-match the page against the
//!    rule candidates to add the strongest keyword hits.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{AgentPromptConfig, AgentRequest, AgentResponse, AgenticDetector};
use crate::cache::{CacheStats, ResponseCache};
use crate::config::{Config, DetectionConfig};
use crate::document::{parse_document, read_document, ParsedDocument};
use crate::file_tree::{build_file_tree, extract_folders, flatten_file_tree};
use crate::keywords::{extract_keywords, match_keywords_to_files};
use crate::llm::{create_chat_model, ChatModel};
use crate::models::{Confidence, ContextDetectionResult, FileTreeNode, SourceContext};
use crate::rules::RuleMatcher;
use crate::tools::ToolContext;

/// Keyword hits promoted into `files`.
const KEYWORD_PROMOTE: usize = 5;
/// Keyword hits echoed into the reasoning trail.
const KEYWORD_REASONS: usize = 3;
/// Keyword hits after the promoted ones returned as suggestions.
const KEYWORD_SUGGEST: usize = 5;

pub struct ContextDetector {
    detection: DetectionConfig,
    rules: RuleMatcher,
    agent: Option<AgenticDetector>,
    cache: Arc<ResponseCache>,
    cache_enabled: bool,
}

impl ContextDetector {
    /// Build the detector for `config`. A configured but unavailable LLM
    /// provider is not an error: detection is rule-based only.
    pub fn from_config(config: &Config) -> Result<Self> {
        let model = match &config.llm {
            Some(llm) if llm.is_available() => Some(
                create_chat_model(llm)
                    .context("Failed to initialize chat model")?
                    .context("LLM provider reported available but produced no model")?,
            ),
            Some(llm) => {
                tracing::info!(provider = %llm.provider, "LLM provider unavailable, using rule-based detection");
                None
            }
            None => None,
        };
        Self::build(config, model)
    }

    /// Build the detector around an explicit chat model.
    pub fn with_model(config: &Config, model: Arc<dyn ChatModel>) -> Result<Self> {
        Self::build(config, Some(model))
    }

    fn build(config: &Config, model: Option<Arc<dyn ChatModel>>) -> Result<Self> {
        let mut rules = RuleMatcher::with_defaults();
        for rule in &config.rules {
            rules.add_rule(rule.to_rule()?)?;
        }

        let agent = model.map(|m| AgenticDetector::new(m, AgentPromptConfig::from(&config.agent)));

        Ok(Self {
            detection: config.detection.clone(),
            rules,
            agent,
            cache: Arc::new(ResponseCache::new(Duration::from_secs(config.cache.ttl_secs))),
            cache_enabled: config.cache.enabled,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.detection.project_root
    }

    pub fn docs_root(&self) -> &Path {
        &self.detection.docs_root
    }

    pub fn doc_globs(&self) -> &[String] {
        &self.detection.doc_globs
    }

    /// Name of the chat model, when LLM detection is active.
    pub fn model_name(&self) -> Option<&str> {
        self.agent.as_ref().map(|a| a.model_name())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Snapshot of the configured project root.
    pub fn snapshot(&self) -> Result<FileTreeNode> {
        self.snapshot_of(&self.detection.project_root)
    }

    fn snapshot_of(&self, root: &Path) -> Result<FileTreeNode> {
        build_file_tree(
            root,
            &self.detection.exclude_globs,
            self.detection.ignore_file_root.as_deref(),
        )
    }

    /// Read `doc` from disk and detect its source context against the
    /// configured project root.
    pub async fn detect_document(&self, doc: &Path) -> Result<ContextDetectionResult> {
        let parsed = read_document(doc).await?;
        let doc_path = doc.to_string_lossy();
        self.detect_parsed(&doc_path, &parsed, &self.detection.project_root, None)
            .await
    }

    /// Detect the source context of one page.
    ///
    /// `doc_content` is the raw page text, front matter included. `existing`
    /// overrides any `sourceContext` found in that front matter. The only
    /// error is an unreadable `project_root`.
    pub async fn detect_source_context(
        &self,
        doc_path: &str,
        doc_content: &str,
        project_root: &Path,
        existing: Option<&SourceContext>,
    ) -> Result<ContextDetectionResult> {
        let parsed = parse_document(Path::new(doc_path), doc_content);
        self.detect_parsed(doc_path, &parsed, project_root, existing)
            .await
    }

    async fn detect_parsed(
        &self,
        doc_path: &str,
        parsed: &ParsedDocument,
        project_root: &Path,
        existing: Option<&SourceContext>,
    ) -> Result<ContextDetectionResult> {
        let tree = Arc::new(self.snapshot_of(project_root)?);
        let mut discarded = Vec::new();

        if let Some(agent) = &self.agent {
            let request = AgentRequest {
                doc_path: doc_path.to_string(),
                doc_title: parsed.title.clone(),
                doc_content: parsed.content.clone(),
                available_files: flatten_file_tree(&tree),
                available_folders: extract_folders(&tree),
                existing_mapping: existing.cloned().or_else(|| parsed.existing_mapping()),
            };
            let response = self.run_agent(agent, &request, project_root, &tree).await;

            if response.confidence != Confidence::Low || !self.detection.fallback_to_rules {
                return Ok(llm_result(response));
            }
            tracing::info!(doc = %doc_path, model = %response.model, "discarding low-confidence LLM result, falling back to rules");
            discarded.push(format!(
                "LLM-powered detection ({}) returned low confidence; falling back to rules",
                response.model
            ));
            discarded.extend(response.reasoning);
        }

        let mut result =
            self.detect_with_rules(doc_path, &parsed.title, &parsed.content, project_root, &tree);
        // Keep "Rule-based detection" first, then what the agent said.
        result.reasoning.splice(1..1, discarded);
        Ok(result)
    }

    async fn run_agent(
        &self,
        agent: &AgenticDetector,
        request: &AgentRequest,
        project_root: &Path,
        tree: &Arc<FileTreeNode>,
    ) -> AgentResponse {
        if self.cache_enabled {
            if let Some(hit) = self.cache.get(request) {
                return hit;
            }
            tracing::debug!(doc = %request.doc_path, "cache miss");
        }

        let ctx = ToolContext::new(project_root, Arc::clone(tree));
        let run = agent.detect(request, &ctx).await;
        if self.cache_enabled && run.failure.is_none() {
            self.cache.set(request, &run.response, None);
        }
        run.response
    }

    fn detect_with_rules(
        &self,
        doc_path: &str,
        title: &str,
        content: &str,
        project_root: &Path,
        tree: &FileTreeNode,
    ) -> ContextDetectionResult {
        let rule_match = self.rules.match_doc(doc_path, project_root, tree);

        let keywords = extract_keywords(content, title);
        let candidates = if rule_match.matched_rules.is_empty() {
            flatten_file_tree(tree)
        } else {
            rule_match.candidate_files.clone()
        };
        let keyword_matches = match_keywords_to_files(&keywords, &candidates);

        let mut reasoning = vec!["Rule-based detection".to_string()];
        if rule_match.matched_rules.is_empty() {
            reasoning.push("No convention rule matched this document".to_string());
        }
        reasoning.extend(rule_match.reasoning);

        let mut source_context = rule_match.source_context;
        for m in keyword_matches.iter().take(KEYWORD_PROMOTE) {
            if !source_context.files.contains(&m.file) {
                source_context.files.push(m.file.clone());
            }
        }
        for m in keyword_matches.iter().take(KEYWORD_REASONS) {
            reasoning.push(format!(
                "Keyword match: {} ({:.0}% of keywords: {})",
                m.file,
                m.confidence * 100.0,
                m.matched_keywords.join(", ")
            ));
        }
        let suggestions = keyword_matches
            .iter()
            .skip(KEYWORD_PROMOTE)
            .take(KEYWORD_SUGGEST)
            .map(|m| m.file.clone())
            .collect();

        ContextDetectionResult {
            confidence: rule_match.confidence,
            source_context,
            reasoning,
            suggestions,
        }
    }
}

/// `srcctx detect`: detect one document and print the result to stdout.
pub async fn run_detect(config: &Config, doc: &Path, json: bool) -> Result<()> {
    let detector = ContextDetector::from_config(config)?;
    let result = detector.detect_document(doc).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("Document:   {}", doc.display());
    println!("Confidence: {}", result.confidence);
    print_list("Files", &result.source_context.files);
    print_list("Folders", &result.source_context.folders);
    print_list("Reasoning", &result.reasoning);
    if !result.suggestions.is_empty() {
        print_list("Suggestions", &result.suggestions);
    }
    Ok(())
}

fn print_list(label: &str, items: &[String]) {
    println!("{}:", label);
    if items.is_empty() {
        println!("  (none)");
    }
    for item in items {
        println!("  {}", item);
    }
}

fn llm_result(response: AgentResponse) -> ContextDetectionResult {
    let mut reasoning = vec![format!("LLM-powered detection ({})", response.model)];
    if response.cached {
        reasoning.push("Served from response cache".to_string());
    }
    reasoning.push(format!(
        "Agent made {} tool calls using {} tokens",
        response.tool_calls, response.tokens_used
    ));
    reasoning.extend(response.reasoning);

    ContextDetectionResult {
        source_context: SourceContext::detected(response.files, response.folders, response.confidence),
        confidence: response.confidence,
        reasoning,
        suggestions: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, LlmError};
    use crate::tools::ToolDefinition;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Always answers with the same text and counts invocations.
    struct FixedModel {
        answer: Option<String>,
        calls: AtomicUsize,
    }

    impl FixedModel {
        fn answering(answer: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: Some(answer.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                answer: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChatModel for FixedModel {
        fn model_name(&self) -> &str {
            "fixed-model"
        }

        async fn invoke(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolDefinition],
        ) -> Result<ChatMessage, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.answer {
                Some(answer) => Ok(ChatMessage::ai(answer.clone())),
                None => Err(LlmError::EmptyChoices),
            }
        }
    }

    fn project() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let storage = tmp.path().join("src/storage");
        std::fs::create_dir_all(&storage).unwrap();
        std::fs::write(storage.join("FileStorageAdapter.ts"), "export class FileStorageAdapter {}").unwrap();
        std::fs::write(storage.join("FeedbackStorageAdapter.ts"), "export class FeedbackStorageAdapter {}").unwrap();
        std::fs::create_dir_all(tmp.path().join("src/ui")).unwrap();
        std::fs::write(tmp.path().join("src/ui/Button.tsx"), "").unwrap();
        tmp
    }

    const STORAGE_DOC: &str = "---\ntitle: Storage Adapters\n---\n# Storage Adapters\n\nUse FileStorageAdapter or FeedbackStorageAdapter.\n";

    const HIGH_ANSWER: &str = r#"{"files":["src/storage/FileStorageAdapter.ts"],"folders":[],"confidence":"high","reasoning":["class name"]}"#;
    const LOW_ANSWER: &str = r#"{"files":["src/ui/Button.tsx"],"folders":[],"confidence":"low","reasoning":["unsure"]}"#;

    #[tokio::test]
    async fn rule_based_storage_scenario() {
        let tmp = project();
        let detector = ContextDetector::from_config(&Config::minimal()).unwrap();
        let result = detector
            .detect_source_context("docs/storage-adapters.md", STORAGE_DOC, tmp.path(), None)
            .await
            .unwrap();

        assert!(result
            .source_context
            .files
            .iter()
            .any(|f| f.starts_with("src/storage/")));
        assert_ne!(result.confidence, Confidence::Low);
        assert_eq!(result.reasoning[0], "Rule-based detection");
        assert!(result.reasoning.iter().any(|r| r.starts_with("Keyword match:")));
        assert!(!result.source_context.manual);
    }

    #[tokio::test]
    async fn no_rule_match_stays_low_but_uses_keywords() {
        let tmp = project();
        let detector = ContextDetector::from_config(&Config::minimal()).unwrap();
        let result = detector
            .detect_source_context("docs/intro.md", "# Button basics", tmp.path(), None)
            .await
            .unwrap();
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.source_context.files, vec!["src/ui/Button.tsx"]);
    }

    #[tokio::test]
    async fn confident_llm_result_is_kept() {
        let tmp = project();
        let model = FixedModel::answering(HIGH_ANSWER);
        let detector = ContextDetector::with_model(&Config::minimal(), model).unwrap();
        let result = detector
            .detect_source_context("docs/storage-adapters.md", STORAGE_DOC, tmp.path(), None)
            .await
            .unwrap();
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.reasoning[0], "LLM-powered detection (fixed-model)");
        assert_eq!(result.source_context.files, vec!["src/storage/FileStorageAdapter.ts"]);
    }

    #[tokio::test]
    async fn low_llm_result_falls_back_to_rules() {
        let tmp = project();
        let detector = ContextDetector::with_model(&Config::minimal(), FixedModel::answering(LOW_ANSWER)).unwrap();
        let result = detector
            .detect_source_context("docs/storage-adapters.md", STORAGE_DOC, tmp.path(), None)
            .await
            .unwrap();
        assert_eq!(result.reasoning[0], "Rule-based detection");
        assert_eq!(
            result.reasoning[1],
            "LLM-powered detection (fixed-model) returned low confidence; falling back to rules"
        );
        assert_eq!(result.reasoning[2], "unsure");
        assert!(result.reasoning[3].starts_with("Rule 'storage-adapters' matched"));
        assert!(!result.source_context.files.contains(&"src/ui/Button.tsx".to_string()));
    }

    #[tokio::test]
    async fn low_llm_result_kept_when_fallback_disabled() {
        let tmp = project();
        let mut config = Config::minimal();
        config.detection.fallback_to_rules = false;
        let detector = ContextDetector::with_model(&config, FixedModel::answering(LOW_ANSWER)).unwrap();
        let result = detector
            .detect_source_context("docs/storage-adapters.md", STORAGE_DOC, tmp.path(), None)
            .await
            .unwrap();
        assert_eq!(result.confidence, Confidence::Low);
        assert!(result.reasoning[0].starts_with("LLM-powered detection"));
    }

    #[tokio::test]
    async fn model_failure_never_errors() {
        let tmp = project();
        let detector = ContextDetector::with_model(&Config::minimal(), FixedModel::failing()).unwrap();
        let result = detector
            .detect_source_context("docs/storage-adapters.md", STORAGE_DOC, tmp.path(), None)
            .await
            .unwrap();
        assert_eq!(result.reasoning[0], "Rule-based detection");
        assert!(result.reasoning[1].ends_with("returned low confidence; falling back to rules"));
        assert!(result.reasoning[2].starts_with("Agentic detection failed:"));
        assert!(result
            .source_context
            .files
            .iter()
            .any(|f| f.starts_with("src/storage/")));
    }

    #[tokio::test]
    async fn second_run_is_served_from_cache() {
        let tmp = project();
        let model = FixedModel::answering(HIGH_ANSWER);
        let detector = ContextDetector::with_model(&Config::minimal(), model.clone()).unwrap();
        for _ in 0..2 {
            detector
                .detect_source_context("docs/storage-adapters.md", STORAGE_DOC, tmp.path(), None)
                .await
                .unwrap();
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(detector.cache_stats().entries, 1);

        let third = detector
            .detect_source_context("docs/storage-adapters.md", STORAGE_DOC, tmp.path(), None)
            .await
            .unwrap();
        assert!(third.reasoning.iter().any(|r| r == "Served from response cache"));
    }

    #[tokio::test]
    async fn failed_runs_are_not_cached() {
        let tmp = project();
        let model = FixedModel::failing();
        let detector = ContextDetector::with_model(&Config::minimal(), model.clone()).unwrap();
        for _ in 0..2 {
            detector
                .detect_source_context("docs/storage-adapters.md", STORAGE_DOC, tmp.path(), None)
                .await
                .unwrap();
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        assert_eq!(detector.cache_stats().size, 0);
    }

    #[tokio::test]
    async fn unreadable_root_is_an_error() {
        let detector = ContextDetector::from_config(&Config::minimal()).unwrap();
        let err = detector
            .detect_source_context("docs/a.md", "# A", Path::new("/definitely/not/here"), None)
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn unavailable_provider_is_rule_based() {
        let mut config = Config::minimal();
        config.llm = Some(crate::config::LlmConfig {
            api_key_env: "SRCCTX_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..Default::default()
        });
        let detector = ContextDetector::from_config(&config).unwrap();
        assert!(detector.model_name().is_none());
    }
}
