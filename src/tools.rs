//! Read-only filesystem tools for the detection agent.
//!
//! The agent explores a project only through the tools in a
//! [`ToolRegistry`]. Every tool is scoped to one project snapshot via
//! [`ToolContext`]: listings come from the in-memory tree and `read_file`
//! only opens paths that are part of that tree, so excluded or ignored
//! files stay invisible and nothing outside the project root is reachable.
//!
//! # Built-in tools
//!
//! | Name | Purpose |
//! |------|---------|
//! | `list_source_files` | All snapshot files, optionally filtered by a glob |
//! | `list_folders` | All snapshot folders, optionally capped by depth |
//! | `read_file` | File contents, optionally only the first N lines |
//! | `find_files` | Files whose name (or path) matches a glob |
//! | `list_folder_contents` | Direct children of one folder |
//!
//! Results reach the model wrapped in a [`ToolOutcome`] envelope:
//! `{"ok": true, "data": ...}` or `{"ok": false, "error": "..."}`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use globset::Glob;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::file_tree::{extract_folders, find_node, flatten_file_tree};
use crate::models::FileTreeNode;

/// Names of every built-in tool, in registration order.
pub const BUILTIN_TOOL_NAMES: &[&str] = &[
    "list_source_files",
    "list_folders",
    "read_file",
    "find_files",
    "list_folder_contents",
];

/// Upper bound on characters returned by `read_file`.
const MAX_READ_CHARS: usize = 20_000;
/// Default cap on entries returned by listing tools.
const DEFAULT_LIST_LIMIT: usize = 500;

/// A tool the agent can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores, e.g. `"read_file"`.
    fn name(&self) -> &str;

    /// One-line description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Run with already-validated parameters.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Function declaration handed to the chat model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Typed result envelope for a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Ok(Value),
    Err(String),
}

impl ToolOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ToolOutcome::Ok(_))
    }

    pub fn to_json(&self) -> Value {
        match self {
            ToolOutcome::Ok(data) => json!({ "ok": true, "data": data }),
            ToolOutcome::Err(error) => json!({ "ok": false, "error": error }),
        }
    }
}

/// The project snapshot a tool call runs against.
#[derive(Clone)]
pub struct ToolContext {
    root: PathBuf,
    tree: Arc<FileTreeNode>,
    files: Arc<Vec<String>>,
    folders: Arc<Vec<String>>,
}

impl ToolContext {
    pub fn new(root: impl Into<PathBuf>, tree: Arc<FileTreeNode>) -> Self {
        let files = Arc::new(flatten_file_tree(&tree));
        let folders = Arc::new(extract_folders(&tree));
        Self {
            root: root.into(),
            tree,
            files,
            folders,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tree(&self) -> &FileTreeNode {
        &self.tree
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn folders(&self) -> &[String] {
        &self.folders
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in tools
// ═══════════════════════════════════════════════════════════════════════

pub struct ListSourceFilesTool;

#[async_trait]
impl Tool for ListSourceFilesTool {
    fn name(&self) -> &str {
        "list_source_files"
    }

    fn description(&self) -> &str {
        "List all files in the project, optionally filtered by a glob such as 'src/**/*.ts'"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Glob matched against relative paths" },
                "limit": { "type": "integer", "description": "Max files to return", "default": DEFAULT_LIST_LIMIT }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let limit = params["limit"].as_u64().unwrap_or(DEFAULT_LIST_LIMIT as u64) as usize;
        let matched: Vec<&String> = match params["pattern"].as_str().filter(|p| !p.is_empty()) {
            Some(pattern) => {
                let glob = Glob::new(pattern)?.compile_matcher();
                ctx.files().iter().filter(|f| glob.is_match(f.as_str())).collect()
            }
            None => ctx.files().iter().collect(),
        };
        let total = matched.len();
        let files: Vec<&String> = matched.into_iter().take(limit).collect();
        Ok(json!({ "files": files, "total": total, "truncated": total > limit }))
    }
}

pub struct ListFoldersTool;

#[async_trait]
impl Tool for ListFoldersTool {
    fn name(&self) -> &str {
        "list_folders"
    }

    fn description(&self) -> &str {
        "List project folders, optionally only down to a maximum depth (1 = top level)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "max_depth": { "type": "integer", "description": "Deepest folder level to include" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let max_depth = params["max_depth"].as_u64().map(|d| d as usize);
        let folders: Vec<&String> = ctx
            .folders()
            .iter()
            .filter(|f| max_depth.map_or(true, |max| f.split('/').count() <= max))
            .collect();
        Ok(json!({ "folders": folders }))
    }
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a project file by relative path; set max_lines for a preview"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Relative file path" },
                "max_lines": { "type": "integer", "description": "Only return the first N lines" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let path = params["path"].as_str().unwrap_or("").trim_start_matches("./");
        if path.trim().is_empty() {
            bail!("path must not be empty");
        }
        if !ctx.files().iter().any(|f| f == path) {
            bail!("file not found in project: {}", path);
        }

        let text = tokio::fs::read_to_string(ctx.root().join(path)).await?;
        let total_lines = text.lines().count();
        let mut content = match params["max_lines"].as_u64() {
            Some(n) => text.lines().take(n as usize).collect::<Vec<_>>().join("\n"),
            None => text,
        };
        let mut truncated = params["max_lines"]
            .as_u64()
            .is_some_and(|n| (n as usize) < total_lines);
        if content.chars().count() > MAX_READ_CHARS {
            content = content.chars().take(MAX_READ_CHARS).collect();
            truncated = true;
        }

        Ok(json!({
            "path": path,
            "content": content,
            "total_lines": total_lines,
            "truncated": truncated
        }))
    }
}

pub struct FindFilesTool;

#[async_trait]
impl Tool for FindFilesTool {
    fn name(&self) -> &str {
        "find_files"
    }

    fn description(&self) -> &str {
        "Find files by name glob, e.g. '*Adapter*.ts'. Patterns containing '/' match full paths"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "File name glob" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let pattern = params["pattern"].as_str().unwrap_or("");
        if pattern.trim().is_empty() {
            bail!("pattern must not be empty");
        }
        let glob = Glob::new(pattern)?.compile_matcher();
        let by_path = pattern.contains('/');
        let files: Vec<&String> = ctx
            .files()
            .iter()
            .filter(|f| {
                let candidate = if by_path {
                    f.as_str()
                } else {
                    f.rsplit('/').next().unwrap_or(f.as_str())
                };
                glob.is_match(candidate)
            })
            .take(DEFAULT_LIST_LIMIT)
            .collect();
        Ok(json!({ "pattern": pattern, "files": files }))
    }
}

pub struct ListFolderContentsTool;

#[async_trait]
impl Tool for ListFolderContentsTool {
    fn name(&self) -> &str {
        "list_folder_contents"
    }

    fn description(&self) -> &str {
        "List the direct children (files and folders) of one folder; use '' for the root"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Relative folder path" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let path = params["path"].as_str().unwrap_or("");
        let node = find_node(ctx.tree(), path)
            .filter(|n| n.is_dir())
            .ok_or_else(|| anyhow::anyhow!("folder not found in project: {}", path))?;

        let (folders, files): (Vec<&FileTreeNode>, Vec<&FileTreeNode>) =
            node.children().iter().partition(|c| c.is_dir());
        Ok(json!({
            "path": node.path,
            "folders": folders.iter().map(|n| &n.path).collect::<Vec<_>>(),
            "files": files.iter().map(|n| &n.path).collect::<Vec<_>>(),
        }))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Ordered set of tools exposed to the agent.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// A registry holding all five built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ListSourceFilesTool));
        registry.register(Box::new(ListFoldersTool));
        registry.register(Box::new(ReadFileTool));
        registry.register(Box::new(FindFilesTool));
        registry.register(Box::new(ListFolderContentsTool));
        registry
    }

    /// Built-in tools restricted to `allowed`. Unlisted tools are dropped.
    pub fn allowed(allowed: &[String]) -> Self {
        let mut registry = Self::with_builtins();
        registry.retain(allowed);
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    /// Drop every tool whose name is not in `allowed`.
    pub fn retain(&mut self, allowed: &[String]) {
        self.tools.retain(|t| allowed.iter().any(|a| a == t.name()));
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Validate and run a call by name. Never errors: unknown tools,
    /// invalid arguments, and execution failures become [`ToolOutcome::Err`].
    pub async fn call(&self, name: &str, params: &Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(tool) = self.find(name) else {
            return ToolOutcome::Err(format!("unknown tool: {}", name));
        };
        let params = match validate_params(&tool.parameters_schema(), params) {
            Ok(params) => params,
            Err(err) => return ToolOutcome::Err(err.to_string()),
        };
        match tool.execute(params, ctx).await {
            Ok(data) => ToolOutcome::Ok(data),
            Err(err) => ToolOutcome::Err(err.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check `params` against a tool schema: required keys present and declared
/// primitive types respected. Missing optional keys with a `default` are
/// filled in.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => bail!("parameters must be an object, got {}", json_type_name(other)),
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for req_field in &required {
        if !params_obj.contains_key(*req_field) {
            bail!("missing required parameter: {}", req_field);
        }
    }

    let mut result = params_obj.clone();
    for (prop_name, prop_schema) in &properties {
        match params_obj.get(prop_name) {
            Some(value) => {
                if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
                    let type_ok = match expected_type {
                        "string" => value.is_string(),
                        "integer" => value.is_i64() || value.is_u64(),
                        "number" => value.is_number(),
                        "boolean" => value.is_boolean(),
                        "array" => value.is_array(),
                        "object" => value.is_object(),
                        _ => true,
                    };
                    if !type_ok {
                        bail!(
                            "parameter '{}' must be of type '{}', got {}",
                            prop_name,
                            expected_type,
                            json_type_name(value)
                        );
                    }
                }
            }
            None => {
                if let Some(default) = prop_schema.get("default") {
                    result.insert(prop_name.clone(), default.clone());
                }
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
