//! Core data models used throughout the detection engine.
//!
//! These types describe the project snapshot a detection runs against and
//! the source context mapping it produces for a documentation page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse three-valued quality signal attached to every detection result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    #[default]
    Low,
}

impl Confidence {
    /// Map a numeric score onto a level: `>= 0.7` high, `>= 0.4` medium, else low.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            Confidence::High
        } else if score >= 0.4 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    /// Parse an exact lowercase level name. Anything else is `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "high" => Some(Confidence::High),
            "medium" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a tree node is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

/// One node of an in-memory project snapshot.
///
/// `children` is `Some` exactly when `kind` is [`NodeKind::Directory`].
/// Paths are relative to the scanned root and always use `/` separators;
/// the root node itself has an empty path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTreeNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileTreeNode>>,
}

impl FileTreeNode {
    pub fn file(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind: NodeKind::File,
            children: None,
        }
    }

    pub fn directory(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind: NodeKind::Directory,
            children: Some(Vec::new()),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Children of a directory; empty for files.
    pub fn children(&self) -> &[FileTreeNode] {
        self.children.as_deref().unwrap_or(&[])
    }

    /// Append a child. Ignored on file nodes.
    pub fn push_child(&mut self, child: FileTreeNode) {
        if let Some(children) = self.children.as_mut() {
            children.push(child);
        }
    }
}

/// The mapping from one documentation page to the source it describes.
///
/// `manual = true` marks a user override. Automated detection always emits
/// `manual = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceContext {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub globs: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub last_updated: DateTime<Utc>,
}

impl SourceContext {
    /// A freshly detected (non-manual) mapping stamped with the current time.
    pub fn detected(files: Vec<String>, folders: Vec<String>, confidence: Confidence) -> Self {
        Self {
            files,
            folders,
            globs: Vec::new(),
            exclude: Vec::new(),
            manual: false,
            confidence,
            last_updated: Utc::now(),
        }
    }
}

/// Output of a single-document detection.
///
/// `reasoning` is the ordered audit trail of every strategy contribution;
/// `suggestions` holds next-tier candidates that were not promoted to files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextDetectionResult {
    pub source_context: SourceContext,
    pub confidence: Confidence,
    pub reasoning: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ContextDetectionResult {
    /// An empty low-confidence result explained by `reasoning`.
    pub fn empty(reasoning: Vec<String>) -> Self {
        Self {
            source_context: SourceContext::detected(Vec::new(), Vec::new(), Confidence::Low),
            confidence: Confidence::Low,
            reasoning,
            suggestions: Vec::new(),
        }
    }
}
