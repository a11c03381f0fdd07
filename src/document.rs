//! Documentation page reader.
//!
//! Splits an optional leading `---` YAML front-matter block from the body,
//! derives a title, and recovers any `sourceContext` mapping already stored
//! in the front matter.

use anyhow::{Context, Result};
use serde_yaml::Value as YamlValue;
use std::path::Path;

use crate::models::SourceContext;

/// A parsed documentation page.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub title: String,
    /// Body with front matter removed.
    pub content: String,
    pub frontmatter: Option<YamlValue>,
}

impl ParsedDocument {
    /// Existing `sourceContext` mapping from the front matter, if it parses.
    pub fn existing_mapping(&self) -> Option<SourceContext> {
        let value = self.frontmatter.as_ref()?.get("sourceContext")?.clone();
        match serde_yaml::from_value::<SourceContext>(value) {
            Ok(mapping) => Some(mapping),
            Err(err) => {
                tracing::debug!(error = %err, "ignoring malformed sourceContext front matter");
                None
            }
        }
    }
}

/// Read and parse a documentation file.
pub async fn read_document(path: &Path) -> Result<ParsedDocument> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read document: {}", path.display()))?;
    Ok(parse_document(path, &raw))
}

/// Parse raw page text. `path` is only used for the file-stem title fallback.
pub fn parse_document(path: &Path, raw: &str) -> ParsedDocument {
    let (frontmatter, body) = split_front_matter(raw);

    let frontmatter = frontmatter.and_then(|yaml| match serde_yaml::from_str::<YamlValue>(yaml) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "front matter is not valid YAML");
            None
        }
    });

    let title = frontmatter
        .as_ref()
        .and_then(|fm| fm.get("title"))
        .and_then(|t| t.as_str())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| first_heading(body))
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default()
        });

    ParsedDocument {
        title,
        content: body.to_string(),
        frontmatter,
    }
}

fn split_front_matter(raw: &str) -> (Option<&str>, &str) {
    let text = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let Some(rest) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    else {
        return (None, text);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(yaml), body);
        }
        offset += line.len();
    }
    (None, text)
}

fn first_heading(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_front_matter_and_uses_its_title() {
        let raw = "---\ntitle: Storage Adapters\n---\n# Heading\n\nBody text";
        let doc = parse_document(Path::new("docs/storage.md"), raw);
        assert_eq!(doc.title, "Storage Adapters");
        assert_eq!(doc.content, "# Heading\n\nBody text");
    }

    #[test]
    fn falls_back_to_heading_then_stem() {
        let doc = parse_document(Path::new("docs/guide.md"), "intro\n# Getting Started\n");
        assert_eq!(doc.title, "Getting Started");

        let doc = parse_document(Path::new("docs/guide.md"), "no heading here");
        assert_eq!(doc.title, "guide");
        assert!(doc.frontmatter.is_none());
    }

    #[test]
    fn unterminated_front_matter_is_body() {
        let raw = "---\ntitle: x\nstill going";
        let doc = parse_document(Path::new("a.md"), raw);
        assert_eq!(doc.content, raw);
    }

    #[test]
    fn reads_existing_mapping() {
        let raw = "---\ntitle: T\nsourceContext:\n  files:\n    - src/a.ts\n  manual: true\n---\nbody";
        let doc = parse_document(Path::new("a.md"), raw);
        let mapping = doc.existing_mapping().unwrap();
        assert_eq!(mapping.files, vec!["src/a.ts"]);
        assert!(mapping.manual);
    }
}
