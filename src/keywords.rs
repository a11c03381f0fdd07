//! Keyword extraction and keyword-to-path matching.
//!
//! Keywords come from three places in a page: title words, relative
//! import-like path references, and Markdown heading words. Candidate files
//! are then scored by the fraction of keywords found in their path.

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Words must be longer than this to count as keywords.
const MIN_WORD_LEN: usize = 3;

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:\bfrom\s+|\bimport\s+|\brequire\s*\(\s*|\bimport\s*\(\s*)['"]([^'"\n]+)['"]"#)
        .expect("import regex is valid")
});

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+(.+?)\s*#*\s*$").expect("heading regex is valid"));

static EXTENSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[A-Za-z0-9]{1,5}$").expect("extension regex is valid"));

/// A candidate file scored against a keyword set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordMatch {
    pub file: String,
    /// Matched keyword count divided by total keyword count.
    pub confidence: f64,
    pub matched_keywords: Vec<String>,
}

/// Extract the de-duplicated, lower-cased keyword set of a page, in
/// first-seen order.
pub fn extract_keywords(content: &str, title: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    let mut push = |word: String| {
        if seen.insert(word.clone()) {
            keywords.push(word);
        }
    };

    for word in words(title) {
        push(word);
    }

    for caps in IMPORT_RE.captures_iter(content) {
        if let Some(reference) = caps.get(1).and_then(|m| relative_reference(m.as_str())) {
            push(reference);
        }
    }

    for caps in HEADING_RE.captures_iter(content) {
        if let Some(heading) = caps.get(1) {
            for word in words(&strip_inline_formatting(heading.as_str())) {
                push(word);
            }
        }
    }

    keywords
}

/// Score every file by the fraction of `keywords` found in its base name or
/// relative path (case-insensitive). Zero-match files are dropped. Results
/// are ordered by confidence, highest first; ties keep the order of `files`.
pub fn match_keywords_to_files(keywords: &[String], files: &[String]) -> Vec<KeywordMatch> {
    if keywords.is_empty() {
        return Vec::new();
    }
    let total = keywords.len() as f64;

    let mut matches: Vec<KeywordMatch> = files
        .iter()
        .filter_map(|file| {
            let path = file.to_lowercase();
            let base = path.rsplit('/').next().unwrap_or(&path).to_string();
            let matched: Vec<String> = keywords
                .iter()
                .filter(|k| {
                    let k = k.to_lowercase();
                    base.contains(&k) || path.contains(&k)
                })
                .cloned()
                .collect();
            if matched.is_empty() {
                None
            } else {
                Some(KeywordMatch {
                    file: file.clone(),
                    confidence: matched.len() as f64 / total,
                    matched_keywords: matched,
                })
            }
        })
        .collect();

    // `sort_by` is stable, which keeps tied files in input order.
    matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    matches
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() > MIN_WORD_LEN)
}

/// Normalise a `./` or `../` reference to a lower-cased path fragment
/// without leading dot segments or extension. Package and absolute
/// references yield `None`.
fn relative_reference(reference: &str) -> Option<String> {
    if !reference.starts_with("./") && !reference.starts_with("../") {
        return None;
    }
    let trimmed: Vec<&str> = reference
        .split('/')
        .skip_while(|seg| *seg == "." || *seg == "..")
        .filter(|seg| !seg.is_empty())
        .collect();
    if trimmed.is_empty() {
        return None;
    }
    let joined = trimmed.join("/");
    let without_ext = EXTENSION_RE.replace(&joined, "");
    let out = without_ext.to_lowercase();
    (!out.is_empty()).then_some(out)
}

fn strip_inline_formatting(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '*' | '_' | '`' | '~' | '[' | ']'))
        .collect()
}
