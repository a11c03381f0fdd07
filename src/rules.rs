//! Rule-based source context matching.
//!
//! A [`RuleMatcher`] holds an ordered list of convention rules. Each rule
//! pairs a documentation path pattern with the source paths that pages of
//! that kind usually describe, plus a static confidence. Matching a page
//! resolves the source patterns of every applicable rule against the
//! project snapshot and averages the confidences of the rules that hit.
//!
//! # Source pattern forms
//!
//! | Pattern | Resolves to |
//! |---------|-------------|
//! | `src/config.ts` | that file, if present |
//! | `src/storage` or `src/storage/` | the folder, if any file lives beneath it |
//! | `src/storage/**/*.ts` | every snapshot file or folder the glob matches |

use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::file_tree::{extract_folders, flatten_file_tree};
use crate::models::{Confidence, FileTreeNode, SourceContext};

/// How a rule recognises the documentation pages it applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum DocPattern {
    Glob(String),
    Regex(String),
}

/// A convention rule: doc pattern → source patterns, with a static confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextRule {
    pub name: String,
    pub doc_pattern: DocPattern,
    pub source_patterns: Vec<String>,
    pub confidence: f64,
}

impl ContextRule {
    fn new(name: &str, doc_regex: &str, sources: &[&str], confidence: f64) -> Self {
        Self {
            name: name.to_string(),
            doc_pattern: DocPattern::Regex(doc_regex.to_string()),
            source_patterns: sources.iter().map(|s| s.to_string()).collect(),
            confidence,
        }
    }

    /// Compile the doc pattern and any glob source patterns.
    pub fn compile(self) -> Result<CompiledRule> {
        let doc = match &self.doc_pattern {
            DocPattern::Glob(glob) => DocMatcher::Glob(
                Glob::new(glob)
                    .with_context(|| format!("rule '{}': invalid doc glob '{}'", self.name, glob))?
                    .compile_matcher(),
            ),
            DocPattern::Regex(re) => DocMatcher::Regex(
                Regex::new(re)
                    .with_context(|| format!("rule '{}': invalid doc regex '{}'", self.name, re))?,
            ),
        };
        let sources = self.source_patterns.iter().map(|p| SourcePattern::parse(p)).collect();
        Ok(CompiledRule {
            rule: self,
            doc,
            sources,
        })
    }
}

/// Built-in conventions for typical JS/TS documentation sites.
pub fn default_rules() -> Vec<ContextRule> {
    vec![
        ContextRule::new(
            "storage-adapters",
            r"(?i)(storage|adapter|persist)",
            &["src/storage/", "src/adapters/", "src/storage/**/*", "src/adapters/**/*"],
            0.8,
        ),
        ContextRule::new(
            "api-reference",
            r"(?i)(^|/)(api|reference)([/_.-]|$)",
            &["src/api/", "src/routes/", "src/server/", "src/index.ts", "src/index.js"],
            0.7,
        ),
        ContextRule::new(
            "components",
            r"(?i)(component|widget|ui)([/_.-]|s?\.|$)",
            &["src/components/", "src/widgets/", "src/ui/"],
            0.7,
        ),
        ContextRule::new(
            "configuration",
            r"(?i)config",
            &["src/config/", "src/config.ts", "src/config.js", "src/options.ts"],
            0.6,
        ),
        ContextRule::new(
            "plugins",
            r"(?i)plugin",
            &["src/plugin/", "src/plugins/", "src/plugin.ts"],
            0.6,
        ),
        ContextRule::new(
            "cli",
            r"(?i)(^|/|[_-])(cli|commands?)([/_.-]|$)",
            &["src/cli/", "src/commands/", "bin/"],
            0.6,
        ),
        ContextRule::new(
            "utilities",
            r"(?i)(util|helper)",
            &["src/utils/", "src/helpers/", "src/lib/"],
            0.5,
        ),
    ]
}

enum DocMatcher {
    Glob(GlobMatcher),
    Regex(Regex),
}

impl DocMatcher {
    fn is_match(&self, doc_path: &str) -> bool {
        match self {
            DocMatcher::Glob(glob) => glob.is_match(doc_path),
            DocMatcher::Regex(re) => re.is_match(doc_path),
        }
    }
}

enum SourcePattern {
    Literal(String),
    Glob(GlobMatcher),
    /// Manual translation used when `globset` rejects a pattern.
    Fallback(Regex),
    Invalid(String),
}

impl SourcePattern {
    fn parse(pattern: &str) -> Self {
        if !is_glob(pattern) {
            return SourcePattern::Literal(pattern.trim_start_matches("./").to_string());
        }
        match Glob::new(pattern) {
            Ok(glob) => SourcePattern::Glob(glob.compile_matcher()),
            Err(err) => {
                tracing::debug!(pattern, error = %err, "glob rejected, using regex fallback");
                match Regex::new(&glob_to_regex(pattern)) {
                    Ok(re) => SourcePattern::Fallback(re),
                    Err(_) => SourcePattern::Invalid(pattern.to_string()),
                }
            }
        }
    }

    /// Resolve against the snapshot. Folder results carry a trailing `/`.
    fn resolve(&self, files: &[String], folders: &[String]) -> Vec<String> {
        match self {
            SourcePattern::Literal(literal) => {
                let bare = literal.trim_end_matches('/');
                if !literal.ends_with('/') && files.iter().any(|f| f == bare) {
                    return vec![bare.to_string()];
                }
                let prefix = format!("{}/", bare);
                if files.iter().any(|f| f.starts_with(&prefix)) {
                    vec![prefix]
                } else {
                    Vec::new()
                }
            }
            SourcePattern::Glob(glob) => resolve_with(|p| glob.is_match(p), files, folders),
            SourcePattern::Fallback(re) => resolve_with(|p| re.is_match(p), files, folders),
            SourcePattern::Invalid(pattern) => {
                tracing::warn!(pattern, "source pattern could not be compiled");
                Vec::new()
            }
        }
    }
}

fn resolve_with(is_match: impl Fn(&str) -> bool, files: &[String], folders: &[String]) -> Vec<String> {
    let mut out: Vec<String> = folders
        .iter()
        .filter(|f| is_match(f))
        .map(|f| format!("{}/", f))
        .collect();
    out.extend(files.iter().filter(|f| is_match(f)).cloned());
    out
}

/// A rule with its patterns compiled.
pub struct CompiledRule {
    rule: ContextRule,
    doc: DocMatcher,
    sources: Vec<SourcePattern>,
}

impl CompiledRule {
    pub fn rule(&self) -> &ContextRule {
        &self.rule
    }
}

/// Outcome of [`RuleMatcher::match_doc`].
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub source_context: SourceContext,
    pub confidence: Confidence,
    /// Mean confidence of the rules that contributed paths (0 if none).
    pub score: f64,
    pub reasoning: Vec<String>,
    /// Snapshot files at or beneath any resolved path.
    pub candidate_files: Vec<String>,
    pub matched_rules: Vec<String>,
}

/// Ordered rule set: defaults first, custom rules appended.
pub struct RuleMatcher {
    rules: Vec<CompiledRule>,
}

impl RuleMatcher {
    /// An empty matcher with no rules.
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// A matcher loaded with [`default_rules`].
    pub fn with_defaults() -> Self {
        let mut matcher = Self::new();
        for rule in default_rules() {
            if let Err(err) = matcher.add_rule(rule) {
                tracing::warn!(error = %err, "skipping built-in rule");
            }
        }
        matcher
    }

    /// Append a rule after all existing ones.
    pub fn add_rule(&mut self, rule: ContextRule) -> Result<()> {
        self.rules.push(rule.compile()?);
        Ok(())
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Match a documentation page against every rule.
    ///
    /// An absolute `doc_path` under `project_root` is matched relative to it,
    /// comparing canonical forms, so ancestor directory names never match.
    pub fn match_doc(&self, doc_path: &str, project_root: &Path, tree: &FileTreeNode) -> RuleMatch {
        let files = flatten_file_tree(tree);
        let folders = extract_folders(tree);
        let doc_path = normalize_doc_path(doc_path, project_root);

        let mut matched_files = BTreeSet::new();
        let mut matched_folders = BTreeSet::new();
        let mut reasoning = Vec::new();
        let mut matched_rules = Vec::new();
        let mut total = 0.0;

        for compiled in &self.rules {
            if !compiled.doc.is_match(&doc_path) {
                continue;
            }
            // Paths this rule already reported; other rules may report them again.
            let mut accepted = BTreeSet::new();
            for source in &compiled.sources {
                for path in source.resolve(&files, &folders) {
                    if !accepted.insert(path.clone()) {
                        continue;
                    }
                    reasoning.push(format!(
                        "Rule '{}' matched {} (confidence {:.2})",
                        compiled.rule.name, path, compiled.rule.confidence
                    ));
                    if path.ends_with('/') {
                        matched_folders.insert(path);
                    } else {
                        matched_files.insert(path);
                    }
                }
            }
            if !accepted.is_empty() {
                total += compiled.rule.confidence;
                matched_rules.push(compiled.rule.name.clone());
            }
        }

        let score = if matched_rules.is_empty() {
            0.0
        } else {
            total / matched_rules.len() as f64
        };
        let confidence = Confidence::from_score(score);

        let candidate_files = files
            .iter()
            .filter(|f| {
                matched_files.contains(*f) || matched_folders.iter().any(|dir| f.starts_with(dir))
            })
            .cloned()
            .collect();

        RuleMatch {
            source_context: SourceContext::detected(
                matched_files.into_iter().collect(),
                matched_folders.into_iter().collect(),
                confidence,
            ),
            confidence,
            score,
            reasoning,
            candidate_files,
            matched_rules,
        }
    }
}

impl Default for RuleMatcher {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn normalize_doc_path(doc_path: &str, project_root: &Path) -> String {
    let path = Path::new(doc_path);
    let relative = match path.strip_prefix(project_root) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) if path.is_absolute() => relative_to_root(path, project_root),
        Err(_) => path.to_path_buf(),
    };
    relative
        .to_string_lossy()
        .replace('\\', "/")
        .trim_start_matches("./")
        .to_string()
}

/// Strip the canonical `root` from the canonical form of an absolute `path`.
/// Falls back to `path` unchanged when it lies outside `root`.
fn relative_to_root(path: &Path, root: &Path) -> PathBuf {
    let (Ok(root), Some(resolved)) = (root.canonicalize(), canonicalize_existing_prefix(path)) else {
        return path.to_path_buf();
    };
    match resolved.strip_prefix(&root) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => path.to_path_buf(),
    }
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the
/// rest. Pages sent with inline content need not exist on disk.
fn canonicalize_existing_prefix(path: &Path) -> Option<PathBuf> {
    path.ancestors().find_map(|ancestor| {
        let canonical = ancestor.canonicalize().ok()?;
        let tail = path.strip_prefix(ancestor).ok()?;
        if tail.as_os_str().is_empty() {
            Some(canonical)
        } else {
            Some(canonical.join(tail))
        }
    })
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Translate a glob into an anchored regex: `**` spans directories, `*` and
/// `?` stay within one segment, everything else is literal.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(paths: &[&str]) -> FileTreeNode {
        let mut root = FileTreeNode::directory("root", "");
        for path in paths {
            insert(&mut root, path);
        }
        root
    }

    fn insert(root: &mut FileTreeNode, path: &str) {
        let parts: Vec<&str> = path.split('/').collect();
        let mut node = root;
        for (i, part) in parts.iter().enumerate() {
            let rel = parts[..=i].join("/");
            let is_file = i == parts.len() - 1;
            let pos = node.children().iter().position(|c| c.name == *part);
            let idx = match pos {
                Some(idx) => idx,
                None => {
                    let child = if is_file {
                        FileTreeNode::file(*part, rel)
                    } else {
                        FileTreeNode::directory(*part, rel)
                    };
                    node.push_child(child);
                    node.children().len() - 1
                }
            };
            node = &mut node.children.as_mut().unwrap()[idx];
        }
    }

    #[test]
    fn storage_rule_finds_adapter_file() {
        let matcher = RuleMatcher::with_defaults();
        let t = tree(&["src/storage/adapter.ts", "src/index.ts"]);
        let result = matcher.match_doc("docs/storage/adapter.md", Path::new("."), &t);
        assert!(result
            .source_context
            .files
            .contains(&"src/storage/adapter.ts".to_string()));
        assert!(result.source_context.folders.contains(&"src/storage/".to_string()));
        assert!(matches!(result.confidence, Confidence::High | Confidence::Medium));
        assert!(!result.source_context.manual);
    }

    #[test]
    fn absolute_doc_path_is_made_relative_to_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("storage-config");
        std::fs::create_dir_all(root.join("docs")).unwrap();
        std::fs::write(root.join("docs/intro.md"), "# Intro").unwrap();

        let doc = root.join("docs/intro.md");
        assert_eq!(normalize_doc_path(&doc.to_string_lossy(), &root), "docs/intro.md");

        // Inline content: the page does not exist on disk.
        let inline = root.join("docs/new-page.md");
        let relative_root = root.join("docs/..");
        assert_eq!(
            normalize_doc_path(&inline.to_string_lossy(), &relative_root),
            "docs/new-page.md"
        );

        let cwd_doc = std::env::current_dir().unwrap().join("docs/intro.md");
        assert_eq!(normalize_doc_path(&cwd_doc.to_string_lossy(), Path::new(".")), "docs/intro.md");

        let matcher = RuleMatcher::with_defaults();
        let t = tree(&["src/storage/adapter.ts", "src/config.ts"]);
        let result = matcher.match_doc(&doc.to_string_lossy(), &relative_root, &t);
        assert!(result.matched_rules.is_empty());
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[test]
    fn no_rule_means_zero_score() {
        let matcher = RuleMatcher::with_defaults();
        let t = tree(&["src/index.ts"]);
        let result = matcher.match_doc("docs/changelog.md", Path::new("."), &t);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.confidence, Confidence::Low);
        assert!(result.source_context.files.is_empty());
        assert!(result.reasoning.is_empty());
    }

    #[test]
    fn literal_patterns_need_exact_file_or_prefix() {
        let mut matcher = RuleMatcher::new();
        matcher
            .add_rule(ContextRule {
                name: "lit".into(),
                doc_pattern: DocPattern::Glob("**/*.md".into()),
                source_patterns: vec!["src/conf".into(), "src/config.ts".into(), "src/api".into()],
                confidence: 0.5,
            })
            .unwrap();
        let t = tree(&["src/config.ts", "src/api/routes.ts", "src/apiary.ts"]);
        let result = matcher.match_doc("docs/a.md", Path::new("."), &t);
        assert_eq!(result.source_context.files, vec!["src/config.ts"]);
        assert_eq!(result.source_context.folders, vec!["src/api/"]);
    }

    #[test]
    fn confidence_is_mean_of_contributing_rules() {
        let mut matcher = RuleMatcher::new();
        for (name, conf, src) in [("a", 0.9, "src/a.ts"), ("b", 0.3, "src/b.ts"), ("c", 0.1, "src/none.ts")] {
            matcher
                .add_rule(ContextRule {
                    name: name.into(),
                    doc_pattern: DocPattern::Regex("guide".into()),
                    source_patterns: vec![src.into()],
                    confidence: conf,
                })
                .unwrap();
        }
        let t = tree(&["src/a.ts", "src/b.ts"]);
        let result = matcher.match_doc("docs/guide.md", Path::new("."), &t);
        assert!((result.score - 0.6).abs() < 1e-9);
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(result.matched_rules, vec!["a", "b"]);
    }

    #[test]
    fn duplicates_across_rules_collapse() {
        let mut matcher = RuleMatcher::new();
        for name in ["one", "two"] {
            matcher
                .add_rule(ContextRule {
                    name: name.into(),
                    doc_pattern: DocPattern::Glob("docs/**".into()),
                    source_patterns: vec!["src/**/*.ts".into()],
                    confidence: 0.8,
                })
                .unwrap();
        }
        let t = tree(&["src/a.ts"]);
        let result = matcher.match_doc("docs/x.md", Path::new("."), &t);
        assert_eq!(result.source_context.files, vec!["src/a.ts"]);
        assert_eq!(
            result.reasoning,
            vec![
                "Rule 'one' matched src/a.ts (confidence 0.80)",
                "Rule 'two' matched src/a.ts (confidence 0.80)",
            ]
        );
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn every_contributing_rule_is_explained() {
        let mut matcher = RuleMatcher::new();
        for (name, conf) in [("first", 0.9), ("second", 0.1)] {
            matcher
                .add_rule(ContextRule {
                    name: name.into(),
                    doc_pattern: DocPattern::Regex("storage".into()),
                    source_patterns: vec!["src/storage/".into(), "src/storage/".into()],
                    confidence: conf,
                })
                .unwrap();
        }
        let t = tree(&["src/storage/a.ts"]);
        let result = matcher.match_doc("docs/storage.md", Path::new("."), &t);
        assert_eq!(result.matched_rules, vec!["first", "second"]);
        assert!((result.score - 0.5).abs() < 1e-9);
        assert_eq!(result.source_context.folders, vec!["src/storage/"]);
        assert_eq!(
            result.reasoning,
            vec![
                "Rule 'first' matched src/storage/ (confidence 0.90)",
                "Rule 'second' matched src/storage/ (confidence 0.10)",
            ]
        );
    }

    #[test]
    fn custom_rules_are_appended_after_defaults() {
        let mut matcher = RuleMatcher::with_defaults();
        let defaults = matcher.rules().len();
        matcher
            .add_rule(ContextRule {
                name: "custom".into(),
                doc_pattern: DocPattern::Glob("**".into()),
                source_patterns: vec![],
                confidence: 1.0,
            })
            .unwrap();
        assert_eq!(matcher.rules().len(), defaults + 1);
        assert_eq!(matcher.rules().last().unwrap().rule().name, "custom");
        assert_eq!(matcher.rules()[0].rule().name, "storage-adapters");
    }

    #[test]
    fn candidates_include_files_beneath_folders() {
        let matcher = RuleMatcher::with_defaults();
        let t = tree(&["src/storage/a.ts", "src/storage/deep/b.ts", "src/other.ts"]);
        let result = matcher.match_doc("docs/storage.md", Path::new("."), &t);
        assert_eq!(
            result.candidate_files,
            vec!["src/storage/a.ts", "src/storage/deep/b.ts"]
        );
    }

    #[test]
    fn invalid_doc_pattern_is_rejected() {
        let mut matcher = RuleMatcher::new();
        let err = matcher.add_rule(ContextRule {
            name: "bad".into(),
            doc_pattern: DocPattern::Regex("(".into()),
            source_patterns: vec![],
            confidence: 0.5,
        });
        assert!(err.is_err());
    }

    #[test]
    fn glob_fallback_translation() {
        let re = Regex::new(&glob_to_regex("src/**/*.ts")).unwrap();
        assert!(re.is_match("src/a.ts"));
        assert!(re.is_match("src/x/y/a.ts"));
        assert!(!re.is_match("lib/a.ts"));
        let re = Regex::new(&glob_to_regex("src/?.js")).unwrap();
        assert!(re.is_match("src/a.js"));
        assert!(!re.is_match("src/ab.js"));
    }

    #[test]
    fn absolute_doc_paths_are_made_relative() {
        assert_eq!(
            normalize_doc_path("/repo/docs/storage.md", Path::new("/repo")),
            "docs/storage.md"
        );
        assert_eq!(normalize_doc_path("./docs/a.md", Path::new(".")), "docs/a.md");
    }
}
