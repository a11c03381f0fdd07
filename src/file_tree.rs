//! File tree snapshot builder.
//!
//! Walks a project root once and produces an in-memory [`FileTreeNode`]
//! tree that every detection strategy works from. Entries are pruned by
//! caller exclude globs, by `.gitignore` rules, and by a fixed list of
//! build/dependency directories that are never worth scanning.
//!
//! Children are ordered directories-first, then by name, so that repeated
//! scans of an unchanged tree give identical trees (and therefore identical
//! scores and reasoning downstream).

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::cmp::Ordering;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

use crate::config::Config;
use crate::models::FileTreeNode;

/// Directory names skipped regardless of ignore rules.
pub const ALWAYS_SKIPPED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "coverage",
    ".next",
    ".nuxt",
    ".cache",
    ".turbo",
    ".svelte-kit",
    ".docusaurus",
    "__pycache__",
];

/// Build a snapshot of `root`.
///
/// `exclude_patterns` are globs matched against both the relative path and
/// the bare entry name. Ignore rules come from `<ignore_file_root>/.gitignore`
/// (defaulting to `root`). Unreadable entries below the root are skipped with
/// a warning; an unreadable root is an error.
pub fn build_file_tree(
    root: &Path,
    exclude_patterns: &[String],
    ignore_file_root: Option<&Path>,
) -> Result<FileTreeNode> {
    let metadata = std::fs::metadata(root)
        .with_context(|| format!("Cannot read project root: {}", root.display()))?;

    let root_name = root
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| root.to_string_lossy().to_string());

    if !metadata.is_dir() {
        bail!("Project root is not a directory: {}", root.display());
    }

    let excludes = build_globset(exclude_patterns)?;
    let ignore = load_ignore_rules(ignore_file_root.unwrap_or(root));

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by(dirs_first)
        .into_iter()
        .filter_entry(|entry| !is_skipped(entry, root, &excludes, ignore.as_ref()));

    // Stack of open directories; index 0 is the root, so a directory at
    // walk depth `d` lives at index `d`.
    let mut stack = vec![FileTreeNode::directory(root_name, "")];

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };

        close_directories(&mut stack, entry.depth());

        let name = entry.file_name().to_string_lossy().to_string();
        let rel = relative_path(root, entry.path());
        if entry.file_type().is_dir() {
            stack.push(FileTreeNode::directory(name, rel));
        } else if let Some(parent) = stack.last_mut() {
            parent.push_child(FileTreeNode::file(name, rel));
        }
    }

    close_directories(&mut stack, 1);
    stack
        .pop()
        .ok_or_else(|| anyhow::anyhow!("file tree stack unexpectedly empty"))
}

/// All file paths in the tree, depth-first.
pub fn flatten_file_tree(node: &FileTreeNode) -> Vec<String> {
    let mut out = Vec::new();
    collect(node, &mut out, false);
    out
}

/// All directory paths in the tree (excluding the root), depth-first.
pub fn extract_folders(node: &FileTreeNode) -> Vec<String> {
    let mut out = Vec::new();
    collect(node, &mut out, true);
    out
}

/// Find the node at a relative path. `""` and `"."` name the root.
pub fn find_node<'a>(node: &'a FileTreeNode, path: &str) -> Option<&'a FileTreeNode> {
    let path = path.trim_start_matches("./").trim_matches('/');
    if path.is_empty() || path == "." {
        return Some(node);
    }
    let mut current = node;
    for segment in path.split('/') {
        current = current.children().iter().find(|c| c.name == segment)?;
    }
    Some(current)
}

fn collect(node: &FileTreeNode, out: &mut Vec<String>, folders: bool) {
    for child in node.children() {
        if child.is_dir() {
            if folders {
                out.push(child.path.clone());
            }
            collect(child, out, folders);
        } else if !folders {
            out.push(child.path.clone());
        }
    }
}

/// Pop finished directories until the top of the stack is the parent of an
/// entry at `depth`, attaching each one to its own parent.
fn close_directories(stack: &mut Vec<FileTreeNode>, depth: usize) {
    while stack.len() > depth.max(1) {
        if let Some(done) = stack.pop() {
            if let Some(parent) = stack.last_mut() {
                parent.push_child(done);
            }
        }
    }
}

fn dirs_first(a: &DirEntry, b: &DirEntry) -> Ordering {
    let a_dir = a.file_type().is_dir();
    let b_dir = b.file_type().is_dir();
    b_dir
        .cmp(&a_dir)
        .then_with(|| a.file_name().cmp(b.file_name()))
}

fn is_skipped(entry: &DirEntry, root: &Path, excludes: &GlobSet, ignore: Option<&Gitignore>) -> bool {
    let name = entry.file_name().to_string_lossy();
    let is_dir = entry.file_type().is_dir();

    if is_dir && ALWAYS_SKIPPED_DIRS.contains(&name.as_ref()) {
        return true;
    }

    let rel = relative_path(root, entry.path());
    if excludes.is_match(&rel) || excludes.is_match(name.as_ref()) {
        return true;
    }

    match ignore {
        // Relative to the scanned root, so anchored patterns also apply when
        // the ignore file lives elsewhere.
        Some(gitignore) => gitignore.matched(Path::new(&rel), is_dir).is_ignore(),
        None => false,
    }
}

fn load_ignore_rules(dir: &Path) -> Option<Gitignore> {
    let file = dir.join(".gitignore");
    if !file.is_file() {
        return None;
    }
    let mut builder = GitignoreBuilder::new(dir);
    if let Some(err) = builder.add(&file) {
        tracing::warn!(file = %file.display(), error = %err, "partially invalid ignore file");
    }
    match builder.build() {
        Ok(gitignore) => Some(gitignore),
        Err(err) => {
            tracing::warn!(file = %file.display(), error = %err, "ignoring unreadable ignore file");
            None
        }
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// `srcctx tree`: print the snapshot of the configured project root.
pub fn run_tree(config: &Config, json: bool) -> Result<()> {
    let detection = &config.detection;
    let tree = build_file_tree(
        &detection.project_root,
        &detection.exclude_globs,
        detection.ignore_file_root.as_deref(),
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tree)?);
        return Ok(());
    }

    println!("{}/", tree.name);
    print_children(&tree, 1);
    println!(
        "\n{} files, {} folders",
        flatten_file_tree(&tree).len(),
        extract_folders(&tree).len()
    );
    Ok(())
}

fn print_children(node: &FileTreeNode, depth: usize) {
    for child in node.children() {
        let suffix = if child.is_dir() { "/" } else { "" };
        println!("{}{}{}", "  ".repeat(depth), child.name, suffix);
        print_children(child, depth + 1);
    }
}
