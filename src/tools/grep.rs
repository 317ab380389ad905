use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::{debug, warn};

pub const MAX_MATCHES: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct GrepMatch {
    /// Path relative to the searched root, `/`-separated.
    pub file: String,
    pub line_number: usize,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct GrepQuery {
    pub query: String,
    pub case_sensitive: bool,
    /// Comma-separated file-name globs, e.g. `*.py,*.pyi`.
    pub include_pattern: Option<String>,
    pub exclude_pattern: Option<String>,
}

/// Regex search over the files under `root`, honoring `.gitignore`.
///
/// Returns `(matches, success)`. An invalid regex is an unsuccessful search, not an error.
pub async fn grep_search(query: &GrepQuery, root: PathBuf) -> (Vec<GrepMatch>, bool) {
    let query = query.clone();
    match tokio::task::spawn_blocking(move || search(&query, &root)).await {
        Ok(result) => result,
        Err(e) => {
            warn!("grep task failed: {}", e);
            (Vec::new(), false)
        }
    }
}

fn search(query: &GrepQuery, root: &Path) -> (Vec<GrepMatch>, bool) {
    let regex = match regex::RegexBuilder::new(&query.query)
        .case_insensitive(!query.case_sensitive)
        .build()
    {
        Ok(r) => r,
        Err(e) => {
            warn!("Invalid regex pattern: {}", e);
            return (Vec::new(), false);
        }
    };
    if !root.is_dir() {
        warn!(root = %root.display(), "grep root is not a directory");
        return (Vec::new(), false);
    }

    let include = query.include_pattern.as_deref().map(compile_globs);
    let exclude = query.exclude_pattern.as_deref().map(compile_globs);

    let mut builder = WalkBuilder::new(root);
    builder.hidden(false);
    builder.follow_links(false);
    builder.require_git(false);
    builder.sort_by_file_name(|a, b| a.cmp(b));
    builder.filter_entry(|entry| entry.file_name() != ".git");

    let mut matches = Vec::new();
    for entry in builder.build() {
        let Ok(entry) = entry else {
            continue;
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if let Some(include) = &include {
            if !include.iter().any(|p| p.matches(&name)) {
                continue;
            }
        }
        if let Some(exclude) = &exclude {
            if exclude.iter().any(|p| p.matches(&name)) {
                continue;
            }
        }

        let Ok(bytes) = std::fs::read(entry.path()) else {
            continue;
        };
        let text = String::from_utf8_lossy(&bytes);
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        for (idx, line) in text.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(GrepMatch {
                    file: rel.clone(),
                    line_number: idx + 1,
                    content: line.trim_end().to_string(),
                });
                if matches.len() >= MAX_MATCHES {
                    debug!(count = matches.len(), "grep match cap reached");
                    return (matches, true);
                }
            }
        }
    }

    debug!(count = matches.len(), query = %query.query, "grep complete");
    (matches, true)
}

/// Invalid patterns are skipped.
fn compile_globs(patterns: &str) -> Vec<glob::Pattern> {
    patterns
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect()
}
