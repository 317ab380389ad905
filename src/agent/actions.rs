//! Single-step tool executors. Each reads its parameters from the open history entry, does
//! the I/O, records a result and returns to the decision node over the default edge.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use super::flow::Node;
use crate::docs::{ApiIndexCell, MAX_RESULTS};
use crate::history::ToolResult;
use crate::python::{validate_file, CodeValidator};
use crate::state::SharedState;
use crate::tools::grep::{grep_search, GrepQuery};
use crate::tools::{fs, tree};

fn record(state: &mut SharedState, result: ToolResult) -> Result<Option<String>> {
    info!(success = result.success(), "action finished");
    state.complete_open(result)?;
    Ok(None)
}

pub struct ReadFileAction;

#[async_trait]
impl Node for ReadFileAction {
    type Prep = PathBuf;
    type Output = ToolResult;

    fn name(&self) -> &'static str {
        "read_file"
    }

    fn prep(&self, state: &SharedState) -> Result<PathBuf> {
        let target = state.open_entry()?.require("target_file")?;
        Ok(state.resolve(target))
    }

    async fn exec(&self, path: PathBuf) -> Result<ToolResult> {
        info!(path = %path.display(), "reading file");
        Ok(match fs::read_file(&path).await {
            Ok(content) => ToolResult::ReadFile {
                success: true,
                content,
            },
            Err(e) => ToolResult::ReadFile {
                success: false,
                content: format!("Error reading file: {:#}", e),
            },
        })
    }

    fn post(&self, state: &mut SharedState, output: ToolResult) -> Result<Option<String>> {
        record(state, output)
    }
}

pub struct GrepSearchAction;

#[async_trait]
impl Node for GrepSearchAction {
    type Prep = (GrepQuery, PathBuf);
    type Output = ToolResult;

    fn name(&self) -> &'static str {
        "grep_search"
    }

    fn prep(&self, state: &SharedState) -> Result<(GrepQuery, PathBuf)> {
        let entry = state.open_entry()?;
        let query = GrepQuery {
            query: entry.require("query")?.to_string(),
            case_sensitive: entry.bool_param("case_sensitive").unwrap_or(false),
            include_pattern: entry.str_param("include_pattern").map(str::to_string),
            exclude_pattern: entry.str_param("exclude_pattern").map(str::to_string),
        };
        Ok((query, state.working_dir.clone()))
    }

    async fn exec(&self, (query, root): (GrepQuery, PathBuf)) -> Result<ToolResult> {
        info!(query = %query.query, root = %root.display(), "searching files");
        let (matches, success) = grep_search(&query, root).await;
        Ok(ToolResult::Grep { success, matches })
    }

    fn post(&self, state: &mut SharedState, output: ToolResult) -> Result<Option<String>> {
        record(state, output)
    }
}

pub struct ListDirAction;

#[async_trait]
impl Node for ListDirAction {
    type Prep = PathBuf;
    type Output = ToolResult;

    fn name(&self) -> &'static str {
        "list_dir"
    }

    fn prep(&self, state: &SharedState) -> Result<PathBuf> {
        let relative = state
            .open_entry()?
            .str_param("relative_workspace_path")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(".");
        Ok(state.resolve(relative))
    }

    async fn exec(&self, path: PathBuf) -> Result<ToolResult> {
        info!(path = %path.display(), "listing directory");
        let (success, tree_visualization) = tree::list_dir(path).await;
        Ok(ToolResult::ListDir {
            success,
            tree_visualization,
        })
    }

    fn post(&self, state: &mut SharedState, output: ToolResult) -> Result<Option<String>> {
        record(state, output)
    }
}

#[derive(Debug)]
pub struct ApiQuery {
    query: String,
    case_sensitive: bool,
    root: PathBuf,
}

/// Exact-name lookup in the API index, falling back to a regex search.
pub struct SearchDocsAction {
    index: &'static ApiIndexCell,
}

impl SearchDocsAction {
    pub fn new(index: &'static ApiIndexCell) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Node for SearchDocsAction {
    type Prep = ApiQuery;
    type Output = ToolResult;

    fn name(&self) -> &'static str {
        "search_api_docstrings"
    }

    fn prep(&self, state: &SharedState) -> Result<ApiQuery> {
        let entry = state.open_entry()?;
        Ok(ApiQuery {
            query: entry.require("query")?.trim().to_string(),
            case_sensitive: entry.bool_param("case_sensitive").unwrap_or(false),
            root: state.working_dir.clone(),
        })
    }

    async fn exec(&self, q: ApiQuery) -> Result<ToolResult> {
        let index = match self.index.get_or_build(&q.root).await {
            Ok(index) => index,
            Err(e) => {
                warn!("API index unavailable: {:#}", e);
                return Ok(ToolResult::ApiSearch {
                    success: false,
                    matches: Vec::new(),
                    message: format!("API index unavailable: {:#}", e),
                });
            }
        };

        if let Some(hit) = index.lookup(&q.query) {
            return Ok(ToolResult::ApiSearch {
                success: true,
                message: format!("Found exact match for '{}'", q.query),
                matches: vec![hit],
            });
        }

        Ok(match index.search(&q.query, q.case_sensitive, MAX_RESULTS) {
            Err(e) => ToolResult::ApiSearch {
                success: false,
                matches: Vec::new(),
                message: format!("Invalid regex pattern: {}", e),
            },
            Ok(matches) if matches.is_empty() => ToolResult::ApiSearch {
                success: false,
                matches,
                message: format!("No API entries matched '{}'", q.query),
            },
            Ok(matches) => ToolResult::ApiSearch {
                success: true,
                message: format!("Found {} API entries matching '{}'", matches.len(), q.query),
                matches,
            },
        })
    }

    fn post(&self, state: &mut SharedState, output: ToolResult) -> Result<Option<String>> {
        record(state, output)
    }
}

/// Writes a new file, then validates it. The file stays on disk even when validation fails.
pub struct CreateFileAction {
    validator: Arc<dyn CodeValidator>,
}

impl CreateFileAction {
    pub fn new(validator: Arc<dyn CodeValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl Node for CreateFileAction {
    type Prep = (PathBuf, String);
    type Output = ToolResult;

    fn name(&self) -> &'static str {
        "create_new_file"
    }

    fn prep(&self, state: &SharedState) -> Result<(PathBuf, String)> {
        let entry = state.open_entry()?;
        let path = state.resolve(entry.require("target_file")?);
        let content = entry.require("content")?.to_string();
        Ok((path, content))
    }

    async fn exec(&self, (path, content): (PathBuf, String)) -> Result<ToolResult> {
        info!(path = %path.display(), bytes = content.len(), "creating file");
        if let Err(e) = fs::write_file(&path, &content).await {
            return Ok(ToolResult::CreateFile {
                success: false,
                error: format!("{:#}", e),
            });
        }
        let validation = validate_file(self.validator.as_ref(), &path).await?;
        Ok(ToolResult::CreateFile {
            success: validation.passed(),
            error: if validation.passed() {
                String::new()
            } else {
                validation.message
            },
        })
    }

    fn post(&self, state: &mut SharedState, output: ToolResult) -> Result<Option<String>> {
        record(state, output)
    }
}
