pub mod summary;

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::docs::types::ApiMatch;
use crate::error::AgentError;
use crate::tools::grep::GrepMatch;

pub use summary::format_history_summary;

/// Tool-specific arguments chosen by the decision model.
pub type Params = serde_json::Map<String, Value>;

/// The fixed tool vocabulary. Also used as the routing label out of the decision node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    ReadFile,
    GrepSearch,
    ListDir,
    SearchApiDocstrings,
    EditFile,
    CreateNewFile,
    ValidateCode,
    Finish,
}

impl Tool {
    pub const ALL: [Tool; 8] = [
        Tool::ReadFile,
        Tool::EditFile,
        Tool::CreateNewFile,
        Tool::GrepSearch,
        Tool::ListDir,
        Tool::SearchApiDocstrings,
        Tool::ValidateCode,
        Tool::Finish,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Tool::ReadFile => "read_file",
            Tool::GrepSearch => "grep_search",
            Tool::ListDir => "list_dir",
            Tool::SearchApiDocstrings => "search_api_docstrings",
            Tool::EditFile => "edit_file",
            Tool::CreateNewFile => "create_new_file",
            Tool::ValidateCode => "validate_code",
            Tool::Finish => "finish",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tool {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Tool::ALL
            .into_iter()
            .find(|t| t.as_str() == name)
            .or_else(|| (name == "search_api_docstrings_regex").then_some(Tool::SearchApiDocstrings))
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))
    }
}

/// Outcome of a single edit operation.
#[derive(Debug, Clone)]
pub struct OpDetail {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct EditReport {
    pub success: bool,
    pub operations: usize,
    pub details: Vec<OpDetail>,
    pub reasoning: String,
}

impl EditReport {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            operations: 0,
            details: vec![OpDetail {
                success: false,
                message: message.into(),
            }],
            reasoning: String::new(),
        }
    }
}

/// Normalized result of one tool invocation, one variant per tool.
#[derive(Debug, Clone)]
pub enum ToolResult {
    ReadFile {
        success: bool,
        content: String,
    },
    Grep {
        success: bool,
        matches: Vec<GrepMatch>,
    },
    ListDir {
        success: bool,
        tree_visualization: String,
    },
    ApiSearch {
        success: bool,
        matches: Vec<ApiMatch>,
        message: String,
    },
    CreateFile {
        success: bool,
        error: String,
    },
    Edit(EditReport),
    Validation {
        success: bool,
        code_content: String,
        message: String,
        repairs: u32,
    },
    Finish,
    /// Written by the runner when a fatal error interrupted the entry's tool.
    Aborted {
        error: String,
    },
}

impl ToolResult {
    pub fn success(&self) -> bool {
        match self {
            ToolResult::ReadFile { success, .. }
            | ToolResult::Grep { success, .. }
            | ToolResult::ListDir { success, .. }
            | ToolResult::ApiSearch { success, .. }
            | ToolResult::CreateFile { success, .. }
            | ToolResult::Validation { success, .. } => *success,
            ToolResult::Edit(report) => report.success,
            ToolResult::Finish => true,
            ToolResult::Aborted { .. } => false,
        }
    }
}

/// Lifecycle of an entry's result.
#[derive(Debug, Clone)]
pub enum Outcome {
    Pending,
    /// Edit staging: the target file's content, held until the edit is applied.
    Staged { file_content: String },
    Done(ToolResult),
}

/// One tool decision plus its eventual outcome.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub tool: Tool,
    pub reason: String,
    pub params: Params,
    pub outcome: Outcome,
    pub timestamp: String,
}

impl HistoryEntry {
    pub fn open(tool: Tool, reason: impl Into<String>, params: Params) -> Self {
        Self {
            tool,
            reason: reason.into(),
            params,
            outcome: Outcome::Pending,
            timestamp: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.outcome, Outcome::Done(_))
    }

    pub fn result(&self) -> Option<&ToolResult> {
        match &self.outcome {
            Outcome::Done(result) => Some(result),
            _ => None,
        }
    }

    pub fn staged_content(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Staged { file_content } => Some(file_content),
            _ => None,
        }
    }

    /// Record the result. Each entry is completed exactly once.
    pub fn complete(&mut self, result: ToolResult) -> Result<(), AgentError> {
        if !self.is_open() {
            return Err(AgentError::AlreadyCompleted(self.tool));
        }
        self.outcome = Outcome::Done(result);
        Ok(())
    }

    pub fn stage(&mut self, file_content: String) -> Result<(), AgentError> {
        if !self.is_open() {
            return Err(AgentError::AlreadyCompleted(self.tool));
        }
        self.outcome = Outcome::Staged { file_content };
        Ok(())
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// A required string parameter; absent or empty is a fatal parameter error.
    pub fn require(&self, key: &'static str) -> Result<&str, AgentError> {
        self.str_param(key)
            .filter(|v| !v.is_empty())
            .ok_or(AgentError::MissingParameter {
                tool: self.tool,
                param: key,
            })
    }

    /// Booleans arrive from YAML either as real booleans or as strings.
    pub fn bool_param(&self, key: &str) -> Option<bool> {
        match self.params.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}
