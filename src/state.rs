use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::agent::prompts::ToolCatalog;
use crate::error::AgentError;
use crate::history::{HistoryEntry, ToolResult};

/// Runtime settings, read from the environment (and `.env`). CLI flags override.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub sub_model: String,
    pub cache_dir: PathBuf,
    pub cache_enabled: bool,
    pub rules_file: PathBuf,
    pub max_steps: usize,
    pub decision_retries: usize,
    pub tools: ToolCatalog,
    /// Name of the library generated code targets, mentioned in the decision prompt.
    pub library: Option<String>,
    pub python_bin: String,
    pub validate_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "o4-mini".to_string(),
            sub_model: "o4-mini".to_string(),
            cache_dir: PathBuf::from("./data/llm_cache"),
            cache_enabled: true,
            rules_file: PathBuf::from("./knowledge_base/rules.txt"),
            max_steps: 40,
            decision_retries: 2,
            tools: ToolCatalog::all(),
            library: None,
            python_bin: "python3".to_string(),
            validate_timeout: Duration::from_secs(60),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = dotenv::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let model = dotenv::var("LLM_MODEL").unwrap_or(defaults.model);
        let sub_model = dotenv::var("LLM_SUB_MODEL").unwrap_or_else(|_| model.clone());
        Self {
            model,
            sub_model,
            cache_dir: dotenv::var("LLM_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            cache_enabled: dotenv::var("LLM_CACHE").map_or(true, |v| v.trim() != "0"),
            rules_file: dotenv::var("RULES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.rules_file),
            max_steps: env_parse("AGENT_MAX_STEPS").unwrap_or(defaults.max_steps),
            decision_retries: env_parse("AGENT_DECISION_RETRIES")
                .unwrap_or(defaults.decision_retries),
            tools: dotenv::var("AGENT_TOOLS")
                .map(|list| ToolCatalog::parse(&list))
                .unwrap_or(defaults.tools),
            library: dotenv::var("AGENT_LIBRARY").ok().filter(|l| !l.trim().is_empty()),
            python_bin: dotenv::var("PYTHON_BIN").unwrap_or(defaults.python_bin),
            validate_timeout: env_parse("VALIDATE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.validate_timeout),
        }
    }
}

/// One planned line-range replacement (1-based, inclusive). A missing replacement
/// deletes the range.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EditOp {
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default)]
    pub replacement: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditPlan {
    pub reasoning: String,
    pub operations: Vec<EditOp>,
}

/// Working state owned by the active sub-flow, cleared when it completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scratch {
    EditPlan(EditPlan),
    Repair {
        code: String,
        errors: String,
        repairs: u32,
    },
}

/// Context threaded through one run of the agent graph.
#[derive(Debug)]
pub struct SharedState {
    pub user_query: String,
    pub working_dir: PathBuf,
    pub history: Vec<HistoryEntry>,
    pub response: Option<String>,
    pub scratch: Option<Scratch>,
}

impl SharedState {
    pub fn new(user_query: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_query: user_query.into(),
            working_dir: working_dir.into(),
            history: Vec::new(),
            response: None,
            scratch: None,
        }
    }

    /// Start another query in the same session. History carries over.
    pub fn begin_query(&mut self, user_query: impl Into<String>) {
        self.user_query = user_query.into();
        self.response = None;
        self.scratch = None;
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.working_dir.join(Path::new(relative))
    }

    /// The most recent entry, if it has no result yet.
    pub fn open_entry(&self) -> Result<&HistoryEntry, AgentError> {
        self.history
            .last()
            .filter(|e| e.is_open())
            .ok_or(AgentError::NoOpenEntry)
    }

    pub fn open_entry_mut(&mut self) -> Result<&mut HistoryEntry, AgentError> {
        self.history
            .last_mut()
            .filter(|e| e.is_open())
            .ok_or(AgentError::NoOpenEntry)
    }

    /// Append a freshly decided entry. Refused while the previous one is unresolved.
    pub fn push_entry(&mut self, entry: HistoryEntry) -> Result<(), AgentError> {
        if let Some(open) = self.history.last().filter(|e| e.is_open()) {
            return Err(AgentError::EntryStillOpen(open.tool));
        }
        self.history.push(entry);
        Ok(())
    }

    pub fn complete_open(&mut self, result: ToolResult) -> Result<(), AgentError> {
        self.open_entry_mut()?.complete(result)
    }

    /// Close whatever entry a failed run left open so the next query starts clean.
    pub fn abort_open_entry(&mut self, error: &str) {
        if let Ok(entry) = self.open_entry_mut() {
            let tool = entry.tool;
            if entry
                .complete(ToolResult::Aborted {
                    error: error.to_string(),
                })
                .is_err()
            {
                warn!(%tool, "could not close aborted entry");
            }
        }
        self.scratch = None;
    }
}
