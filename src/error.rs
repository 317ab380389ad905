use thiserror::Error;

use crate::history::Tool;

/// Failures that abort a run.
///
/// Tool failures (unreadable files, bad regexes, code that does not run) are not errors: they
/// are recorded as `success: false` results so the next decision can react to them.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("missing required parameter `{param}` for {tool}")]
    MissingParameter { tool: Tool, param: &'static str },

    #[error("could not parse {context} response: {reason}")]
    Parse { context: &'static str, reason: String },

    #[error("unknown tool `{0}`")]
    UnknownTool(String),

    #[error("tool `{0}` is not enabled in this deployment")]
    DisabledTool(Tool),

    #[error("no open history entry")]
    NoOpenEntry,

    #[error("history entry for {0} is still open")]
    EntryStillOpen(Tool),

    #[error("history entry for {0} already has a result")]
    AlreadyCompleted(Tool),

    #[error("step budget of {0} exhausted before the run finished")]
    StepBudgetExhausted(usize),

    #[error("flow ended without producing a response")]
    NoResponse,
}

impl AgentError {
    pub fn parse(context: &'static str, reason: impl Into<String>) -> Self {
        Self::Parse {
            context,
            reason: reason.into(),
        }
    }
}
