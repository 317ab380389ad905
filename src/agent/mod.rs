pub mod actions;
pub mod decision;
pub mod edit;
pub mod flow;
pub mod prompts;
pub mod repair;
pub mod reply;
pub mod respond;

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::docs::ApiIndexCell;
use crate::error::AgentError;
use crate::history::Tool;
use crate::llm::CachedLlm;
use crate::python::CodeValidator;
use crate::state::SharedState;

use actions::{CreateFileAction, GrepSearchAction, ListDirAction, ReadFileAction, SearchDocsAction};
use decision::DecisionAgent;
use flow::{Flow, FlowBuilder, StepBudget};
use prompts::{Rules, ToolCatalog};
use repair::{FixCodeNode, ValidateCodeNode, COMPILATION_ERROR, COMPILATION_SUCCESS};
use respond::FormatResponseNode;

/// Everything the agent graph needs from the outside world.
pub struct AgentDeps {
    pub llm: Arc<CachedLlm>,
    pub validator: Arc<dyn CodeValidator>,
    pub rules: Rules,
    pub catalog: ToolCatalog,
    pub decision_retries: usize,
    pub library: Option<String>,
    pub api_index: &'static ApiIndexCell,
}

pub struct CodingAgent {
    graph: Flow,
    max_steps: usize,
}

impl CodingAgent {
    /// Wire the decision node to every enabled tool. Actions return to the decision node;
    /// `finish` leads to the formatter, which ends the run.
    pub fn new(deps: AgentDeps, max_steps: usize) -> Self {
        let mut b = FlowBuilder::new("coding_agent");
        let decision = b.add(DecisionAgent::new(
            deps.llm.clone(),
            deps.rules.clone(),
            deps.catalog.clone(),
            deps.decision_retries,
            deps.library.clone(),
        ));

        for &tool in deps.catalog.tools() {
            let label = tool.as_str();
            match tool {
                Tool::ReadFile => {
                    let id = b.add(ReadFileAction);
                    b.route(decision, label, id).connect(id, decision);
                }
                Tool::GrepSearch => {
                    let id = b.add(GrepSearchAction);
                    b.route(decision, label, id).connect(id, decision);
                }
                Tool::ListDir => {
                    let id = b.add(ListDirAction);
                    b.route(decision, label, id).connect(id, decision);
                }
                Tool::SearchApiDocstrings => {
                    let id = b.add(SearchDocsAction::new(deps.api_index));
                    b.route(decision, label, id).connect(id, decision);
                }
                Tool::CreateNewFile => {
                    let id = b.add(CreateFileAction::new(deps.validator.clone()));
                    b.route(decision, label, id).connect(id, decision);
                }
                Tool::EditFile => {
                    let id = b.add(edit::edit_flow(deps.llm.clone(), deps.validator.clone()));
                    b.route(decision, label, id).connect(id, decision);
                }
                Tool::ValidateCode => {
                    let validate = b.add(ValidateCodeNode::new(deps.validator.clone()));
                    let fix = b.add(FixCodeNode::new(deps.llm.clone(), deps.rules.clone()));
                    b.route(decision, label, validate)
                        .route(validate, COMPILATION_ERROR, fix)
                        .connect(fix, validate)
                        .route(validate, COMPILATION_SUCCESS, decision);
                }
                Tool::Finish => {
                    let respond = b.add(FormatResponseNode::new(deps.llm.clone()));
                    b.route(decision, label, respond);
                }
            }
        }

        Self {
            graph: b.build(decision),
            max_steps,
        }
    }

    /// Run the graph to completion for the query in `state`.
    ///
    /// On a fatal error the open history entry is closed as aborted, so an interactive
    /// session can continue with the next query.
    pub async fn run(&self, state: &mut SharedState) -> Result<String> {
        let mut budget = StepBudget::new(self.max_steps);
        let outcome = self.graph.execute(state, &mut budget).await;
        info!(steps = budget.used(), history = state.history.len(), "run finished");

        if let Err(e) = outcome {
            warn!("run aborted: {:#}", e);
            state.abort_open_entry(&format!("{:#}", e));
            return Err(e);
        }
        state
            .response
            .clone()
            .ok_or_else(|| AgentError::NoResponse.into())
    }

    /// Mermaid rendering of the wired graph.
    pub fn graph(&self) -> String {
        self.graph.to_mermaid()
    }
}
