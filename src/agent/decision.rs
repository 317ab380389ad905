use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use super::flow::Node;
use super::prompts::{decision_prompt, Rules, ToolCatalog};
use super::reply::{extract_code_block, extract_structured, CODE_LANGS};
use crate::error::AgentError;
use crate::history::{format_history_summary, HistoryEntry, Params, Tool};
use crate::llm::CachedLlm;
use crate::state::SharedState;

/// A validated choice of the next tool.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub tool: Tool,
    pub reason: String,
    pub params: Params,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    tool: Option<String>,
    reason: Option<String>,
    params: Option<Value>,
}

/// Turn a model reply into a decision.
///
/// A python block short-circuits into code validation. Otherwise the structured payload must
/// be a YAML mapping naming an enabled tool.
pub fn parse_decision(reply: &str, catalog: &ToolCatalog) -> Result<Decision, AgentError> {
    if catalog.is_enabled(Tool::ValidateCode) {
        if let Some(code) = extract_code_block(reply, CODE_LANGS) {
            let mut params = Params::new();
            params.insert("code_content".to_string(), Value::String(code));
            return Ok(Decision {
                tool: Tool::ValidateCode,
                reason: "validate_code".to_string(),
                params,
            });
        }
    }

    let payload = extract_structured(reply);
    if payload.is_empty() {
        return Err(AgentError::parse("decision", "empty reply"));
    }
    let raw: RawDecision = serde_yaml::from_str(&payload)
        .map_err(|e| AgentError::parse("decision", format!("invalid YAML: {}", e)))?;

    let tool: Tool = raw
        .tool
        .ok_or_else(|| AgentError::parse("decision", "tool name is missing"))?
        .parse()?;
    let reason = raw
        .reason
        .ok_or_else(|| AgentError::parse("decision", "reason is missing"))?;
    if !catalog.is_enabled(tool) {
        return Err(AgentError::DisabledTool(tool));
    }

    let params = match raw.params {
        Some(Value::Object(map)) => map,
        None | Some(Value::Null) if tool == Tool::Finish => Params::new(),
        None | Some(Value::Null) => {
            return Err(AgentError::parse("decision", "parameters are missing"))
        }
        // `finish` tolerates junk params; nothing reads them but `final_version`.
        Some(_) if tool == Tool::Finish => Params::new(),
        Some(other) => {
            return Err(AgentError::parse(
                "decision",
                format!("params must be a mapping, got {}", other),
            ))
        }
    };

    Ok(Decision {
        tool,
        reason: reason.trim().to_string(),
        params,
    })
}

/// Asks the model which tool to run next and opens a history entry for it.
pub struct DecisionAgent {
    llm: Arc<CachedLlm>,
    rules: Rules,
    catalog: ToolCatalog,
    retries: usize,
    library: Option<String>,
}

impl DecisionAgent {
    pub fn new(
        llm: Arc<CachedLlm>,
        rules: Rules,
        catalog: ToolCatalog,
        retries: usize,
        library: Option<String>,
    ) -> Self {
        Self {
            llm,
            rules,
            catalog,
            retries,
            library,
        }
    }
}

#[async_trait]
impl Node for DecisionAgent {
    type Prep = String;
    type Output = Decision;

    fn name(&self) -> &'static str {
        "decision"
    }

    fn prep(&self, state: &SharedState) -> Result<String> {
        info!(query = %state.user_query, steps = state.history.len(), "deciding next action");
        let summary = format_history_summary(&state.history);
        Ok(decision_prompt(
            &state.user_query,
            &summary,
            &self.rules.load(),
            &self.catalog,
            self.library.as_deref(),
        ))
    }

    async fn exec(&self, prompt: String) -> Result<Decision> {
        let mut last_error = None;
        for attempt in 0..=self.retries {
            let reply = self.llm.call(&prompt, attempt == 0).await?;
            match parse_decision(&reply, &self.catalog) {
                Ok(decision) => return Ok(decision),
                Err(e) => {
                    warn!(attempt, "rejected decision reply: {}", e);
                    last_error = Some(e);
                }
            }
        }
        let reason = last_error.map_or_else(|| "no attempts".to_string(), |e| e.to_string());
        Err(AgentError::parse("decision", reason).into())
    }

    fn post(&self, state: &mut SharedState, decision: Decision) -> Result<Option<String>> {
        info!(tool = %decision.tool, reason = %decision.reason, "selected tool");
        let label = decision.tool.as_str().to_string();
        state.push_entry(HistoryEntry::open(
            decision.tool,
            decision.reason,
            decision.params,
        ))?;
        Ok(Some(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::flow::{Step, StepBudget};
    use crate::test_support::ScriptedModel;

    #[test]
    fn test_python_block_short_circuits() {
        let reply = "Let me check:\n```python\nimport os\nprint(os.getcwd())\n```";
        let d = parse_decision(reply, &ToolCatalog::all()).unwrap();
        assert_eq!(d.tool, Tool::ValidateCode);
        assert_eq!(d.reason, "validate_code");
        assert_eq!(
            d.params.get("code_content").and_then(Value::as_str),
            Some("import os\nprint(os.getcwd())")
        );
    }

    #[test]
    fn test_yaml_decision() {
        let reply = "```yaml\ntool: list_dir\nreason: |\n  look around\nparams:\n  relative_workspace_path: utils\n```";
        let d = parse_decision(reply, &ToolCatalog::all()).unwrap();
        assert_eq!(d.tool, Tool::ListDir);
        assert_eq!(d.reason, "look around");
        assert_eq!(
            d.params.get("relative_workspace_path").and_then(Value::as_str),
            Some("utils")
        );
    }

    #[test]
    fn test_finish_without_params_and_alias() {
        let d = parse_decision("tool: finish\nreason: done", &ToolCatalog::all()).unwrap();
        assert_eq!(d.tool, Tool::Finish);
        assert!(d.params.is_empty());

        let d = parse_decision(
            "```yml\ntool: search_api_docstrings_regex\nreason: r\nparams:\n  query: Junction\n```",
            &ToolCatalog::all(),
        )
        .unwrap();
        assert_eq!(d.tool, Tool::SearchApiDocstrings);
    }

    #[test]
    fn test_invalid_decisions() {
        let all = ToolCatalog::all();
        assert!(matches!(
            parse_decision("tool: read_file\nreason: r", &all),
            Err(AgentError::Parse { .. })
        ));
        assert!(matches!(
            parse_decision("reason: r\nparams: {}", &all),
            Err(AgentError::Parse { .. })
        ));
        assert!(matches!(
            parse_decision("tool: delete_file\nreason: r\nparams: {}", &all),
            Err(AgentError::UnknownTool(name)) if name == "delete_file"
        ));
        assert!(matches!(
            parse_decision("tool: read_file\nreason: r\nparams: [a]", &all),
            Err(AgentError::Parse { .. })
        ));
        assert!(matches!(
            parse_decision("I am not sure what to do.", &all),
            Err(AgentError::Parse { .. })
        ));
        let narrow = ToolCatalog::parse("list_dir");
        assert!(matches!(
            parse_decision("tool: read_file\nreason: r\nparams:\n  target_file: a.py", &narrow),
            Err(AgentError::DisabledTool(Tool::ReadFile))
        ));
    }

    #[tokio::test]
    async fn test_retry_then_fatal() {
        let model = Arc::new(ScriptedModel::new([
            "no yaml here",
            "tool: nope\nreason: r\nparams: {}",
            "tool: finish\nreason: done",
        ]));
        let llm = Arc::new(CachedLlm::uncached(model.clone(), "m"));
        let agent = DecisionAgent::new(llm.clone(), Rules::new("/nonexistent"), ToolCatalog::all(), 2, None);
        let mut state = SharedState::new("q", ".");
        let mut budget = StepBudget::new(5);
        let label = agent.run(&mut state, &mut budget).await.unwrap();
        assert_eq!(label.as_deref(), Some("finish"));
        assert_eq!(model.calls(), 3);
        assert!(state.history[0].is_open());

        let model = Arc::new(ScriptedModel::new(["bad", "bad", "bad"]));
        let llm = Arc::new(CachedLlm::uncached(model.clone(), "m"));
        let agent = DecisionAgent::new(llm, Rules::new("/nonexistent"), ToolCatalog::all(), 2, None);
        let mut state = SharedState::new("q", ".");
        let err = agent.run(&mut state, &mut budget).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<AgentError>(), Some(AgentError::Parse { .. })));
        assert_eq!(model.calls(), 3);
        assert!(state.history.is_empty());
    }
}
