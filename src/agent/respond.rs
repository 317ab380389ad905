use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use super::flow::Node;
use super::prompts::response_prompt;
use crate::history::{format_history_summary, ToolResult};
use crate::llm::CachedLlm;
use crate::state::SharedState;

/// Writes the user-facing answer once the decision model chose `finish`.
pub struct FormatResponseNode {
    llm: Arc<CachedLlm>,
}

impl FormatResponseNode {
    pub fn new(llm: Arc<CachedLlm>) -> Self {
        Self { llm }
    }
}

/// Append `final_version` to the prose, fencing it unless it already is.
fn attach_final_version(prose: &str, final_version: Option<&str>) -> String {
    let Some(code) = final_version.map(str::trim).filter(|c| !c.is_empty()) else {
        return prose.to_string();
    };
    if code.contains("```") {
        format!("{}\n\n{}", prose, code)
    } else {
        format!("{}\n\n```python\n{}\n```", prose, code)
    }
}

#[async_trait]
impl Node for FormatResponseNode {
    type Prep = (String, Option<String>);
    type Output = String;

    fn name(&self) -> &'static str {
        "format_response"
    }

    fn prep(&self, state: &SharedState) -> Result<(String, Option<String>)> {
        let final_version = state
            .history
            .last()
            .and_then(|e| e.str_param("final_version"))
            .map(str::to_string);
        let summary = format_history_summary(&state.history);
        Ok((response_prompt(&state.user_query, &summary), final_version))
    }

    async fn exec(&self, (prompt, final_version): (String, Option<String>)) -> Result<String> {
        let prose = self.llm.call(&prompt, true).await?;
        Ok(attach_final_version(prose.trim(), final_version.as_deref()))
    }

    fn post(&self, state: &mut SharedState, response: String) -> Result<Option<String>> {
        info!(chars = response.len(), "response ready");
        for line in response.lines() {
            debug!("  │ {}", line);
        }
        state.complete_open(ToolResult::Finish)?;
        state.response = Some(response);
        Ok(Some("done".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::flow::{Step, StepBudget};
    use crate::history::{HistoryEntry, Params, Tool};
    use crate::test_support::ScriptedModel;

    #[test]
    fn test_final_version_fencing() {
        assert_eq!(attach_final_version("Done.", None), "Done.");
        assert_eq!(attach_final_version("Done.", Some("  ")), "Done.");
        assert_eq!(
            attach_final_version("Done.", Some("x = 1\n")),
            "Done.\n\n```python\nx = 1\n```"
        );
        assert_eq!(
            attach_final_version("Done.", Some("```python\nx = 1\n```")),
            "Done.\n\n```python\nx = 1\n```"
        );
    }

    #[tokio::test]
    async fn test_closes_finish_entry() {
        let model = Arc::new(ScriptedModel::new(["I listed the utils directory."]));
        let node = FormatResponseNode::new(Arc::new(CachedLlm::uncached(model.clone(), "m")));
        let mut state = SharedState::new("list utils", ".");
        let mut params = Params::new();
        params.insert("final_version".into(), "print('hi')".into());
        state
            .push_entry(HistoryEntry::open(Tool::Finish, "done", params))
            .unwrap();

        let label = node.run(&mut state, &mut StepBudget::new(1)).await.unwrap();
        assert_eq!(label.as_deref(), Some("done"));
        assert_eq!(
            state.response.as_deref(),
            Some("I listed the utils directory.\n\n```python\nprint('hi')\n```")
        );
        assert!(matches!(state.history[0].result(), Some(ToolResult::Finish)));
        assert!(model.prompts()[0].contains("User request: list utils"));
    }
}
