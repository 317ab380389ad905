//! The `edit_file` sub-flow: read the target, plan line operations, apply them.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use super::flow::{Flow, FlowBuilder, Node};
use super::prompts::plan_prompt;
use super::reply::extract_structured;
use crate::error::AgentError;
use crate::history::{EditReport, OpDetail, ToolResult};
use crate::llm::CachedLlm;
use crate::python::{validate_file, CodeValidator};
use crate::state::{EditOp, EditPlan, Scratch, SharedState};
use crate::tools::fs;

pub const DEFAULT_RETRIES: usize = 2;

/// Reads the edit target and stages its content on the open entry.
pub struct ReadTargetNode;

#[async_trait]
impl Node for ReadTargetNode {
    type Prep = PathBuf;
    type Output = Result<String, String>;

    fn name(&self) -> &'static str {
        "read_target"
    }

    fn prep(&self, state: &SharedState) -> Result<PathBuf> {
        Ok(state.resolve(state.open_entry()?.require("target_file")?))
    }

    async fn exec(&self, path: PathBuf) -> Result<Result<String, String>> {
        Ok(fs::read_file(&path)
            .await
            .map_err(|e| format!("Error reading file: {:#}", e)))
    }

    fn post(
        &self,
        state: &mut SharedState,
        output: Result<String, String>,
    ) -> Result<Option<String>> {
        match output {
            Ok(content) => {
                state.open_entry_mut()?.stage(content)?;
                Ok(None)
            }
            Err(message) => {
                warn!("edit target unreadable: {}", message);
                state.complete_open(ToolResult::Edit(EditReport::failed(message)))?;
                Ok(Some("abort".to_string()))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    reasoning: Option<String>,
    operations: Option<Vec<EditOp>>,
}

/// Parse and bounds-check a plan against a file of `total_lines` lines.
pub fn parse_plan(reply: &str, total_lines: usize) -> Result<EditPlan, AgentError> {
    let payload = extract_structured(reply);
    let raw: RawPlan = serde_yaml::from_str(&payload)
        .map_err(|e| AgentError::parse("edit plan", format!("invalid YAML: {}", e)))?;
    let reasoning = raw
        .reasoning
        .ok_or_else(|| AgentError::parse("edit plan", "reasoning is missing"))?;
    let operations = raw
        .operations
        .ok_or_else(|| AgentError::parse("edit plan", "operations are missing"))?;

    for op in &operations {
        let append = op.start_line == total_lines + 1 && op.end_line == total_lines + 1;
        let in_file = op.start_line >= 1 && op.start_line <= op.end_line && op.end_line <= total_lines;
        if !append && !in_file {
            return Err(AgentError::parse(
                "edit plan",
                format!(
                    "line range {}-{} is invalid for a file of {} lines",
                    op.start_line, op.end_line, total_lines
                ),
            ));
        }
    }

    let mut ranges: Vec<(usize, usize)> = operations
        .iter()
        .map(|op| (op.start_line, op.end_line))
        .collect();
    ranges.sort_unstable();
    if let Some(pair) = ranges.windows(2).find(|w| w[1].0 <= w[0].1) {
        return Err(AgentError::parse(
            "edit plan",
            format!(
                "line ranges {}-{} and {}-{} overlap",
                pair[0].0, pair[0].1, pair[1].0, pair[1].1
            ),
        ));
    }

    Ok(EditPlan {
        reasoning: reasoning.trim().to_string(),
        operations,
    })
}

pub struct PlanInput {
    file_content: String,
    instructions: String,
    code_edit: String,
}

/// Turns `instructions` + `code_edit` into concrete line operations.
pub struct AnalyzeAndPlanNode {
    llm: Arc<CachedLlm>,
    retries: usize,
}

impl AnalyzeAndPlanNode {
    pub fn new(llm: Arc<CachedLlm>) -> Self {
        Self {
            llm,
            retries: DEFAULT_RETRIES,
        }
    }
}

#[async_trait]
impl Node for AnalyzeAndPlanNode {
    type Prep = PlanInput;
    type Output = EditPlan;

    fn name(&self) -> &'static str {
        "analyze_and_plan"
    }

    fn prep(&self, state: &SharedState) -> Result<PlanInput> {
        let entry = state.open_entry()?;
        let file_content = entry
            .staged_content()
            .ok_or_else(|| anyhow!("edit target was not staged before planning"))?
            .to_string();
        Ok(PlanInput {
            file_content,
            instructions: entry.require("instructions")?.to_string(),
            code_edit: entry.require("code_edit")?.to_string(),
        })
    }

    async fn exec(&self, input: PlanInput) -> Result<EditPlan> {
        let total_lines = input.file_content.lines().count();
        let prompt = plan_prompt(&input.file_content, &input.instructions, &input.code_edit);

        let mut last_error = None;
        for attempt in 0..=self.retries {
            let reply = self.llm.call(&prompt, attempt == 0).await?;
            match parse_plan(&reply, total_lines) {
                Ok(plan) => {
                    info!(operations = plan.operations.len(), attempt, "edit planned");
                    return Ok(plan);
                }
                Err(e) => {
                    warn!(attempt, "rejected edit plan: {}", e);
                    last_error = Some(e);
                }
            }
        }
        let reason = last_error.map_or_else(|| "no attempts".to_string(), |e| e.to_string());
        Err(AgentError::parse("edit plan", reason).into())
    }

    fn post(&self, state: &mut SharedState, plan: EditPlan) -> Result<Option<String>> {
        state.scratch = Some(Scratch::EditPlan(plan));
        Ok(None)
    }
}

/// Applies the planned operations bottom-up, then validates the file.
pub struct ApplyChangesNode {
    validator: Arc<dyn CodeValidator>,
}

impl ApplyChangesNode {
    pub fn new(validator: Arc<dyn CodeValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl Node for ApplyChangesNode {
    type Prep = (PathBuf, EditPlan);
    type Output = EditReport;

    fn name(&self) -> &'static str {
        "apply_changes"
    }

    fn prep(&self, state: &SharedState) -> Result<(PathBuf, EditPlan)> {
        let path = state.resolve(state.open_entry()?.require("target_file")?);
        match &state.scratch {
            Some(Scratch::EditPlan(plan)) => Ok((path, plan.clone())),
            _ => Err(anyhow!("no edit plan to apply")),
        }
    }

    async fn exec(&self, (path, plan): (PathBuf, EditPlan)) -> Result<EditReport> {
        let EditPlan {
            reasoning,
            mut operations,
        } = plan;
        // Bottom-up, so earlier line numbers stay valid.
        operations.sort_by(|a, b| b.start_line.cmp(&a.start_line));

        let mut details = Vec::with_capacity(operations.len() + 1);
        for op in &operations {
            let replacement = op.replacement.as_deref();
            let detail = match fs::replace_lines(&path, op.start_line, op.end_line, replacement).await {
                Ok(message) => OpDetail {
                    success: true,
                    message,
                },
                Err(e) => OpDetail {
                    success: false,
                    message: format!("{:#}", e),
                },
            };
            details.push(detail);
        }
        let ops_ok = details.iter().all(|d| d.success);

        let validation = validate_file(self.validator.as_ref(), &path).await?;
        if !validation.passed() {
            details.push(OpDetail {
                success: false,
                message: validation.message.clone(),
            });
        }

        let report = EditReport {
            success: ops_ok && validation.passed(),
            operations: operations.len(),
            details,
            reasoning,
        };
        info!(path = %path.display(), success = report.success, "edit applied");
        Ok(report)
    }

    fn post(&self, state: &mut SharedState, report: EditReport) -> Result<Option<String>> {
        state.scratch = None;
        state.complete_open(ToolResult::Edit(report))?;
        Ok(None)
    }
}

pub fn edit_flow(llm: Arc<CachedLlm>, validator: Arc<dyn CodeValidator>) -> Flow {
    let mut b = FlowBuilder::new("edit_file");
    let read = b.add(ReadTargetNode);
    let plan = b.add(AnalyzeAndPlanNode::new(llm));
    let apply = b.add(ApplyChangesNode::new(validator));
    b.connect(read, plan).connect(plan, apply);
    b.build(read)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::flow::StepBudget;
    use crate::cache::LlmCache;
    use crate::history::{HistoryEntry, Params, Tool};
    use crate::test_support::{ScriptedModel, ScriptedValidator};
    use serde_json::json;

    const FILE: &str = "one\ntwo\nthree\nfour\nfive\n";

    fn edit_state(dir: &std::path::Path, target: &str) -> SharedState {
        let mut state = SharedState::new("edit it", dir);
        let params = match json!({
            "target_file": target,
            "instructions": "rewrite some lines",
            "code_edit": "// ... existing code ...\nY\n// ... existing code ...",
        }) {
            serde_json::Value::Object(map) => map,
            _ => Params::new(),
        };
        state
            .push_entry(HistoryEntry::open(Tool::EditFile, "edit", params))
            .unwrap();
        state
    }

    #[test]
    fn test_plan_bounds() {
        let ok = "```yaml\nreasoning: r\noperations:\n  - start_line: 6\n    end_line: 6\n    replacement: tail\n```";
        assert_eq!(parse_plan(ok, 5).unwrap().operations[0].start_line, 6);
        let deletion = "reasoning: r\noperations:\n  - start_line: 2\n    end_line: 3";
        assert_eq!(parse_plan(deletion, 5).unwrap().operations[0].replacement, None);
        let adjacent = "reasoning: r\noperations:\n  - start_line: 1\n    end_line: 2\n    replacement: A\n  - start_line: 3\n    end_line: 3\n    replacement: B";
        assert_eq!(parse_plan(adjacent, 5).unwrap().operations.len(), 2);

        for bad in [
            "reasoning: r\noperations:\n  - start_line: 0\n    end_line: 1",
            "reasoning: r\noperations:\n  - start_line: 3\n    end_line: 2",
            "reasoning: r\noperations:\n  - start_line: 4\n    end_line: 6",
            "reasoning: r\noperations:\n  - start_line: 7\n    end_line: 7",
            "operations: []",
            "reasoning: r",
            "reasoning: r\noperations: 3",
            "reasoning: r\noperations:\n  - start_line: 2\n    end_line: 4\n    replacement: A\n  - start_line: 3\n    end_line: 3\n    replacement: B",
            "reasoning: r\noperations:\n  - start_line: 6\n    end_line: 6\n    replacement: A\n  - start_line: 6\n    end_line: 6\n    replacement: B",
        ] {
            assert!(parse_plan(bad, 5).is_err(), "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_operations_apply_bottom_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), FILE).unwrap();
        let plan = "```yaml\nreasoning: |\n  two edits\noperations:\n  - start_line: 2\n    end_line: 3\n    replacement: |\n      Y\n  - start_line: 5\n    end_line: 5\n    replacement: |\n      X\n```";
        let model = Arc::new(ScriptedModel::new([plan]));
        let flow = edit_flow(
            Arc::new(CachedLlm::uncached(model, "m")),
            Arc::new(ScriptedValidator::passing()),
        );
        let mut state = edit_state(dir.path(), "f.txt");
        flow.execute(&mut state, &mut StepBudget::new(5)).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.txt")).unwrap(),
            "one\nY\nfour\nX\n"
        );
        assert!(state.scratch.is_none());
        match state.history[0].result() {
            Some(ToolResult::Edit(report)) => {
                assert!(report.success);
                assert_eq!(report.operations, 2);
                assert_eq!(report.details[0].message, format!("Replaced lines 5-5 in {}", dir.path().join("f.txt").display()));
                assert_eq!(report.reasoning, "two edits");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validation_failure_fails_edit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.py"), "x = 1\n").unwrap();
        let plan = "reasoning: r\noperations:\n  - start_line: 2\n    end_line: 2\n    replacement: import nothing_here\n";
        let flow = edit_flow(
            Arc::new(CachedLlm::uncached(Arc::new(ScriptedModel::new([plan])), "m")),
            Arc::new(ScriptedValidator::failing_always("Import error: No module named 'nothing_here'")),
        );
        let mut state = edit_state(dir.path(), "m.py");
        flow.execute(&mut state, &mut StepBudget::new(5)).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("m.py")).unwrap(),
            "x = 1\nimport nothing_here\n"
        );
        match state.history[0].result() {
            Some(ToolResult::Edit(report)) => {
                assert!(!report.success);
                assert!(report.details[0].success);
                assert!(report.details[1].message.contains("nothing_here"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreadable_target_aborts_sub_flow() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedModel::new(Vec::<&str>::new()));
        let flow = edit_flow(
            Arc::new(CachedLlm::uncached(model.clone(), "m")),
            Arc::new(ScriptedValidator::passing()),
        );
        let mut state = edit_state(dir.path(), "missing.py");
        let mut budget = StepBudget::new(5);
        flow.execute(&mut state, &mut budget).await.unwrap();

        assert_eq!(budget.used(), 1);
        assert_eq!(model.calls(), 0);
        assert!(matches!(
            state.history[0].result(),
            Some(ToolResult::Edit(report)) if !report.success
        ));
    }

    #[tokio::test]
    async fn test_plan_retry_bypasses_cache() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), FILE).unwrap();
        let cache = LlmCache::open(&dir.path().join("cache")).await.unwrap();
        let model = Arc::new(ScriptedModel::new([
            "I would change line 2.",
            "reasoning: r\noperations:\n  - start_line: 1\n    end_line: 1\n    replacement: ONE\n",
        ]));
        let llm = Arc::new(CachedLlm::new(model.clone(), Some(cache), "m", "m"));
        let flow = edit_flow(llm, Arc::new(ScriptedValidator::passing()));
        let mut state = edit_state(dir.path(), "f.txt");
        flow.execute(&mut state, &mut StepBudget::new(5)).await.unwrap();

        assert_eq!(model.calls(), 2);
        assert!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap().starts_with("ONE\ntwo\n"));
    }
}
