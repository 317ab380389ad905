//! The `validate_code` loop: validate, and on failure ask the model for a fix and try again.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use super::flow::Node;
use super::prompts::{fix_prompt, Rules};
use super::reply::{extract_code_block, extract_structured, CODE_LANGS};
use crate::history::ToolResult;
use crate::llm::CachedLlm;
use crate::python::{CodeValidator, Validation};
use crate::state::{Scratch, SharedState};

pub const COMPILATION_SUCCESS: &str = "compilation_success";
pub const COMPILATION_ERROR: &str = "compilation_error";

#[derive(Debug, Clone)]
pub struct Candidate {
    code: String,
    repairs: u32,
    cwd: PathBuf,
}

pub struct ValidateCodeNode {
    validator: Arc<dyn CodeValidator>,
}

impl ValidateCodeNode {
    pub fn new(validator: Arc<dyn CodeValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl Node for ValidateCodeNode {
    type Prep = Candidate;
    type Output = (Candidate, Validation);

    fn name(&self) -> &'static str {
        "validate_code"
    }

    fn prep(&self, state: &SharedState) -> Result<Candidate> {
        let entry = state.open_entry()?;
        let (code, repairs) = match &state.scratch {
            Some(Scratch::Repair { code, repairs, .. }) => (code.clone(), *repairs),
            _ => (entry.require("code_content")?.to_string(), 0),
        };
        Ok(Candidate {
            code,
            repairs,
            cwd: state.working_dir.clone(),
        })
    }

    async fn exec(&self, candidate: Candidate) -> Result<(Candidate, Validation)> {
        let validation = self.validator.validate(&candidate.code, &candidate.cwd).await?;
        info!(
            verdict = ?validation.verdict,
            repairs = candidate.repairs,
            "code validated"
        );
        Ok((candidate, validation))
    }

    fn post(
        &self,
        state: &mut SharedState,
        (candidate, validation): (Candidate, Validation),
    ) -> Result<Option<String>> {
        if validation.passed() {
            state.scratch = None;
            state.complete_open(ToolResult::Validation {
                success: true,
                code_content: candidate.code,
                message: validation.message,
                repairs: candidate.repairs,
            })?;
            return Ok(Some(COMPILATION_SUCCESS.to_string()));
        }

        warn!(repairs = candidate.repairs, "validation failed: {}", validation.message);
        state.scratch = Some(Scratch::Repair {
            code: candidate.code,
            errors: validation.message,
            repairs: candidate.repairs,
        });
        Ok(Some(COMPILATION_ERROR.to_string()))
    }
}

/// Asks the repair model for a corrected version of the failing code.
pub struct FixCodeNode {
    llm: Arc<CachedLlm>,
    rules: Rules,
}

impl FixCodeNode {
    pub fn new(llm: Arc<CachedLlm>, rules: Rules) -> Self {
        Self { llm, rules }
    }
}

#[async_trait]
impl Node for FixCodeNode {
    type Prep = (String, u32);
    type Output = (String, u32);

    fn name(&self) -> &'static str {
        "fix_code"
    }

    fn prep(&self, state: &SharedState) -> Result<(String, u32)> {
        match &state.scratch {
            Some(Scratch::Repair {
                code,
                errors,
                repairs,
            }) => Ok((fix_prompt(code, errors, &self.rules.load()), *repairs)),
            _ => Err(anyhow!("no failing code to repair")),
        }
    }

    async fn exec(&self, (prompt, repairs): (String, u32)) -> Result<(String, u32)> {
        // Only the first repair may come from the cache, or a cached bad fix would loop.
        let reply = self
            .llm
            .call_model(&prompt, repairs == 0, self.llm.sub_model())
            .await?;
        let fixed = extract_code_block(&reply, CODE_LANGS).unwrap_or_else(|| extract_structured(&reply));
        Ok((fixed, repairs + 1))
    }

    fn post(&self, state: &mut SharedState, (fixed, repairs): (String, u32)) -> Result<Option<String>> {
        info!(repairs, "code repaired, revalidating");
        let errors = match state.scratch.take() {
            Some(Scratch::Repair { errors, .. }) => errors,
            _ => String::new(),
        };
        state.scratch = Some(Scratch::Repair {
            code: fixed,
            errors,
            repairs,
        });
        Ok(None)
    }
}
