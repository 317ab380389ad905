//! Test-only doubles for the LLM backend and the code validator.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::llm::Completion;
use crate::python::{CodeValidator, Validation, Verdict};

/// Replies with canned responses in order and records every prompt it was given.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    models: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<'a>(replies: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(str::to_string).collect()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Model name passed with each call, in call order.
    pub fn models(&self) -> Vec<String> {
        self.models.lock().unwrap().clone()
    }
}

#[async_trait]
impl Completion for ScriptedModel {
    async fn complete(&self, prompt: &str, model: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.models.lock().unwrap().push(model.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted model ran out of replies"))
    }
}

/// Returns scripted verdicts in order, then a fixed fallback.
pub struct ScriptedValidator {
    script: Mutex<VecDeque<Validation>>,
    fallback: Validation,
    seen: Mutex<Vec<String>>,
}

impl ScriptedValidator {
    pub fn with_script(script: Vec<Validation>, fallback: Validation) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn passing() -> Self {
        Self::with_script(Vec::new(), Validation::new(Verdict::Clean, "Code syntax looks valid."))
    }

    pub fn failing_always(message: &str) -> Self {
        Self::with_script(Vec::new(), Validation::new(Verdict::RuntimeError, message))
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Code submitted for validation, in call order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeValidator for ScriptedValidator {
    async fn validate(&self, code: &str, _cwd: &Path) -> Result<Validation> {
        self.seen.lock().unwrap().push(code.to_string());
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}
