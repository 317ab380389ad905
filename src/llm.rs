use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::LlmCache;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// A text completion backend: prompt in, text out.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, prompt: &str, model: &str) -> Result<String>;
}

/// OpenAI-compatible chat completions client.
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn from_env() -> Result<Self> {
        let base_url = dotenv::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = dotenv::var("LLM_API_KEY")
            .or_else(|_| dotenv::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.is_empty());
        let timeout_secs = dotenv::var("LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(120);

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    /// Non-streaming chat completion.
    pub async fn chat(&self, messages: &[Message], model: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.context("LLM request failed")?;
        let status = resp.status();
        let text = resp.text().await.context("Failed to read LLM response")?;
        let json: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse LLM JSON")?;

        if let Some(err) = json.get("error") {
            bail!("LLM API error ({}): {}", status, err);
        }
        if !status.is_success() {
            bail!("LLM API returned {}: {}", status, text);
        }

        // choices[0].message.content may be null
        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .unwrap_or("")
            .to_string();

        Ok(content)
    }
}

#[async_trait]
impl Completion for LlmClient {
    async fn complete(&self, prompt: &str, model: &str) -> Result<String> {
        let messages = [Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        }];
        self.chat(&messages, model).await
    }
}

/// The call surface used by the agent nodes: a backend plus the optional response cache.
pub struct CachedLlm {
    backend: Arc<dyn Completion>,
    cache: Option<LlmCache>,
    model: String,
    sub_model: String,
}

impl CachedLlm {
    pub fn new(
        backend: Arc<dyn Completion>,
        cache: Option<LlmCache>,
        model: impl Into<String>,
        sub_model: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            cache,
            model: model.into(),
            sub_model: sub_model.into(),
        }
    }

    #[cfg(test)]
    pub fn uncached(backend: Arc<dyn Completion>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self::new(backend, None, model.clone(), model)
    }

    pub fn sub_model(&self) -> &str {
        &self.sub_model
    }

    /// Call with the primary model.
    pub async fn call(&self, prompt: &str, use_cache: bool) -> Result<String> {
        self.call_model(prompt, use_cache, &self.model).await
    }

    pub async fn call_model(&self, prompt: &str, use_cache: bool, model: &str) -> Result<String> {
        debug!(model, prompt_len = prompt.len(), use_cache, "─── LLM Prompt ───");
        for line in prompt.lines() {
            debug!("  │ {}", line);
        }

        let cache = self.cache.as_ref().filter(|_| use_cache);
        if let Some(cache) = cache {
            match cache.get(model, prompt).await {
                Ok(Some(hit)) => {
                    info!(model, "LLM cache hit");
                    return Ok(hit);
                }
                Ok(None) => {}
                Err(e) => warn!("LLM cache read failed: {:#}", e),
            }
        }

        let response = self.backend.complete(prompt, model).await?;

        debug!(model, response_len = response.len(), "─── LLM Response ───");
        for line in response.lines() {
            debug!("  │ {}", line);
        }

        if let Some(cache) = cache {
            if let Err(e) = cache.put(model, prompt, &response).await {
                warn!("Failed to save LLM cache entry: {:#}", e);
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedModel;

    #[test]
    fn test_endpoint_resolution() {
        let mut client = LlmClient {
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com/v1/".into(),
            api_key: None,
        };
        assert_eq!(client.endpoint(), "https://api.openai.com/v1/chat/completions");
        client.base_url = "http://localhost:1234".into();
        assert_eq!(client.endpoint(), "http://localhost:1234/v1/chat/completions");
        client.base_url = "http://h/v1/chat/completions".into();
        assert_eq!(client.endpoint(), "http://h/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_same_prompt_and_model_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedModel::new(["first", "second", "third"]));
        let cache = LlmCache::open(dir.path()).await.unwrap();
        let llm = CachedLlm::new(model.clone(), Some(cache), "m1", "m2");

        assert_eq!(llm.call("prompt", true).await.unwrap(), "first");
        assert_eq!(llm.call("prompt", true).await.unwrap(), "first");
        assert_eq!(model.calls(), 1);

        assert_eq!(llm.call_model("prompt", true, "m2").await.unwrap(), "second");
        assert_eq!(model.calls(), 2);

        assert_eq!(llm.call("prompt", false).await.unwrap(), "third");
        assert_eq!(model.calls(), 3);
    }
}
