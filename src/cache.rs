use std::path::Path;

use anyhow::{Context, Result};
use cnidarium::{StateDelta, StateRead, StateWrite, Storage};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// No trailing slash (cnidarium prefix convention).
const CACHE_PREFIX: &str = "llm";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheRecord {
    model: String,
    response: String,
    cached_at: i64,
}

/// Persistent prompt → response cache, keyed by model and prompt text.
pub struct LlmCache {
    storage: Storage,
}

/// The model name is length-prefixed so `(m, p)` pairs can never collide by concatenation.
fn cache_key(model: &str, prompt: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(model.len() as u64).to_le_bytes());
    hasher.update(model.as_bytes());
    hasher.update(prompt.as_bytes());
    format!("{}/{}", CACHE_PREFIX, hasher.finalize().to_hex())
}

impl LlmCache {
    pub async fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create cache dir {}", data_dir.display()))?;
        let storage = Storage::load(data_dir.to_path_buf(), vec![CACHE_PREFIX.to_string()])
            .await
            .context("Failed to init cnidarium storage")?;
        Ok(Self { storage })
    }

    pub async fn get(&self, model: &str, prompt: &str) -> Result<Option<String>> {
        let snapshot = self.storage.latest_snapshot();
        let Some(bytes) = snapshot.get_raw(&cache_key(model, prompt)).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<CacheRecord>(&bytes) {
            Ok(record) if record.model == model => Ok(Some(record.response)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!("Ignoring corrupt cache record: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn put(&self, model: &str, prompt: &str, response: &str) -> Result<()> {
        let record = CacheRecord {
            model: model.to_string(),
            response: response.to_string(),
            cached_at: chrono::Utc::now().timestamp(),
        };
        let mut delta = StateDelta::new(self.storage.latest_snapshot());
        delta.put_raw(
            cache_key(model, prompt),
            serde_json::to_vec(&record).context("serialize cache record")?,
        );
        self.storage.commit(delta).await?;
        debug!(model, prompt_len = prompt.len(), "response cached");
        Ok(())
    }

    /// Remove every cached response. Returns how many were dropped.
    pub async fn clear(&self) -> Result<usize> {
        let snapshot = self.storage.latest_snapshot();
        let mut stream = snapshot.prefix_raw(CACHE_PREFIX);
        let mut keys = Vec::new();
        while let Some(entry) = stream.next().await {
            match entry {
                Ok((key, _)) => keys.push(key),
                Err(e) => warn!("Error reading cache stream: {}", e),
            }
        }
        drop(stream);

        let mut delta = StateDelta::new(self.storage.latest_snapshot());
        for key in &keys {
            delta.delete(key.clone());
        }
        self.storage.commit(delta).await?;
        debug!(count = keys.len(), "cache cleared");
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_depends_on_model_and_prompt() {
        assert_eq!(cache_key("m", "p"), cache_key("m", "p"));
        assert_ne!(cache_key("m1", "p"), cache_key("m2", "p"));
        assert_ne!(cache_key("ab", "c"), cache_key("a", "bc"));
        assert!(cache_key("m", "p").starts_with("llm/"));
    }

    #[tokio::test]
    async fn test_put_get_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LlmCache::open(dir.path()).await.unwrap();
        assert_eq!(cache.get("m", "hello").await.unwrap(), None);

        cache.put("m", "hello", "world").await.unwrap();
        cache.put("m", "other", "x").await.unwrap();
        assert_eq!(cache.get("m", "hello").await.unwrap().as_deref(), Some("world"));
        assert_eq!(cache.get("n", "hello").await.unwrap(), None);

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert_eq!(cache.get("m", "hello").await.unwrap(), None);
    }
}
