// crates/muninn-server/src/embedder/local.rs
// Local embedding model served over an OpenAI-compatible /v1/embeddings
// endpoint (no auth). The model loads lazily on the server side; the first
// request may be slow.

use super::normalize;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Character cap for local model inputs (token window guard)
const MAX_TEXT_CHARS: usize = 512;

/// Max texts per batch request
const MAX_BATCH_SIZE: usize = 64;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Local embeddings client.
pub struct LocalEmbedder {
    base_url: String,
    model: String,
    dimensions: usize,
    client: reqwest::Client,
}

impl LocalEmbedder {
    pub fn new(base_url: String, config: &crate::config::EmbeddingsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.local_model.clone(),
            dimensions: config.dimensions,
            client,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Probe the server root; a connection failure means unavailable.
    pub async fn is_available(&self) -> bool {
        self.client
            .get(&self.base_url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .is_ok()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut results = self.embed_texts(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response"))
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH_SIZE) {
            all.extend(self.embed_texts(chunk).await?);
        }
        Ok(all)
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<&str> = texts
            .iter()
            .map(|t| {
                if t.len() > MAX_TEXT_CHARS {
                    debug!("Truncating text from {} to {} chars", t.len(), MAX_TEXT_CHARS);
                    truncate_at_boundary(t, MAX_TEXT_CHARS)
                } else {
                    t.as_str()
                }
            })
            .collect();

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "input": inputs,
            }))
            .send()
            .await
            .context("local embedding request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("local embedding server returned {}", response.status());
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("malformed embedding response")?;

        let mut vectors: Vec<Vec<f32>> =
            parsed.data.into_iter().map(|d| d.embedding).collect();
        if vectors.len() != texts.len() {
            anyhow::bail!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                vectors.len()
            );
        }
        for v in &mut vectors {
            if v.len() != self.dimensions {
                anyhow::bail!(
                    "dimension mismatch: expected {}, got {}",
                    self.dimensions,
                    v.len()
                );
            }
            normalize(v);
        }
        Ok(vectors)
    }
}

/// Truncate at a char boundary at or below `max`.
fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_at_boundary() {
        assert_eq!(truncate_at_boundary("hello", 10), "hello");
        assert_eq!(truncate_at_boundary("hello", 3), "hel");
        // multibyte: é is 2 bytes, boundary at 1 must back off
        assert_eq!(truncate_at_boundary("é", 1), "");
    }
}
