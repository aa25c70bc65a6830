// crates/muninn-server/src/embedder/remote.rs
// Remote embeddings API client (OpenAI-style)

use super::normalize;
use crate::config::redact_api_keys;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Max characters to embed (truncate longer text)
const MAX_TEXT_CHARS: usize = 8000;

/// Max batch size per request
const MAX_BATCH_SIZE: usize = 100;

/// API endpoint
const API_URL: &str = "https://api.openai.com/v1/embeddings";

/// Model served by the remote API
const MODEL: &str = "text-embedding-3-small";

/// Dimensions for text-embedding-3-small
const DIMENSIONS: usize = 1536;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Remote embeddings client.
pub struct RemoteEmbedder {
    api_key: String,
    client: reqwest::Client,
}

impl RemoteEmbedder {
    pub fn new(api_key: String, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self { api_key, client }
    }

    pub fn dimensions(&self) -> usize {
        DIMENSIONS
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
                let mut end = t.len().min(MAX_TEXT_CHARS);
                while !t.is_char_boundary(end) {
                    end -= 1;
                }
                &t[..end]
            })
            .collect();

        let response = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": MODEL,
                "input": inputs,
            }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("{}", redact_api_keys(&e.to_string())))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "embedding API returned {}: {}",
                status,
                redact_api_keys(&crate::utils::truncate(&body, 200))
            );
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("malformed embedding response")?;

        let mut vectors: Vec<Vec<f32>> =
            parsed.data.into_iter().map(|d| d.embedding).collect();
        for v in &mut vectors {
            normalize(v);
        }
        Ok(vectors)
    }
}
