// crates/muninn-server/src/embedder/mod.rs
// Embedding provider module
//
// Providers return None on failure; every caller must carry an FTS
// fallback. Dimensions are advertised up front and must stay stable for a
// project's lifetime - a provider change with different dimensions
// requires a vector reindex.

mod local;
mod remote;

pub use local::LocalEmbedder;
pub use remote::RemoteEmbedder;

use crate::config::{ApiKeys, EmbeddingsConfig};
use tracing::info;

/// Backend-specific embedding implementation
enum EmbedderBackend {
    Local(LocalEmbedder),
    Remote(RemoteEmbedder),
}

/// Embedding client with automatic provider selection.
///
/// Priority: remote API (highest quality, requires key) > local model.
pub struct EmbedderClient {
    backend: EmbedderBackend,
}

impl EmbedderClient {
    /// Create from pre-loaded configuration. Returns None when no provider
    /// is configured - retrieval then runs FTS-only.
    pub fn from_config(api_keys: &ApiKeys, config: &EmbeddingsConfig) -> Option<Self> {
        if let Some(api_key) = api_keys.remote.as_ref() {
            info!("Using remote embeddings");
            return Some(Self {
                backend: EmbedderBackend::Remote(RemoteEmbedder::new(
                    api_key.clone(),
                    config.timeout_secs,
                )),
            });
        }

        if let Some(host) = api_keys.local_embed.as_ref() {
            let client = LocalEmbedder::new(host.clone(), config);
            info!(
                model = client.model_name(),
                dimensions = client.dimensions(),
                "Using local embeddings"
            );
            return Some(Self {
                backend: EmbedderBackend::Local(client),
            });
        }

        None
    }

    pub fn provider_id(&self) -> &'static str {
        match &self.backend {
            EmbedderBackend::Local(_) => "local",
            EmbedderBackend::Remote(_) => "remote",
        }
    }

    pub fn dimensions(&self) -> usize {
        match &self.backend {
            EmbedderBackend::Local(c) => c.dimensions(),
            EmbedderBackend::Remote(c) => c.dimensions(),
        }
    }

    /// Whether the provider can currently serve requests.
    pub async fn is_available(&self) -> bool {
        match &self.backend {
            EmbedderBackend::Local(c) => c.is_available().await,
            EmbedderBackend::Remote(_) => true,
        }
    }

    /// Embed one text. None on provider failure.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let result = match &self.backend {
            EmbedderBackend::Local(c) => c.embed(text).await,
            EmbedderBackend::Remote(c) => c.embed(text).await,
        };
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!("embedding failed: {}", e);
                None
            }
        }
    }

    /// Embed many texts. None when the batch fails as a whole.
    pub async fn embed_batch(&self, texts: &[String]) -> Option<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Some(Vec::new());
        }
        let result = match &self.backend {
            EmbedderBackend::Local(c) => c.embed_batch(texts).await,
            EmbedderBackend::Remote(c) => c.embed_batch(texts).await,
        };
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!("batch embedding failed: {}", e);
                None
            }
        }
    }
}

/// Normalize a vector to unit length in place. Zero vectors are left as-is.
pub(crate) fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
