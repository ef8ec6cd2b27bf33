//! Text → vector embedding clients.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::utils::truncate_chars;

/// Longest input accepted by the embeddings endpoint, in characters.
pub const MAX_EMBEDDING_INPUT_CHARS: usize = 8191;

/// Anything that can turn text into a fixed-size vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(api_key: &str, base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing embedding model name");

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let prepared = text.replace('\n', " ");
        let input = truncate_chars(&prepared, MAX_EMBEDDING_INPUT_CHARS);
        let request = EmbeddingRequest {
            model: &self.model,
            input,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .context("failed to call OpenAI embeddings")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("OpenAI embeddings request failed ({}): {}", status, body);
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .context("failed to parse OpenAI embedding response")?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .context("OpenAI returned no embeddings")
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Memoizes embeddings by exact text and never fails: provider errors
/// (or a missing provider) yield a zero vector of the configured dimension.
///
/// The memo table is unbounded; failed lookups are not cached.
pub struct CachedEmbedder {
    inner: Option<Box<dyn Embedder>>,
    dimension: usize,
    cache: Mutex<FxHashMap<String, Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Option<Box<dyn Embedder>>, dimension: usize) -> Self {
        CachedEmbedder {
            inner,
            dimension,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    #[cfg(test)]
    pub fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }

    pub async fn get_embedding(&self, text: &str) -> Vec<f32> {
        let cached = self.cache.lock().get(text).cloned();
        if let Some(hit) = cached {
            debug!("embedding cache hit");
            return hit;
        }

        let Some(inner) = self.inner.as_ref() else {
            error!("Failed to get embedding: OPENAI_API_KEY is not configured");
            return vec![0.0; self.dimension];
        };

        match inner.embed(text).await {
            Ok(embedding) => {
                self.cache
                    .lock()
                    .insert(text.to_string(), embedding.clone());
                embedding
            }
            Err(err) => {
                error!("Failed to get embedding: {:#}", err);
                vec![0.0; self.dimension]
            }
        }
    }
}
