//! Text embedding backends used by deduplication.
//!
//! The dedup engine only needs "text in, fixed-length vector out"; it never
//! cares which model produced the vector. Two backends ship:
//!
//! - [`OpenAiEmbedder`]: POSTs to an OpenAI-compatible `/embeddings` endpoint
//! - [`HashEmbedder`]: FNV-1a feature hashing of word tokens, L2-normalized.
//!   Deterministic, offline, good enough to catch reworded wire copy.

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{ConfigError, EmbeddingError};
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// A fixed-length embedding vector.
pub type Embedding = Vec<f32>;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the model, e.g. `"fnv-hash-384"`.
    fn id(&self) -> &str;

    /// Embed one text. Fails with [`EmbeddingError::Unavailable`] on outage.
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;
}

/// Build the configured backend.
pub fn build_embedder(
    config: &EmbeddingConfig,
    client: Client,
) -> Result<Arc<dyn Embedder>, ConfigError> {
    match config.backend {
        EmbeddingBackend::Hash => Ok(Arc::new(HashEmbedder::new(config.dimension))),
        EmbeddingBackend::OpenAi => {
            let api_key = config.resolved_api_key().ok_or_else(|| {
                ConfigError::Invalid(
                    "embedding.backend is openai but no api_key or OPENAI_API_KEY is set".into(),
                )
            })?;
            Ok(Arc::new(OpenAiEmbedder::new(
                client,
                &config.base_url,
                &config.model,
                api_key,
            )))
        }
    }
}

/// L2-normalize in place. Zero vectors are left as they are.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm_sq: f32 = vec.iter().map(|x| x * x).sum();
    if norm_sq < f32::EPSILON {
        return;
    }
    let inv_norm = 1.0 / norm_sq.sqrt();
    vec.iter_mut().for_each(|x| *x *= inv_norm);
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

/// Bag-of-words embedder using the hashing trick.
///
/// Each lowercase alphanumeric token is hashed into one of `dimension`
/// buckets with a sign taken from a high hash bit, so unrelated tokens that
/// collide tend to cancel instead of inflating similarity.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    id: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            id: format!("fnv-hash-{dimension}"),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Embedding {
        let mut vec = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        }
        l2_normalize(&mut vec);
        vec
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        Ok(self.embed_sync(text))
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible embeddings API.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    url: String,
    model: String,
    api_key: String,
}

impl OpenAiEmbedder {
    pub fn new(client: Client, base_url: &str, model: &str, api_key: String) -> Self {
        Self {
            client,
            url: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
        }
    }
}

/// Pull the first vector out of an embeddings response body.
fn parse_embedding(body: &str) -> Result<Embedding, EmbeddingError> {
    let parsed: EmbeddingResponse = serde_json::from_str(body).map_err(|e| {
        EmbeddingError::Unavailable(format!(
            "undecodable embeddings response ({e}): {}",
            truncate_for_log(body, 200)
        ))
    })?;
    parsed
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| EmbeddingError::Unavailable("embeddings response had no vector".into()))
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn id(&self) -> &str {
        &self.model
    }

    #[instrument(level = "debug", skip_all, fields(model = %self.model, chars = text.len()))]
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), body = %truncate_for_log(&body, 200), "Embedding request failed");
            return Err(EmbeddingError::Unavailable(format!("HTTP {status}")));
        }

        let vec = parse_embedding(&body)?;
        debug!(dimension = vec.len(), "Embedded text");
        Ok(vec)
    }
}
