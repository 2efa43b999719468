//! Embedding capability
//!
//! Text -> fixed-size vector, plus the cosine similarity operator used to compare
//! vectors. Two providers ship with the crate:
//! - `TokenHashEmbedder`: deterministic signed token hashing, no model required
//! - `HttpEmbedder`: OpenAI-compatible `/embeddings` endpoint
//!
//! The capability is optional everywhere it is consumed. Callers hold an
//! `Option<Box<dyn Embedder>>` and fall back to keyword matching when it is absent.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Vector embedding (simple f32 vector)
pub type Embedding = Vec<f32>;

pub trait Embedder: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed several texts. Providers that support batching override this.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Compute cosine similarity between two vectors.
///
/// Mismatched dimensions and zero vectors score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

pub const TOKEN_HASH_DIM: usize = 256;

/// Deterministic bag-of-tokens embedder.
///
/// Each lower-cased alphanumeric token is hashed (FNV-1a 64) into one of
/// `dimension` buckets with a hash-derived sign; the result is L2-normalised.
/// Texts sharing tokens score high, unrelated texts score near zero.
#[derive(Debug, Clone)]
pub struct TokenHashEmbedder {
    dimension: usize,
}

impl TokenHashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl Default for TokenHashEmbedder {
    fn default() -> Self {
        Self::new(TOKEN_HASH_DIM)
    }
}

fn fnv1a64(s: &str) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x00000100000001b3);
    }
    h
}

/// Lower-cased alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

impl Embedder for TokenHashEmbedder {
    fn name(&self) -> &str {
        "token-hash"
    }

    fn embed(&self, text: &str) -> Result<Embedding> {
        let mut v = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let h = fnv1a64(&token);
            let idx = (h % self.dimension as u64) as usize;
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Parse an OpenAI-style embeddings response, ordering vectors by `index`.
pub fn parse_embedding_response(body: &str, expected: usize) -> Result<Vec<Embedding>> {
    let mut response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| PipelineError::Embedding(format!("Failed to parse embedding response: {}", e)))?;

    if response.data.len() != expected {
        return Err(PipelineError::Embedding(format!(
            "Embedding response has {} vectors, expected {}",
            response.data.len(),
            expected
        )));
    }

    if response.data.iter().all(|d| d.index.is_some()) {
        response.data.sort_by_key(|d| d.index);
    }
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

/// Embedding client for OpenAI-compatible APIs.
pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    model: String, // e.g., "text-embedding-3-small"
}

impl HttpEmbedder {
    pub fn new(api_key: String, base_url: String, model: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PipelineError::Embedding(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

impl Embedder for HttpEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn embed(&self, text: &str) -> Result<Embedding> {
        let mut vectors = self.embed_batch(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| PipelineError::Embedding("No embedding data in response".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Requesting {} embeddings from {}", texts.len(), self.base_url);

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .map_err(|e| PipelineError::Embedding(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| PipelineError::Embedding(format!("Failed to read embedding response: {}", e)))?;
        if !status.is_success() {
            return Err(PipelineError::Embedding(format!(
                "Embedding API error ({}): {}",
                status, body
            )));
        }

        parse_embedding_response(&body, texts.len())
    }
}
