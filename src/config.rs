//! Application configuration from the environment (and `.env`).

use crate::aggregator::DEFAULT_KEY_COLUMN;
use crate::embedding::{Embedder, HttpEmbedder, TokenHashEmbedder, TOKEN_HASH_DIM};
use crate::error::{PipelineError, Result};
use crate::resolver::DEFAULT_THRESHOLD;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

pub const DEFAULT_SCHEMA_PATH: &str = "schema.json";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_BASE_URL: &str = "https://api.openai.com/v1";

/// Which embedding capability the resolver gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// No embeddings; the resolver falls back to keyword matching.
    None,
    TokenHash,
    Http,
}

impl FromStr for EmbeddingBackend {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" | "keyword" => Ok(EmbeddingBackend::None),
            "token-hash" | "token_hash" => Ok(EmbeddingBackend::TokenHash),
            "http" | "openai" => Ok(EmbeddingBackend::Http),
            other => Err(PipelineError::Configuration(format!(
                "Unknown embedding backend '{}' (expected none, token-hash or http)",
                other
            ))),
        }
    }
}

impl fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EmbeddingBackend::None => "none",
            EmbeddingBackend::TokenHash => "token-hash",
            EmbeddingBackend::Http => "http",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub schema_path: PathBuf,
    pub data_dir: PathBuf,
    pub threshold: f32,
    pub hex_key_column: String,
    /// JSON snapshot backing the concept graph; in-memory only when unset.
    pub graph_snapshot: Option<PathBuf>,
    pub embedding_backend: EmbeddingBackend,
    pub embedding_model: String,
    pub embedding_base_url: String,
    pub api_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_path: PathBuf::from(DEFAULT_SCHEMA_PATH),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            threshold: DEFAULT_THRESHOLD,
            hex_key_column: DEFAULT_KEY_COLUMN.to_string(),
            graph_snapshot: None,
            embedding_backend: EmbeddingBackend::None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_base_url: DEFAULT_EMBEDDING_BASE_URL.to_string(),
            api_key: None,
        }
    }
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let threshold = match get("DCG_THRESHOLD") {
            Some(raw) => parse_threshold(&raw)?,
            None => defaults.threshold,
        };
        let embedding_backend = match get("DCG_EMBEDDING_BACKEND") {
            Some(raw) => raw.parse()?,
            None => defaults.embedding_backend,
        };

        Ok(Self {
            schema_path: get("DCG_SCHEMA_PATH").map(PathBuf::from).unwrap_or(defaults.schema_path),
            data_dir: get("DCG_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            threshold,
            hex_key_column: get("DCG_HEX_KEY_COLUMN").unwrap_or(defaults.hex_key_column),
            graph_snapshot: get("DCG_GRAPH_SNAPSHOT").map(PathBuf::from),
            embedding_backend,
            embedding_model: get("DCG_EMBEDDING_MODEL")
                .or_else(|| get("OPENAI_EMBEDDING_MODEL"))
                .unwrap_or(defaults.embedding_model),
            embedding_base_url: get("DCG_EMBEDDING_BASE_URL")
                .or_else(|| get("OPENAI_BASE_URL"))
                .unwrap_or(defaults.embedding_base_url),
            api_key: get("OPENAI_API_KEY"),
        })
    }

    /// The embedding capability for `embedding_backend`, if any.
    pub fn build_embedder(&self) -> Result<Option<Box<dyn Embedder>>> {
        info!("Embedding backend: {}", self.embedding_backend);
        match self.embedding_backend {
            EmbeddingBackend::None => Ok(None),
            EmbeddingBackend::TokenHash => Ok(Some(Box::new(TokenHashEmbedder::new(TOKEN_HASH_DIM)))),
            EmbeddingBackend::Http => {
                let api_key = self.api_key.clone().ok_or_else(|| {
                    PipelineError::Configuration(
                        "OPENAI_API_KEY is required for the http embedding backend".to_string(),
                    )
                })?;
                let embedder = HttpEmbedder::new(
                    api_key,
                    self.embedding_base_url.clone(),
                    self.embedding_model.clone(),
                )?;
                Ok(Some(Box::new(embedder)))
            }
        }
    }
}

pub fn parse_threshold(raw: &str) -> Result<f32> {
    let value: f32 = raw
        .trim()
        .parse()
        .map_err(|_| PipelineError::Configuration(format!("Invalid threshold '{}'", raw)))?;
    if !(-1.0..=1.0).contains(&value) {
        return Err(PipelineError::Configuration(format!(
            "Threshold {} outside [-1, 1]",
            value
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.hex_key_column, "hex_id");
        assert!(cfg.build_embedder().unwrap().is_none());
    }

    #[test]
    fn test_reads_variables() {
        let cfg = config(&[
            ("DCG_SCHEMA_PATH", "conf/schema.json"),
            ("DCG_DATA_DIR", "/srv/hex"),
            ("DCG_THRESHOLD", "0.25"),
            ("DCG_HEX_KEY_COLUMN", "h3_index"),
            ("DCG_GRAPH_SNAPSHOT", "graph.json"),
            ("DCG_EMBEDDING_BACKEND", "Token-Hash"),
        ])
        .unwrap();
        assert_eq!(cfg.schema_path, PathBuf::from("conf/schema.json"));
        assert_eq!(cfg.data_dir, PathBuf::from("/srv/hex"));
        assert_eq!(cfg.threshold, 0.25);
        assert_eq!(cfg.hex_key_column, "h3_index");
        assert_eq!(cfg.graph_snapshot, Some(PathBuf::from("graph.json")));
        assert_eq!(cfg.embedding_backend, EmbeddingBackend::TokenHash);

        let embedder = cfg.build_embedder().unwrap().unwrap();
        assert_eq!(embedder.embed("shelter").unwrap().len(), TOKEN_HASH_DIM);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config(&[("DCG_THRESHOLD", "high")]),
            Err(PipelineError::Configuration(_))
        ));
        assert!(matches!(
            config(&[("DCG_THRESHOLD", "1.5")]),
            Err(PipelineError::Configuration(_))
        ));
        assert!(matches!(
            config(&[("DCG_EMBEDDING_BACKEND", "word2vec")]),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_http_backend_requires_api_key() {
        let cfg = config(&[("DCG_EMBEDDING_BACKEND", "http")]).unwrap();
        assert!(matches!(
            cfg.build_embedder(),
            Err(PipelineError::Configuration(_))
        ));

        let cfg = config(&[
            ("DCG_EMBEDDING_BACKEND", "http"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_BASE_URL", "http://localhost:8080/v1"),
        ])
        .unwrap();
        assert_eq!(cfg.embedding_base_url, "http://localhost:8080/v1");
        assert!(cfg.build_embedder().unwrap().is_some());
    }
}
