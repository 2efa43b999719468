//! Feature Resolver - Maps natural language queries to catalogued features
//!
//! Scoring is delegated to a `Matcher` chosen once at construction:
//! - `EmbeddingMatcher`: cosine similarity between the query and cached
//!   `name + description` embeddings
//! - `KeywordMatcher`: degraded mode used when no embedding capability exists;
//!   every hit gets the fixed score `KEYWORD_MATCH_SCORE`
//!
//! The resolver keeps candidates strictly above the threshold and orders them by
//! score descending, ties in catalog order.

use crate::embedding::{cosine_similarity, Embedder, Embedding};
use crate::error::Result;
use crate::schema::{AggregationRule, FeatureDefinition};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info};

/// Default minimum similarity for a candidate to be kept (exclusive).
pub const DEFAULT_THRESHOLD: f32 = 0.4;

/// Score assigned to every keyword fallback hit. Carries no ranking signal.
pub const KEYWORD_MATCH_SCORE: f32 = 0.5;

/// Result of resolving a user query to a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedFeature {
    pub feature_id: String,
    pub score: f32,
    pub source: String,
    pub aggregation: AggregationRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    Embedding,
    Keyword,
}

/// Score for the feature at `position` in the configured catalog.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub position: usize,
    pub score: f32,
}

/// Matching capability behind the resolver.
pub trait Matcher: Send + Sync {
    fn mode(&self) -> MatchMode;

    /// Rebuild the index for `features`. Replaces any previous index.
    fn index(&mut self, features: &[FeatureDefinition]) -> Result<()>;

    /// Score the query against every indexed feature it matches at all.
    fn score(&self, query: &str) -> Result<Vec<Candidate>>;
}

/// Semantic matcher over cached feature embeddings.
pub struct EmbeddingMatcher {
    embedder: Box<dyn Embedder>,
    embeddings: Vec<Embedding>,
}

impl EmbeddingMatcher {
    pub fn new(embedder: Box<dyn Embedder>) -> Self {
        Self {
            embedder,
            embeddings: Vec::new(),
        }
    }
}

impl Matcher for EmbeddingMatcher {
    fn mode(&self) -> MatchMode {
        MatchMode::Embedding
    }

    fn index(&mut self, features: &[FeatureDefinition]) -> Result<()> {
        let texts: Vec<String> = features.iter().map(|f| f.to_embedding_text()).collect();
        self.embeddings = self.embedder.embed_batch(&texts)?;
        info!(
            "Embedded {} features with {}",
            self.embeddings.len(),
            self.embedder.name()
        );
        Ok(())
    }

    fn score(&self, query: &str) -> Result<Vec<Candidate>> {
        if self.embeddings.is_empty() {
            return Ok(Vec::new());
        }
        // Blank queries carry no information; score everything zero.
        if query.trim().is_empty() {
            return Ok((0..self.embeddings.len())
                .map(|position| Candidate { position, score: 0.0 })
                .collect());
        }

        let query_embedding = self.embedder.embed(query)?;
        Ok(self
            .embeddings
            .iter()
            .enumerate()
            .map(|(position, embedding)| Candidate {
                position,
                score: cosine_similarity(&query_embedding, embedding),
            })
            .collect())
    }
}

/// Keyword fallback: a feature matches when any token of its display name
/// occurs as a substring of the lower-cased query.
#[derive(Debug, Default)]
pub struct KeywordMatcher {
    name_tokens: Vec<Vec<String>>,
}

impl KeywordMatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Matcher for KeywordMatcher {
    fn mode(&self) -> MatchMode {
        MatchMode::Keyword
    }

    fn index(&mut self, features: &[FeatureDefinition]) -> Result<()> {
        self.name_tokens = features
            .iter()
            .map(|f| {
                f.name
                    .to_lowercase()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect()
            })
            .collect();
        Ok(())
    }

    fn score(&self, query: &str) -> Result<Vec<Candidate>> {
        let query_lower = query.to_lowercase();
        Ok(self
            .name_tokens
            .iter()
            .enumerate()
            .filter(|(_, tokens)| tokens.iter().any(|t| query_lower.contains(t.as_str())))
            .map(|(position, _)| Candidate {
                position,
                score: KEYWORD_MATCH_SCORE,
            })
            .collect())
    }
}

/// Resolves natural language queries to database features.
pub struct FeatureResolver {
    features: Vec<FeatureDefinition>,
    matcher: Box<dyn Matcher>,
}

impl FeatureResolver {
    /// Semantic matching when an embedder is available, keyword matching otherwise.
    pub fn new(embedder: Option<Box<dyn Embedder>>) -> Self {
        let matcher: Box<dyn Matcher> = match embedder {
            Some(embedder) => Box::new(EmbeddingMatcher::new(embedder)),
            None => {
                info!("No embedding capability available, using keyword matching");
                Box::new(KeywordMatcher::new())
            }
        };
        Self::with_matcher(matcher)
    }

    pub fn with_matcher(matcher: Box<dyn Matcher>) -> Self {
        Self {
            features: Vec::new(),
            matcher,
        }
    }

    pub fn mode(&self) -> MatchMode {
        self.matcher.mode()
    }

    pub fn features(&self) -> &[FeatureDefinition] {
        &self.features
    }

    /// Load feature definitions and rebuild the matcher index.
    pub fn configure(&mut self, features: &[FeatureDefinition]) -> Result<()> {
        self.matcher.index(features)?;
        self.features = features.to_vec();
        debug!(
            "Resolver configured with {} features ({:?} mode)",
            self.features.len(),
            self.mode()
        );
        Ok(())
    }

    /// Candidates scoring strictly above `threshold`, best first.
    pub fn resolve(&self, query: &str, threshold: f32) -> Result<Vec<ResolvedFeature>> {
        if self.features.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<Candidate> = self
            .matcher
            .score(query)?
            .into_iter()
            .filter(|c| c.score > threshold && c.position < self.features.len())
            .collect();

        candidates.sort_by(|a, b| match b.score.total_cmp(&a.score) {
            Ordering::Equal => a.position.cmp(&b.position),
            other => other,
        });

        let resolved: Vec<ResolvedFeature> = candidates
            .into_iter()
            .map(|c| {
                let feature = &self.features[c.position];
                ResolvedFeature {
                    feature_id: feature.id.clone(),
                    score: c.score,
                    source: feature.source.clone(),
                    aggregation: feature.aggregation,
                }
            })
            .collect();

        debug!(
            "Resolved '{}' to {} candidate(s) above {}",
            query,
            resolved.len(),
            threshold
        );
        Ok(resolved)
    }

    pub fn resolve_default(&self, query: &str) -> Result<Vec<ResolvedFeature>> {
        self.resolve(query, DEFAULT_THRESHOLD)
    }
}
