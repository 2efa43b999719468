//! Learned edges - discover concept -> feature links by semantic similarity
//!
//! Every (concept, feature) pair is scored by the cosine similarity of their
//! embeddings; pairs above the threshold become candidate `MAPS_TO` edges that
//! `ConceptGraph::apply_learned_edges` can insert.

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::Result;
use crate::schema::{ConceptDefinition, FeatureDefinition};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_EDGE_THRESHOLD: f32 = 0.4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedEdge {
    pub concept_id: String,
    pub feature_id: String,
    pub score: f32,
}

/// Score all concept/feature pairs and keep those strictly above `threshold`,
/// best first (ties in concept-then-feature order).
///
/// Without an embedding capability nothing can be learned and the result is empty.
pub fn learn_edges(
    concepts: &[ConceptDefinition],
    features: &[FeatureDefinition],
    embedder: Option<&dyn Embedder>,
    threshold: f32,
) -> Result<Vec<LearnedEdge>> {
    let Some(embedder) = embedder else {
        warn!("No embedding capability available, skipping edge learning");
        return Ok(Vec::new());
    };
    if concepts.is_empty() || features.is_empty() {
        return Ok(Vec::new());
    }

    let concept_texts: Vec<String> = concepts.iter().map(|c| c.to_embedding_text()).collect();
    let feature_texts: Vec<String> = features.iter().map(|f| f.to_embedding_text()).collect();
    let concept_embeddings = embedder.embed_batch(&concept_texts)?;
    let feature_embeddings = embedder.embed_batch(&feature_texts)?;

    let mut edges = Vec::new();
    for (concept, concept_embedding) in concepts.iter().zip(&concept_embeddings) {
        for (feature, feature_embedding) in features.iter().zip(&feature_embeddings) {
            let score = cosine_similarity(concept_embedding, feature_embedding);
            if score > threshold {
                edges.push(LearnedEdge {
                    concept_id: concept.id.clone(),
                    feature_id: feature.id.clone(),
                    score,
                });
            }
        }
    }

    edges.sort_by(|a, b| b.score.total_cmp(&a.score));
    info!(
        "Learned {} edge(s) from {} concepts x {} features (threshold {})",
        edges.len(),
        concepts.len(),
        features.len(),
        threshold
    );
    Ok(edges)
}
