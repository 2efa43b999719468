//! Query pipeline: free text -> resolved feature -> query spec -> scalar
//!
//! Two entry points share the translator and aggregator:
//! - `answer`: fuzzy resolution through the `FeatureResolver`
//! - `answer_concept`: strict name/synonym lookup in the concept graph
//!
//! The paths are never merged; callers choose one.

use crate::aggregator::{AggregationResult, Aggregator};
use crate::concept_graph::{ConceptGraph, GraphStore};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::execution::ColumnarEngine;
use crate::resolver::{FeatureResolver, MatchMode, ResolvedFeature, DEFAULT_THRESHOLD};
use crate::schema::SchemaCatalog;
use crate::translator::{translate, translate_concept};
use serde::Serialize;
use tracing::info;

/// How the answered feature was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMode {
    Embedding,
    Keyword,
    Concept,
}

impl From<MatchMode> for ResolutionMode {
    fn from(mode: MatchMode) -> Self {
        match mode {
            MatchMode::Embedding => ResolutionMode::Embedding,
            MatchMode::Keyword => ResolutionMode::Keyword,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub result: AggregationResult,
    /// Every candidate considered, best first. The first one was executed.
    /// Concept hits are exact matches and carry score 1.0.
    pub candidates: Vec<ResolvedFeature>,
    pub mode: ResolutionMode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Answered(Answer),
    NoMatch { query: String },
}

impl QueryOutcome {
    pub fn answer(&self) -> Option<&Answer> {
        match self {
            QueryOutcome::Answered(answer) => Some(answer),
            QueryOutcome::NoMatch { .. } => None,
        }
    }
}

pub struct QueryPipeline<E: ColumnarEngine> {
    resolver: FeatureResolver,
    aggregator: Aggregator<E>,
    threshold: f32,
}

impl<E: ColumnarEngine> QueryPipeline<E> {
    /// Configure a resolver over `catalog` and an aggregator over `engine`.
    pub fn new(catalog: &SchemaCatalog, embedder: Option<Box<dyn Embedder>>, engine: E) -> Result<Self> {
        let mut resolver = FeatureResolver::new(embedder);
        resolver.configure(catalog.features())?;
        Ok(Self {
            resolver,
            aggregator: Aggregator::new(engine, catalog),
            threshold: DEFAULT_THRESHOLD,
        })
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_key_column(mut self, key_column: impl Into<String>) -> Result<Self> {
        self.aggregator = self.aggregator.with_key_column(key_column)?;
        Ok(self)
    }

    pub fn resolver(&self) -> &FeatureResolver {
        &self.resolver
    }

    pub fn aggregator(&self) -> &Aggregator<E> {
        &self.aggregator
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn answer(&self, query: &str, hex_ids: Option<Vec<String>>) -> Result<QueryOutcome> {
        let candidates = self.resolver.resolve(query, self.threshold)?;
        let Some(best) = candidates.first() else {
            info!("No feature matched '{}'", query);
            return Ok(QueryOutcome::NoMatch {
                query: query.to_string(),
            });
        };

        let result = self.aggregator.execute(&translate(best, hex_ids))?;
        Ok(QueryOutcome::Answered(Answer {
            result,
            mode: self.resolver.mode().into(),
            candidates,
        }))
    }

    pub fn answer_concept<S: GraphStore>(
        &self,
        graph: &ConceptGraph<S>,
        name: &str,
        hex_ids: Option<Vec<String>>,
    ) -> Result<QueryOutcome> {
        let hits = graph.resolve_concept(name)?;
        let Some(first) = hits.first() else {
            info!("No concept named '{}'", name);
            return Ok(QueryOutcome::NoMatch {
                query: name.to_string(),
            });
        };

        let result = self.aggregator.execute(&translate_concept(first, hex_ids))?;
        let candidates = hits
            .iter()
            .map(|hit| ResolvedFeature {
                feature_id: hit.feature_id.clone(),
                score: 1.0,
                source: hit.source.clone(),
                aggregation: hit.aggregation,
            })
            .collect();
        Ok(QueryOutcome::Answered(Answer {
            result,
            candidates,
            mode: ResolutionMode::Concept,
        }))
    }
}
