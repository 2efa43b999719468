//! Query Translator - resolved features to aggregation requests

use crate::concept_graph::ConceptFeature;
use crate::error::Result;
use crate::resolver::ResolvedFeature;
use crate::schema::AggregationRule;
use serde::{Deserialize, Serialize};

/// Specification for a single-feature, single-aggregation data query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub feature_id: String,
    pub source_file: String,
    pub aggregation: AggregationRule,
    /// Hex cells to restrict rows to; `None` means all rows.
    #[serde(default)]
    pub hex_ids: Option<Vec<String>>,
}

impl QuerySpec {
    /// Build a spec from untyped parts, rejecting aggregation text outside the
    /// allow-list with a configuration error.
    pub fn from_parts(
        feature_id: &str,
        source_file: &str,
        aggregation: &str,
        hex_ids: Option<Vec<String>>,
    ) -> Result<Self> {
        Ok(Self {
            feature_id: feature_id.to_string(),
            source_file: source_file.to_string(),
            aggregation: aggregation.parse()?,
            hex_ids: normalize_hex_ids(hex_ids),
        })
    }
}

/// An empty filter list means "no filter".
fn normalize_hex_ids(hex_ids: Option<Vec<String>>) -> Option<Vec<String>> {
    hex_ids.filter(|ids| !ids.is_empty())
}

/// Structural copy of a resolver candidate into a query spec.
pub fn translate(resolved: &ResolvedFeature, hex_ids: Option<Vec<String>>) -> QuerySpec {
    QuerySpec {
        feature_id: resolved.feature_id.clone(),
        source_file: resolved.source.clone(),
        aggregation: resolved.aggregation,
        hex_ids: normalize_hex_ids(hex_ids),
    }
}

/// Same as `translate`, for a hit from the concept graph.
pub fn translate_concept(hit: &ConceptFeature, hex_ids: Option<Vec<String>>) -> QuerySpec {
    QuerySpec {
        feature_id: hit.feature_id.clone(),
        source_file: hit.source.clone(),
        aggregation: hit.aggregation,
        hex_ids: normalize_hex_ids(hex_ids),
    }
}
