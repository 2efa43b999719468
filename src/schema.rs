//! Schema Catalog - feature and concept definitions
//!
//! Raw records arrive from a schema document (or any other external source) with
//! every field optional. Loading validates them into immutable definitions:
//! - features need `id`, `source` and an `aggregation` from the enumerated set
//! - concepts need `id` and `name`, and may only map to known features
//! - feature ids are unique within a catalog

use crate::error::{PipelineError, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Aggregation rule applied to a feature column.
///
/// This enum is the allow-list: aggregation text from outside the crate is only
/// ever accepted through `FromStr`, never forwarded as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregationRule {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl AggregationRule {
    pub const ALL: [AggregationRule; 5] = [
        AggregationRule::Sum,
        AggregationRule::Avg,
        AggregationRule::Count,
        AggregationRule::Min,
        AggregationRule::Max,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationRule::Sum => "SUM",
            AggregationRule::Avg => "AVG",
            AggregationRule::Count => "COUNT",
            AggregationRule::Min => "MIN",
            AggregationRule::Max => "MAX",
        }
    }
}

impl fmt::Display for AggregationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationRule {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_uppercase();
        AggregationRule::ALL
            .iter()
            .copied()
            .find(|rule| rule.as_str() == normalized)
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "Unknown aggregation '{}' (expected one of SUM, AVG, COUNT, MIN, MAX)",
                    s
                ))
            })
    }
}

/// Feature record as it appears in a schema document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFeatureRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub aggregation: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
}

/// Concept record as it appears in a schema document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawConceptRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub maps_to: Vec<String>,
}

/// Top-level schema document: `{ "features": [...], "concepts": [...] }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDocument {
    #[serde(default)]
    pub features: Vec<RawFeatureRecord>,
    #[serde(default)]
    pub concepts: Vec<RawConceptRecord>,
}

impl SchemaDocument {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Schema(format!("Failed to read schema {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            PipelineError::Schema(format!("Failed to parse schema {}: {}", path.display(), e))
        })
    }
}

/// A named, aggregatable column within an external dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub source: String,
    pub aggregation: AggregationRule,
    pub data_type: String,
}

impl FeatureDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source: impl Into<String>,
        aggregation: AggregationRule,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            source: source.into(),
            aggregation,
            data_type: "unknown".to_string(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Text used for semantic matching: name followed by description.
    pub fn to_embedding_text(&self) -> String {
        format!("{} {}", self.name, self.description)
    }
}

/// A human-facing label that groups one or more features by meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptDefinition {
    pub id: String,
    pub name: String,
    pub synonyms: Vec<String>,
    pub related_feature_ids: Vec<String>,
}

impl ConceptDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            synonyms: Vec::new(),
            related_feature_ids: Vec::new(),
        }
    }

    pub fn with_synonyms<I, T>(mut self, synonyms: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.synonyms = dedupe_synonyms(synonyms.into_iter().map(Into::into));
        self
    }

    pub fn maps_to<I, T>(mut self, feature_ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.related_feature_ids = feature_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Text used when scoring concept/feature pairs: name followed by synonyms.
    pub fn to_embedding_text(&self) -> String {
        if self.synonyms.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.name, self.synonyms.join(" "))
        }
    }
}

fn dedupe_synonyms(synonyms: impl Iterator<Item = String>) -> Vec<String> {
    synonyms
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unique_by(|s| s.to_lowercase())
        .collect()
}

fn required(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Validate raw feature records.
pub fn load_features(records: &[RawFeatureRecord]) -> Result<Vec<FeatureDefinition>> {
    let mut features = Vec::with_capacity(records.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (position, record) in records.iter().enumerate() {
        let id = required(&record.id).ok_or_else(|| {
            PipelineError::Schema(format!("Feature record #{} is missing 'id'", position))
        })?;
        let source = required(&record.source).ok_or_else(|| {
            PipelineError::Schema(format!("Feature '{}' is missing 'source'", id))
        })?;
        let aggregation_text = required(&record.aggregation).ok_or_else(|| {
            PipelineError::Schema(format!("Feature '{}' is missing 'aggregation'", id))
        })?;
        let aggregation = aggregation_text.parse::<AggregationRule>().map_err(|_| {
            PipelineError::Schema(format!(
                "Feature '{}' has unsupported aggregation '{}'",
                id, aggregation_text
            ))
        })?;

        if let Some(previous) = seen.insert(id.to_string(), position) {
            return Err(PipelineError::Schema(format!(
                "Duplicate feature id '{}' (records #{} and #{})",
                id, previous, position
            )));
        }

        features.push(FeatureDefinition {
            id: id.to_string(),
            name: required(&record.name).unwrap_or(id).to_string(),
            description: record.description.clone().unwrap_or_default(),
            source: source.to_string(),
            aggregation,
            data_type: required(&record.data_type).unwrap_or("unknown").to_string(),
        });
    }

    debug!("Validated {} feature records", features.len());
    Ok(features)
}

/// Validate raw concept records against an already validated feature list.
pub fn load_concepts(
    records: &[RawConceptRecord],
    features: &[FeatureDefinition],
) -> Result<Vec<ConceptDefinition>> {
    let mut concepts = Vec::with_capacity(records.len());

    for (position, record) in records.iter().enumerate() {
        let id = required(&record.id).ok_or_else(|| {
            PipelineError::Schema(format!("Concept record #{} is missing 'id'", position))
        })?;
        let name = required(&record.name).ok_or_else(|| {
            PipelineError::Schema(format!("Concept '{}' is missing 'name'", id))
        })?;

        if concepts.iter().any(|c: &ConceptDefinition| c.id == id) {
            return Err(PipelineError::Schema(format!("Duplicate concept id '{}'", id)));
        }

        for feature_id in &record.maps_to {
            if !features.iter().any(|f| &f.id == feature_id) {
                return Err(PipelineError::Schema(format!(
                    "Concept '{}' maps to unknown feature '{}'",
                    id, feature_id
                )));
            }
        }

        concepts.push(
            ConceptDefinition::new(id, name)
                .with_synonyms(record.synonyms.iter().cloned())
                .maps_to(record.maps_to.iter().unique().cloned()),
        );
    }

    Ok(concepts)
}

/// In-memory catalog of validated features and concepts.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    features: Vec<FeatureDefinition>,
    concepts: Vec<ConceptDefinition>,
    /// Feature id -> position in `features`
    feature_index: HashMap<String, usize>,
}

impl SchemaCatalog {
    pub fn from_document(document: &SchemaDocument) -> Result<Self> {
        let features = load_features(&document.features)?;
        let concepts = load_concepts(&document.concepts, &features)?;
        let catalog = Self::build(features, concepts);
        info!(
            "Loaded schema catalog: {} features, {} concepts",
            catalog.features.len(),
            catalog.concepts.len()
        );
        Ok(catalog)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let document = SchemaDocument::from_path(path)?;
        Self::from_document(&document)
    }

    /// Build a catalog from definitions constructed in code.
    pub fn from_definitions(
        features: Vec<FeatureDefinition>,
        concepts: Vec<ConceptDefinition>,
    ) -> Result<Self> {
        let mut seen = HashMap::new();
        for feature in &features {
            if seen.insert(feature.id.as_str(), ()).is_some() {
                return Err(PipelineError::Schema(format!(
                    "Duplicate feature id '{}'",
                    feature.id
                )));
            }
        }
        for concept in &concepts {
            if let Some(missing) = concept
                .related_feature_ids
                .iter()
                .find(|id| !seen.contains_key(id.as_str()))
            {
                return Err(PipelineError::Schema(format!(
                    "Concept '{}' maps to unknown feature '{}'",
                    concept.id, missing
                )));
            }
        }
        Ok(Self::build(features, concepts))
    }

    fn build(features: Vec<FeatureDefinition>, concepts: Vec<ConceptDefinition>) -> Self {
        let feature_index = features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id.clone(), i))
            .collect();
        Self {
            features,
            concepts,
            feature_index,
        }
    }

    pub fn features(&self) -> &[FeatureDefinition] {
        &self.features
    }

    pub fn concepts(&self) -> &[ConceptDefinition] {
        &self.concepts
    }

    pub fn feature(&self, id: &str) -> Option<&FeatureDefinition> {
        self.feature_index.get(id).map(|&i| &self.features[i])
    }

    /// Whether `feature_id` is catalogued as a column of `source`.
    pub fn contains(&self, feature_id: &str, source: &str) -> bool {
        self.feature(feature_id)
            .map_or(false, |f| f.source == source)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}
