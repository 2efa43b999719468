//! Concept Graph - strict concept -> feature lookup over a graph store
//!
//! The graph store is an external boundary with a handful of verbs (upsert
//! nodes, link, resolve, clear). `InMemoryGraphStore` is the bundled store; it can
//! be backed by a JSON snapshot so rebuilt graphs survive between runs.
//!
//! Concept lookup is deliberately strict: a concept matches when its name, or one
//! of its synonyms, equals the requested name ignoring case. Fuzzy matching is
//! the resolver's job.

use crate::error::{PipelineError, Result};
use crate::learned_edges::LearnedEdge;
use crate::schema::{AggregationRule, SchemaCatalog};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Feature node as stored in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureNode {
    pub id: String,
    pub name: String,
    pub source: String,
    pub aggregation: AggregationRule,
    #[serde(default)]
    pub description: String,
}

/// Concept node as stored in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl ConceptNode {
    /// Case-insensitive exact match on the name or any synonym.
    pub fn matches(&self, name: &str) -> bool {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.name.to_lowercase() == needle
            || self.synonyms.iter().any(|s| s.to_lowercase() == needle)
    }
}

/// A feature reached from a concept through a `MAPS_TO` edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptFeature {
    pub feature_id: String,
    pub source: String,
    pub aggregation: AggregationRule,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub features: usize,
    pub concepts: usize,
    pub edges: usize,
}

/// Graph store boundary.
pub trait GraphStore: Send {
    /// Insert or update the feature node keyed by `node.id`.
    fn upsert_feature(&mut self, node: FeatureNode) -> Result<()>;

    /// Insert or update the concept node keyed by `node.id`.
    fn upsert_concept(&mut self, node: ConceptNode) -> Result<()>;

    /// Create the concept -> feature edge if both nodes exist.
    /// Returns whether both endpoints were found.
    fn link(&mut self, concept_id: &str, feature_id: &str) -> Result<bool>;

    fn resolve_concept(&self, name: &str) -> Result<Vec<ConceptFeature>>;

    /// Remove all nodes and edges.
    fn clear(&mut self) -> Result<()>;

    fn stats(&self) -> Result<GraphStats>;

    /// Release the underlying connection or flush state. Must be idempotent.
    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphSnapshot {
    features: Vec<FeatureNode>,
    concepts: Vec<ConceptNode>,
    /// (concept_id, feature_id) in insertion order
    edges: Vec<(String, String)>,
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
}

/// In-process graph store, optionally persisted as a JSON snapshot.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    features: Vec<FeatureNode>,
    /// Feature id -> position in `features`
    feature_index: HashMap<String, usize>,
    concepts: Vec<ConceptNode>,
    /// Concept id -> position in `concepts`
    concept_index: HashMap<String, usize>,
    edges: Vec<(String, String)>,
    edge_set: HashSet<(String, String)>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by `path`. An existing snapshot is loaded; a missing
    /// file starts an empty graph that is written on `close`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self::new();

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                PipelineError::Graph(format!("Failed to read graph snapshot {}: {}", path.display(), e))
            })?;
            let snapshot: GraphSnapshot = serde_json::from_str(&content).map_err(|e| {
                PipelineError::Graph(format!("Failed to parse graph snapshot {}: {}", path.display(), e))
            })?;
            for feature in snapshot.features {
                store.upsert_feature(feature)?;
            }
            for concept in snapshot.concepts {
                store.upsert_concept(concept)?;
            }
            for (concept_id, feature_id) in snapshot.edges {
                store.link(&concept_id, &feature_id)?;
            }
            info!(
                "Loaded graph snapshot {} ({} features, {} concepts, {} edges)",
                path.display(),
                store.features.len(),
                store.concepts.len(),
                store.edges.len()
            );
        }

        store.snapshot_path = Some(path);
        Ok(store)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let snapshot = GraphSnapshot {
            features: self.features.clone(),
            concepts: self.concepts.clone(),
            edges: self.edges.clone(),
            saved_at: Some(Utc::now()),
        };
        let encoded = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, encoded).map_err(|e| {
            PipelineError::Graph(format!("Failed to write graph snapshot {}: {}", path.display(), e))
        })?;
        debug!("Wrote graph snapshot {}", path.display());
        Ok(())
    }
}

impl GraphStore for InMemoryGraphStore {
    fn upsert_feature(&mut self, node: FeatureNode) -> Result<()> {
        match self.feature_index.get(&node.id) {
            Some(&i) => self.features[i] = node,
            None => {
                self.feature_index.insert(node.id.clone(), self.features.len());
                self.features.push(node);
            }
        }
        Ok(())
    }

    fn upsert_concept(&mut self, node: ConceptNode) -> Result<()> {
        match self.concept_index.get(&node.id) {
            Some(&i) => self.concepts[i] = node,
            None => {
                self.concept_index.insert(node.id.clone(), self.concepts.len());
                self.concepts.push(node);
            }
        }
        Ok(())
    }

    fn link(&mut self, concept_id: &str, feature_id: &str) -> Result<bool> {
        if !self.concept_index.contains_key(concept_id) || !self.feature_index.contains_key(feature_id) {
            return Ok(false);
        }
        let edge = (concept_id.to_string(), feature_id.to_string());
        if self.edge_set.insert(edge.clone()) {
            self.edges.push(edge);
        }
        Ok(true)
    }

    fn resolve_concept(&self, name: &str) -> Result<Vec<ConceptFeature>> {
        let features = &self.features;
        let feature_index = &self.feature_index;
        let edges = &self.edges;

        let hits = self
            .concepts
            .iter()
            .filter(|c| c.matches(name))
            .flat_map(move |c| {
                edges
                    .iter()
                    .filter(move |(concept_id, _)| *concept_id == c.id)
                    .filter_map(move |(_, feature_id)| {
                        feature_index.get(feature_id).map(|&i| &features[i])
                    })
            })
            .unique_by(|f| f.id.clone())
            .map(|f| ConceptFeature {
                feature_id: f.id.clone(),
                source: f.source.clone(),
                aggregation: f.aggregation,
            })
            .collect();
        Ok(hits)
    }

    fn clear(&mut self) -> Result<()> {
        self.features.clear();
        self.feature_index.clear();
        self.concepts.clear();
        self.concept_index.clear();
        self.edges.clear();
        self.edge_set.clear();
        Ok(())
    }

    fn stats(&self) -> Result<GraphStats> {
        Ok(GraphStats {
            features: self.features.len(),
            concepts: self.concepts.len(),
            edges: self.edges.len(),
        })
    }

    fn close(&mut self) -> Result<()> {
        if let Some(ref path) = self.snapshot_path {
            self.save(path)?;
            self.snapshot_path = None;
        }
        Ok(())
    }
}

/// Outcome of populating the graph from a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub features: usize,
    pub concepts: usize,
    pub edges: usize,
    /// (concept_id, feature_id) pairs whose endpoints were missing
    pub skipped_edges: Vec<(String, String)>,
}

/// Adapter over a graph store. Owns the store for its lifetime and releases it
/// on `close` or drop.
pub struct ConceptGraph<S: GraphStore> {
    store: S,
    closed: bool,
}

impl<S: GraphStore> ConceptGraph<S> {
    pub fn open(store: S) -> Self {
        Self {
            store,
            closed: false,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn create_feature(
        &mut self,
        feature_id: &str,
        name: &str,
        source: &str,
        aggregation: AggregationRule,
        description: &str,
    ) -> Result<()> {
        self.store.upsert_feature(FeatureNode {
            id: feature_id.to_string(),
            name: name.to_string(),
            source: source.to_string(),
            aggregation,
            description: description.to_string(),
        })
    }

    pub fn create_concept(&mut self, concept_id: &str, name: &str, synonyms: &[String]) -> Result<()> {
        let synonyms = synonyms
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unique_by(|s| s.to_lowercase())
            .collect();
        self.store.upsert_concept(ConceptNode {
            id: concept_id.to_string(),
            name: name.to_string(),
            synonyms,
        })
    }

    /// Create the `MAPS_TO` edge. Missing endpoints make this a no-op returning `false`.
    pub fn link_concept_to_feature(&mut self, concept_id: &str, feature_id: &str) -> Result<bool> {
        let linked = self.store.link(concept_id, feature_id)?;
        if !linked {
            warn!(
                "Cannot link concept '{}' to feature '{}': node not found",
                concept_id, feature_id
            );
        }
        Ok(linked)
    }

    /// Features linked to concepts whose name or synonym equals `name` (any case).
    pub fn resolve_concept(&self, name: &str) -> Result<Vec<ConceptFeature>> {
        let hits = self.store.resolve_concept(name)?;
        debug!("Concept '{}' resolved to {} feature(s)", name, hits.len());
        Ok(hits)
    }

    /// Remove every node and edge. Administrative; never part of resolution.
    pub fn clear(&mut self) -> Result<()> {
        warn!("Clearing concept graph");
        self.store.clear()
    }

    pub fn stats(&self) -> Result<GraphStats> {
        self.store.stats()
    }

    /// Create feature nodes, concept nodes and `MAPS_TO` edges for a catalog.
    pub fn build_from_catalog(&mut self, catalog: &SchemaCatalog, clear_existing: bool) -> Result<BuildReport> {
        if clear_existing {
            self.clear()?;
        }

        let mut report = BuildReport::default();

        info!("Creating {} feature nodes", catalog.features().len());
        for feature in catalog.features() {
            self.create_feature(
                &feature.id,
                &feature.name,
                &feature.source,
                feature.aggregation,
                &feature.description,
            )?;
            report.features += 1;
        }

        info!("Creating {} concept nodes", catalog.concepts().len());
        for concept in catalog.concepts() {
            self.create_concept(&concept.id, &concept.name, &concept.synonyms)?;
            report.concepts += 1;

            for feature_id in &concept.related_feature_ids {
                if self.link_concept_to_feature(&concept.id, feature_id)? {
                    report.edges += 1;
                } else {
                    report.skipped_edges.push((concept.id.clone(), feature_id.clone()));
                }
            }
            debug!("{} -> {:?}", concept.id, concept.related_feature_ids);
        }

        info!(
            "Concept graph built: {} features, {} concepts, {} edges",
            report.features, report.concepts, report.edges
        );
        Ok(report)
    }

    /// Link every learned (concept, feature) pair. Returns the number linked.
    pub fn apply_learned_edges(&mut self, edges: &[LearnedEdge]) -> Result<usize> {
        let mut linked = 0;
        for edge in edges {
            if self.link_concept_to_feature(&edge.concept_id, &edge.feature_id)? {
                linked += 1;
            }
        }
        Ok(linked)
    }

    /// Release the store, surfacing any error. Dropping without `close` also
    /// releases it, logging errors instead.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.store.close()
    }
}

impl<S: GraphStore> Drop for ConceptGraph<S> {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.store.close() {
                warn!("Failed to close graph store: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ConceptDefinition, FeatureDefinition};
    use tempfile::TempDir;

    fn medical_graph() -> ConceptGraph<InMemoryGraphStore> {
        let mut graph = ConceptGraph::open(InMemoryGraphStore::new());
        graph
            .create_feature(
                "hex_fc_rac_hospital",
                "Hospital Access",
                "CRIT_LIFE.parquet",
                AggregationRule::Avg,
                "",
            )
            .unwrap();
        graph
            .create_concept(
                "medical_access",
                "Medical Access",
                &["health".to_string(), "hospital".to_string()],
            )
            .unwrap();
        assert!(graph
            .link_concept_to_feature("medical_access", "hex_fc_rac_hospital")
            .unwrap());
        graph
    }

    #[test]
    fn test_resolve_concept_ignores_case() {
        let graph = medical_graph();
        for name in ["medical access", "MEDICAL ACCESS", "Medical Access"] {
            let hits = graph.resolve_concept(name).unwrap();
            assert_eq!(hits.len(), 1, "no hit for {}", name);
            assert_eq!(hits[0].feature_id, "hex_fc_rac_hospital");
            assert_eq!(hits[0].source, "CRIT_LIFE.parquet");
            assert_eq!(hits[0].aggregation, AggregationRule::Avg);
        }
    }

    #[test]
    fn test_resolve_concept_via_synonym() {
        let graph = medical_graph();
        assert_eq!(graph.resolve_concept("hospital").unwrap().len(), 1);
        assert_eq!(graph.resolve_concept("HEALTH").unwrap().len(), 1);
    }

    #[test]
    fn test_resolve_concept_is_not_fuzzy() {
        let graph = medical_graph();
        assert!(graph.resolve_concept("medical").unwrap().is_empty());
        assert!(graph.resolve_concept("hospitals").unwrap().is_empty());
        assert!(graph.resolve_concept("").unwrap().is_empty());
    }

    #[test]
    fn test_upserts_are_idempotent() {
        let mut graph = medical_graph();
        graph
            .create_feature(
                "hex_fc_rac_hospital",
                "Hospital Access",
                "CRIT_LIFE_002.parquet",
                AggregationRule::Max,
                "updated",
            )
            .unwrap();
        graph
            .create_concept("medical_access", "Medical Access", &["clinic".to_string()])
            .unwrap();
        graph
            .link_concept_to_feature("medical_access", "hex_fc_rac_hospital")
            .unwrap();

        let stats = graph.stats().unwrap();
        assert_eq!(stats, GraphStats { features: 1, concepts: 1, edges: 1 });

        let hits = graph.resolve_concept("clinic").unwrap();
        assert_eq!(hits[0].source, "CRIT_LIFE_002.parquet");
        assert_eq!(hits[0].aggregation, AggregationRule::Max);
        assert!(graph.resolve_concept("hospital").unwrap().is_empty());
    }

    #[test]
    fn test_link_missing_endpoint_is_noop() {
        let mut graph = medical_graph();
        assert!(!graph.link_concept_to_feature("medical_access", "missing").unwrap());
        assert!(!graph.link_concept_to_feature("missing", "hex_fc_rac_hospital").unwrap());
        assert_eq!(graph.stats().unwrap().edges, 1);
    }

    #[test]
    fn test_feature_reached_twice_is_reported_once() {
        let mut graph = medical_graph();
        graph
            .create_concept("care", "Care", &["medical access".to_string()])
            .unwrap();
        graph
            .link_concept_to_feature("care", "hex_fc_rac_hospital")
            .unwrap();
        assert_eq!(graph.resolve_concept("medical access").unwrap().len(), 1);
    }

    #[test]
    fn test_clear_removes_everything() {
        let mut graph = medical_graph();
        graph.clear().unwrap();
        assert_eq!(graph.stats().unwrap(), GraphStats::default());
        assert!(graph.resolve_concept("hospital").unwrap().is_empty());
    }

    #[test]
    fn test_build_from_catalog() {
        let catalog = SchemaCatalog::from_definitions(
            vec![
                FeatureDefinition::new("hex_fc_rac_hospital", "Hospital Access", "CRIT_LIFE.parquet", AggregationRule::Avg),
                FeatureDefinition::new("hifld_shelter_n", "Shelter Count", "HIFLD.parquet", AggregationRule::Sum),
            ],
            vec![
                ConceptDefinition::new("medical_access", "Medical Access")
                    .with_synonyms(["health", "hospital"])
                    .maps_to(["hex_fc_rac_hospital"]),
                ConceptDefinition::new("emergency_shelter", "Emergency Shelter")
                    .maps_to(["hifld_shelter_n"]),
            ],
        )
        .unwrap();

        let mut graph = medical_graph();
        let report = graph.build_from_catalog(&catalog, true).unwrap();
        assert_eq!(report.features, 2);
        assert_eq!(report.concepts, 2);
        assert_eq!(report.edges, 2);
        assert!(report.skipped_edges.is_empty());
        assert_eq!(
            graph.resolve_concept("emergency shelter").unwrap()[0].feature_id,
            "hifld_shelter_n"
        );
    }

    #[test]
    fn test_snapshot_survives_close_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("graph.json");

        let mut graph = ConceptGraph::open(InMemoryGraphStore::open(&path).unwrap());
        graph
            .create_feature("hifld_shelter_n", "Shelter Count", "HIFLD.parquet", AggregationRule::Sum, "")
            .unwrap();
        graph
            .create_concept("emergency_shelter", "Emergency Shelter", &["shelter".to_string()])
            .unwrap();
        graph
            .link_concept_to_feature("emergency_shelter", "hifld_shelter_n")
            .unwrap();
        graph.close().unwrap();
        assert!(path.exists());

        let reopened = ConceptGraph::open(InMemoryGraphStore::open(&path).unwrap());
        assert_eq!(reopened.stats().unwrap().edges, 1);
        assert_eq!(reopened.resolve_concept("Shelter").unwrap()[0].feature_id, "hifld_shelter_n");
    }

    #[test]
    fn test_failed_snapshot_write_can_be_retried() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot_dir = temp_dir.path().join("graphs");
        let path = snapshot_dir.join("graph.json");

        let mut store = InMemoryGraphStore::open(&path).unwrap();
        store
            .upsert_feature(FeatureNode {
                id: "hifld_shelter_n".to_string(),
                name: "Shelter Count".to_string(),
                source: "HIFLD.parquet".to_string(),
                aggregation: AggregationRule::Sum,
                description: String::new(),
            })
            .unwrap();

        assert!(matches!(store.close(), Err(PipelineError::Graph(_))));
        assert!(!path.exists());

        std::fs::create_dir(&snapshot_dir).unwrap();
        store.close().unwrap();
        assert!(path.exists());

        let reopened = InMemoryGraphStore::open(&path).unwrap();
        assert_eq!(reopened.stats().unwrap().features, 1);
    }

    #[test]
    fn test_drop_releases_store() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("graph.json");
        {
            let mut graph = ConceptGraph::open(InMemoryGraphStore::open(&path).unwrap());
            graph
                .create_feature("f", "F", "F.parquet", AggregationRule::Count, "")
                .unwrap();
        }
        assert!(path.exists());
    }
}
