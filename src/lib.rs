pub mod aggregator;
pub mod concept_graph;
pub mod config;
pub mod embedding;
pub mod error;
pub mod execution;
pub mod learned_edges;
pub mod pipeline;
pub mod resolver;
pub mod schema;
pub mod translator;

pub use aggregator::{AggregationResult, Aggregator, HexFilter};
pub use concept_graph::{ConceptGraph, GraphStore, InMemoryGraphStore};
pub use config::AppConfig;
pub use error::{PipelineError, Result};
pub use execution::{ColumnarEngine, PolarsEngine};
pub use pipeline::{Answer, QueryOutcome, QueryPipeline};
pub use resolver::{FeatureResolver, ResolvedFeature};
pub use schema::{AggregationRule, ConceptDefinition, FeatureDefinition, SchemaCatalog};
pub use translator::QuerySpec;
