use approx::assert_relative_eq;
use disaster_context_graph::aggregator::HexFilter;
use disaster_context_graph::concept_graph::{ConceptGraph, InMemoryGraphStore};
use disaster_context_graph::config::AppConfig;
use disaster_context_graph::embedding::TokenHashEmbedder;
use disaster_context_graph::learned_edges::{learn_edges, DEFAULT_EDGE_THRESHOLD};
use disaster_context_graph::pipeline::{QueryOutcome, QueryPipeline, ResolutionMode};
use disaster_context_graph::resolver::KEYWORD_MATCH_SCORE;
use disaster_context_graph::schema::{AggregationRule, SchemaCatalog};
use disaster_context_graph::translator::QuerySpec;
use disaster_context_graph::{Aggregator, PipelineError, PolarsEngine};
use polars::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use tempfile::TempDir;

const SCHEMA: &str = r#"{
  "features": [
    {"id": "hex_fc_rac_hospital", "name": "Hospital Access", "source": "CRIT_LIFE.parquet",
     "aggregation": "AVG", "description": "share of residents within reach of a hospital"},
    {"id": "hifld_shelter_n", "name": "Shelter Count", "source": "HIFLD.parquet",
     "aggregation": "SUM", "description": "number of emergency shelters", "data_type": "int"},
    {"id": "building_count", "name": "Building Count", "source": "EX_BLD_001.parquet",
     "aggregation": "sum"}
  ],
  "concepts": [
    {"id": "medical_access", "name": "Medical Access", "synonyms": ["health", "hospital"],
     "maps_to": ["hex_fc_rac_hospital"]},
    {"id": "emergency_shelter", "name": "Emergency Shelter", "synonyms": ["shelter", "refuge"]}
  ]
}"#;

fn write_parquet(dir: &Path, name: &str, mut df: DataFrame) {
    let mut file = File::create(dir.join(name)).unwrap();
    ParquetWriter::new(&mut file).finish(&mut df).unwrap();
}

/// Schema document plus three hex-level datasets in a temp directory.
fn setup() -> (TempDir, AppConfig) {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("data");
    std::fs::create_dir(&data_dir).unwrap();

    write_parquet(
        &data_dir,
        "EX_BLD_001.parquet",
        df! [
            "hex_id" => ["a", "b"],
            "building_count" => [3i64, 5]
        ]
        .unwrap(),
    );
    write_parquet(
        &data_dir,
        "HIFLD.parquet",
        df! [
            "hex_id" => ["a", "b", "c"],
            "hifld_shelter_n" => [2i64, 0, 6]
        ]
        .unwrap(),
    );
    write_parquet(
        &data_dir,
        "CRIT_LIFE.parquet",
        df! [
            "hex_id" => ["a", "b", "c", "d"],
            "hex_fc_rac_hospital" => [0.1f64, 0.4, 0.7, 0.6]
        ]
        .unwrap(),
    );

    let schema_path = temp_dir.path().join("schema.json");
    std::fs::write(&schema_path, SCHEMA).unwrap();

    let vars: HashMap<&str, String> = [
        ("DCG_SCHEMA_PATH", schema_path.display().to_string()),
        ("DCG_DATA_DIR", data_dir.display().to_string()),
    ]
    .into_iter()
    .collect();
    let config = AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
    (temp_dir, config)
}

fn keyword_pipeline(config: &AppConfig) -> QueryPipeline<PolarsEngine> {
    let catalog = SchemaCatalog::from_path(&config.schema_path).unwrap();
    let engine = PolarsEngine::open(&config.data_dir).unwrap();
    QueryPipeline::new(&catalog, None, engine)
        .unwrap()
        .with_threshold(config.threshold)
}

#[test]
fn test_shelter_query_with_keyword_fallback() {
    let (_dir, config) = setup();
    let pipeline = keyword_pipeline(&config);

    let outcome = pipeline
        .answer("Where can I find emergency shelters?", None)
        .unwrap();
    let answer = outcome.answer().expect("shelter query should be answered");

    assert_eq!(answer.mode, ResolutionMode::Keyword);
    assert_eq!(answer.candidates.len(), 1);
    assert_eq!(answer.candidates[0].feature_id, "hifld_shelter_n");
    assert_eq!(answer.candidates[0].score, KEYWORD_MATCH_SCORE);
    assert_eq!(answer.result.aggregation, AggregationRule::Sum);
    assert_eq!(answer.result.value, Some(8.0));
    assert_eq!(answer.result.hex_filter, HexFilter::All);
}

#[test]
fn test_filtered_average_and_json_shape() {
    let (_dir, config) = setup();
    let pipeline = keyword_pipeline(&config);

    let outcome = pipeline
        .answer(
            "hospital coverage",
            Some(vec!["c".to_string(), "d".to_string()]),
        )
        .unwrap();
    let answer = outcome.answer().unwrap();
    assert_relative_eq!(answer.result.value.unwrap(), 0.65, epsilon = 1e-9);
    assert_eq!(answer.result.hex_filter, HexFilter::Cells(2));

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["status"], "answered");
    assert_eq!(json["result"]["feature"], "hex_fc_rac_hospital");
    assert_eq!(json["result"]["aggregation"], "AVG");
    assert_eq!(json["result"]["source"], "CRIT_LIFE.parquet");
    assert_eq!(json["result"]["hex_filter"], 2);
}

#[test]
fn test_unmatched_query_reports_no_match() {
    let (_dir, config) = setup();
    let pipeline = keyword_pipeline(&config);

    let outcome = pipeline.answer("wildfire smoke exposure", None).unwrap();
    assert!(matches!(outcome, QueryOutcome::NoMatch { ref query } if query == "wildfire smoke exposure"));
}

#[test]
fn test_building_count_scenarios() {
    let (_dir, config) = setup();
    let catalog = SchemaCatalog::from_path(&config.schema_path).unwrap();
    let aggregator = Aggregator::new(PolarsEngine::open(&config.data_dir).unwrap(), &catalog);

    let all = QuerySpec::from_parts("building_count", "EX_BLD_001.parquet", "SUM", None).unwrap();
    assert_eq!(aggregator.execute(&all).unwrap().value, Some(8.0));

    let one = QuerySpec::from_parts(
        "building_count",
        "EX_BLD_001.parquet",
        "SUM",
        Some(vec!["a".to_string()]),
    )
    .unwrap();
    let result = aggregator.execute(&one).unwrap();
    assert_eq!(result.value, Some(3.0));
    assert_eq!(result.hex_filter, HexFilter::Cells(1));

    let outside =
        QuerySpec::from_parts("building_count", "HIFLD.parquet", "SUM", None).unwrap();
    assert!(matches!(
        aggregator.execute(&outside),
        Err(PipelineError::Configuration(_))
    ));
}

#[test]
fn test_concept_lookup_through_snapshot() {
    let (dir, config) = setup();
    let catalog = SchemaCatalog::from_path(&config.schema_path).unwrap();
    let snapshot = dir.path().join("graph.json");

    let mut graph = ConceptGraph::open(InMemoryGraphStore::open(&snapshot).unwrap());
    let report = graph.build_from_catalog(&catalog, true).unwrap();
    assert_eq!(report.edges, 1);
    graph.close().unwrap();
    assert!(snapshot.exists());

    let graph = ConceptGraph::open(InMemoryGraphStore::open(&snapshot).unwrap());
    let pipeline = keyword_pipeline(&config);
    for name in ["medical access", "MEDICAL ACCESS", "hospital"] {
        let outcome = pipeline.answer_concept(&graph, name, None).unwrap();
        let answer = outcome.answer().unwrap();
        assert_eq!(answer.mode, ResolutionMode::Concept);
        assert_eq!(answer.result.feature, "hex_fc_rac_hospital");
        assert_relative_eq!(answer.result.value.unwrap(), 0.45, epsilon = 1e-9);
    }

    // Concept exists but has no linked features yet.
    assert!(pipeline
        .answer_concept(&graph, "refuge", None)
        .unwrap()
        .answer()
        .is_none());
}

#[test]
fn test_learned_edges_link_unmapped_concept() {
    let (_dir, config) = setup();
    let catalog = SchemaCatalog::from_path(&config.schema_path).unwrap();
    let embedder = TokenHashEmbedder::default();

    let edges = learn_edges(
        catalog.concepts(),
        catalog.features(),
        Some(&embedder),
        DEFAULT_EDGE_THRESHOLD,
    )
    .unwrap();
    assert!(edges
        .iter()
        .any(|e| e.concept_id == "emergency_shelter" && e.feature_id == "hifld_shelter_n"));

    let mut graph = ConceptGraph::open(InMemoryGraphStore::new());
    graph.build_from_catalog(&catalog, true).unwrap();
    assert!(graph.apply_learned_edges(&edges).unwrap() > 0);

    let pipeline = keyword_pipeline(&config);
    let outcome = pipeline.answer_concept(&graph, "refuge", None).unwrap();
    let answer = outcome.answer().unwrap();
    assert!(answer
        .candidates
        .iter()
        .any(|c| c.feature_id == "hifld_shelter_n"));
}

#[test]
fn test_semantic_mode_prefers_related_feature() {
    let (_dir, config) = setup();
    let catalog = SchemaCatalog::from_path(&config.schema_path).unwrap();
    let engine = PolarsEngine::open(&config.data_dir).unwrap();
    let pipeline = QueryPipeline::new(&catalog, Some(Box::new(TokenHashEmbedder::default())), engine)
        .unwrap()
        .with_threshold(0.1);

    let outcome = pipeline.answer("emergency shelters count", None).unwrap();
    let answer = outcome.answer().unwrap();
    assert_eq!(answer.mode, ResolutionMode::Embedding);
    assert_eq!(answer.result.feature, "hifld_shelter_n");
    assert!(answer
        .candidates
        .windows(2)
        .all(|w| w[0].score >= w[1].score));
}
