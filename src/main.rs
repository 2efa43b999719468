use disaster_context_graph::concept_graph::{ConceptGraph, InMemoryGraphStore};
use disaster_context_graph::config::{parse_threshold, AppConfig, EmbeddingBackend};
use disaster_context_graph::execution::{ColumnarEngine, PolarsEngine};
use disaster_context_graph::learned_edges::{learn_edges, DEFAULT_EDGE_THRESHOLD};
use disaster_context_graph::pipeline::{QueryOutcome, QueryPipeline};
use disaster_context_graph::schema::SchemaCatalog;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dcg")]
#[command(about = "Answer disaster-analysis questions from hex-level datasets")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for values otherwise taken from the environment / `.env`.
#[derive(ClapArgs)]
struct CommonArgs {
    /// Schema document (or set DCG_SCHEMA_PATH)
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    /// Directory of parquet/csv datasets (or set DCG_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Concept graph snapshot file (or set DCG_GRAPH_SNAPSHOT)
    #[arg(long, global = true)]
    graph: Option<PathBuf>,

    /// none, token-hash or http (or set DCG_EMBEDDING_BACKEND)
    #[arg(long, global = true)]
    embedding: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a free-text query and aggregate the best matching feature
    Query {
        query: String,

        /// Restrict to these hex cells (comma separated)
        #[arg(long, value_delimiter = ',')]
        hex: Vec<String>,

        /// Minimum similarity, exclusive (or set DCG_THRESHOLD)
        #[arg(long)]
        threshold: Option<String>,
    },
    /// Look up a concept by name or synonym and aggregate its first feature
    Concept {
        name: String,

        #[arg(long, value_delimiter = ',')]
        hex: Vec<String>,
    },
    /// Build the concept graph from the schema document
    BuildGraph {
        /// Keep existing nodes and edges
        #[arg(long)]
        keep: bool,
    },
    /// Discover concept -> feature edges by embedding similarity
    LearnEdges {
        #[arg(long, default_value_t = DEFAULT_EDGE_THRESHOLD)]
        threshold: f32,

        /// Insert the learned edges into the graph
        #[arg(long)]
        apply: bool,
    },
    /// List datasets in the data directory
    Datasets,
    /// List the columns of a dataset
    Columns { dataset: String },
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args.common)?;

    match args.command {
        Commands::Query { query, hex, threshold } => run_query(&config, &query, hex, threshold),
        Commands::Concept { name, hex } => run_concept(&config, &name, hex),
        Commands::BuildGraph { keep } => build_graph(&config, keep),
        Commands::LearnEdges { threshold, apply } => run_learn_edges(&config, threshold, apply),
        Commands::Datasets => {
            let engine = PolarsEngine::open(&config.data_dir)?;
            print_json(&engine.list_datasets()?)
        }
        Commands::Columns { dataset } => {
            let engine = PolarsEngine::open(&config.data_dir)?;
            print_json(&engine.get_columns(&dataset)?)
        }
    }
}

fn load_config(common: &CommonArgs) -> Result<AppConfig> {
    let mut config = AppConfig::from_env()?;
    if let Some(ref schema) = common.schema {
        config.schema_path = schema.clone();
    }
    if let Some(ref data_dir) = common.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(ref graph) = common.graph {
        config.graph_snapshot = Some(graph.clone());
    }
    if let Some(ref embedding) = common.embedding {
        config.embedding_backend = embedding.parse::<EmbeddingBackend>()?;
    }
    Ok(config)
}

fn load_catalog(config: &AppConfig) -> Result<SchemaCatalog> {
    SchemaCatalog::from_path(&config.schema_path)
        .with_context(|| format!("loading schema {}", config.schema_path.display()))
}

fn open_graph(config: &AppConfig) -> Result<ConceptGraph<InMemoryGraphStore>> {
    let store = match config.graph_snapshot {
        Some(ref path) => InMemoryGraphStore::open(path)
            .with_context(|| format!("opening graph snapshot {}", path.display()))?,
        None => InMemoryGraphStore::new(),
    };
    Ok(ConceptGraph::open(store))
}

fn build_pipeline(config: &AppConfig, threshold: f32) -> Result<QueryPipeline<PolarsEngine>> {
    let catalog = load_catalog(config)?;
    let engine = PolarsEngine::open(&config.data_dir)?;
    let pipeline = QueryPipeline::new(&catalog, config.build_embedder()?, engine)?
        .with_threshold(threshold)
        .with_key_column(config.hex_key_column.clone())?;
    Ok(pipeline)
}

fn hex_filter(hex: Vec<String>) -> Option<Vec<String>> {
    let ids: Vec<String> = hex
        .into_iter()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .collect();
    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}

fn run_query(config: &AppConfig, query: &str, hex: Vec<String>, threshold: Option<String>) -> Result<()> {
    let threshold = match threshold {
        Some(raw) => parse_threshold(&raw)?,
        None => config.threshold,
    };
    let pipeline = build_pipeline(config, threshold)?;
    let outcome = pipeline.answer(query, hex_filter(hex))?;
    print_outcome(&outcome)
}

fn run_concept(config: &AppConfig, name: &str, hex: Vec<String>) -> Result<()> {
    let pipeline = build_pipeline(config, config.threshold)?;
    let mut graph = open_graph(config)?;
    if config.graph_snapshot.is_none() {
        graph.build_from_catalog(&load_catalog(config)?, true)?;
    }
    let outcome = pipeline.answer_concept(&graph, name, hex_filter(hex))?;
    graph.close()?;
    print_outcome(&outcome)
}

fn build_graph(config: &AppConfig, keep: bool) -> Result<()> {
    let catalog = load_catalog(config)?;
    let mut graph = open_graph(config)?;
    let report = graph.build_from_catalog(&catalog, !keep)?;
    for (concept, feature) in &report.skipped_edges {
        warn!("Skipped edge {} -> {}: endpoint missing", concept, feature);
    }
    let stats = graph.stats()?;
    graph.close()?;
    print_json(&stats)
}

fn run_learn_edges(config: &AppConfig, threshold: f32, apply: bool) -> Result<()> {
    let catalog = load_catalog(config)?;
    let embedder = config.build_embedder()?;
    let edges = learn_edges(
        catalog.concepts(),
        catalog.features(),
        embedder.as_deref(),
        threshold,
    )?;

    if apply {
        let mut graph = open_graph(config)?;
        let linked = graph.apply_learned_edges(&edges)?;
        info!("Linked {} of {} learned edge(s)", linked, edges.len());
        graph.close()?;
    }
    print_json(&edges)
}

fn print_outcome(outcome: &QueryOutcome) -> Result<()> {
    if let QueryOutcome::NoMatch { query } = outcome {
        eprintln!("No matching feature for '{}'", query);
    }
    print_json(outcome)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
