//! Aggregator - validate a `QuerySpec` and run it against a columnar engine
//!
//! Every request passes three gates before the engine sees it:
//! 1. dataset and column names match the identifier patterns
//! 2. the (feature, source) pair is in the catalog allow-list
//! 3. the dataset exists and carries the requested columns

use crate::error::{PipelineError, Result};
use crate::execution::{ColumnarEngine, KeyFilter};
use crate::schema::{AggregationRule, SchemaCatalog};
use crate::translator::QuerySpec;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

pub const DEFAULT_KEY_COLUMN: &str = "hex_id";

lazy_static! {
    static ref DATASET_NAME: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").unwrap();
    static ref COLUMN_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Dataset names are bare file names: no separators, no `..`.
pub fn validate_dataset_name(name: &str) -> Result<()> {
    if DATASET_NAME.is_match(name) && !name.contains("..") {
        Ok(())
    } else {
        Err(PipelineError::Configuration(format!(
            "Invalid dataset name '{}'",
            name
        )))
    }
}

pub fn validate_column_name(name: &str) -> Result<()> {
    if COLUMN_NAME.is_match(name) {
        Ok(())
    } else {
        Err(PipelineError::Configuration(format!(
            "Invalid column name '{}'",
            name
        )))
    }
}

/// Which rows an aggregation covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexFilter {
    All,
    Cells(usize),
}

impl Serialize for HexFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            HexFilter::All => serializer.serialize_str("all"),
            HexFilter::Cells(n) => serializer.serialize_u64(*n as u64),
        }
    }
}

impl fmt::Display for HexFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HexFilter::All => write!(f, "all"),
            HexFilter::Cells(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationResult {
    /// `None` when no rows matched or every value was null.
    pub value: Option<f64>,
    pub feature: String,
    pub aggregation: AggregationRule,
    pub source: String,
    pub hex_filter: HexFilter,
}

pub struct Aggregator<E: ColumnarEngine> {
    engine: E,
    /// Feature id -> the one dataset it may be read from
    allowed: HashMap<String, String>,
    key_column: String,
}

impl<E: ColumnarEngine> Aggregator<E> {
    pub fn new(engine: E, catalog: &SchemaCatalog) -> Self {
        let allowed = catalog
            .features()
            .iter()
            .map(|f| (f.id.clone(), f.source.clone()))
            .collect();
        Self {
            engine,
            allowed,
            key_column: DEFAULT_KEY_COLUMN.to_string(),
        }
    }

    /// Use `key_column` instead of `hex_id` for hex filtering.
    pub fn with_key_column(mut self, key_column: impl Into<String>) -> Result<Self> {
        let key_column = key_column.into();
        validate_column_name(&key_column)?;
        self.key_column = key_column;
        Ok(self)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    fn check_allowed(&self, spec: &QuerySpec) -> Result<()> {
        validate_dataset_name(&spec.source_file)?;
        validate_column_name(&spec.feature_id)?;

        match self.allowed.get(&spec.feature_id) {
            Some(source) if *source == spec.source_file => Ok(()),
            Some(source) => Err(PipelineError::Configuration(format!(
                "Feature '{}' is catalogued in '{}', not '{}'",
                spec.feature_id, source, spec.source_file
            ))),
            None => Err(PipelineError::Configuration(format!(
                "Feature '{}' is not in the catalog",
                spec.feature_id
            ))),
        }
    }

    fn check_available(&self, spec: &QuerySpec, filtered: bool) -> Result<()> {
        if !self
            .engine
            .list_datasets()?
            .iter()
            .any(|d| *d == spec.source_file)
        {
            return Err(PipelineError::DataAccess(format!(
                "Dataset '{}' is not available",
                spec.source_file
            )));
        }

        let columns = self.engine.get_columns(&spec.source_file)?;
        let mut required = vec![spec.feature_id.as_str()];
        if filtered {
            required.push(self.key_column.as_str());
        }
        for column in required {
            if !columns.iter().any(|c| c == column) {
                return Err(PipelineError::DataAccess(format!(
                    "Column '{}' not found in '{}'",
                    column, spec.source_file
                )));
            }
        }
        Ok(())
    }

    pub fn execute(&self, spec: &QuerySpec) -> Result<AggregationResult> {
        if let Err(e) = self.check_allowed(spec) {
            warn!("Rejected aggregation request: {}", e);
            return Err(e);
        }

        let hex_ids = spec.hex_ids.as_ref().filter(|ids| !ids.is_empty());
        self.check_available(spec, hex_ids.is_some())?;

        let filter = hex_ids.map(|ids| KeyFilter::new(self.key_column.clone(), ids.clone()));
        debug!(
            "Executing {}({}) on {} via {}",
            spec.aggregation,
            spec.feature_id,
            spec.source_file,
            self.engine.name()
        );
        let value = self.engine.aggregate(
            &spec.source_file,
            &spec.feature_id,
            spec.aggregation,
            filter.as_ref(),
        )?;

        let hex_filter = hex_ids.map_or(HexFilter::All, |ids| HexFilter::Cells(ids.len()));
        info!(
            "{}({}) on {} [{}] = {:?}",
            spec.aggregation, spec.feature_id, spec.source_file, hex_filter, value
        );
        Ok(AggregationResult {
            value,
            feature: spec.feature_id.clone(),
            aggregation: spec.aggregation,
            source: spec.source_file.clone(),
            hex_filter,
        })
    }
}
