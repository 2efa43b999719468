//! Columnar Engine Trait - Core contract for dataset engines
//!
//! Engines expose schema introspection and a single scalar aggregation. They
//! receive already validated identifiers and a typed aggregation rule; nothing
//! here accepts free-form query text.

use crate::error::Result;
use crate::schema::AggregationRule;

/// Row filter: keep rows whose `column` value is one of `keys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFilter {
    pub column: String,
    pub keys: Vec<String>,
}

impl KeyFilter {
    pub fn new(column: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            column: column.into(),
            keys,
        }
    }
}

/// Columnar engine trait - all engines must implement this
pub trait ColumnarEngine: Send + Sync {
    /// Engine name (e.g., "polars")
    fn name(&self) -> &'static str;

    /// Dataset identifiers the engine can read.
    fn list_datasets(&self) -> Result<Vec<String>>;

    /// Column names of `dataset`. Unknown datasets are a data access error.
    fn get_columns(&self, dataset: &str) -> Result<Vec<String>>;

    /// Apply `rule` to `column` of `dataset`, optionally restricted by `filter`.
    ///
    /// Returns `None` when no rows take part in the aggregation (COUNT reports
    /// `Some(0.0)` instead) or when every input value is null.
    fn aggregate(
        &self,
        dataset: &str,
        column: &str,
        rule: AggregationRule,
        filter: Option<&KeyFilter>,
    ) -> Result<Option<f64>>;
}
