//! Polars Execution Engine
//!
//! Datasets are parquet or csv files in a data directory, addressed by file name
//! (e.g. `CRIT_LIFE.parquet`), plus frames registered in memory under any name.
//! Aggregations are built from typed lazy expressions.

use crate::error::{PipelineError, Result};
use crate::execution::engine::{ColumnarEngine, KeyFilter};
use crate::schema::AggregationRule;
use polars::prelude::*;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Polars execution engine
pub struct PolarsEngine {
    data_dir: Option<PathBuf>,
    frames: HashMap<String, DataFrame>,
}

impl PolarsEngine {
    /// Engine over the files in `data_dir`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        if !data_dir.is_dir() {
            return Err(PipelineError::DataAccess(format!(
                "Data directory not found: {}",
                data_dir.display()
            )));
        }
        info!("Polars engine reading datasets from {}", data_dir.display());
        Ok(Self {
            data_dir: Some(data_dir),
            frames: HashMap::new(),
        })
    }

    /// Engine with no backing directory; datasets come from `register`.
    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            frames: HashMap::new(),
        }
    }

    /// Make `frame` available as dataset `name`. Shadows a file of the same name.
    pub fn register(&mut self, name: impl Into<String>, frame: DataFrame) {
        self.frames.insert(name.into(), frame);
    }

    fn dataset_path(&self, dataset: &str) -> Option<PathBuf> {
        let data_dir = self.data_dir.as_ref()?;
        let mut components = Path::new(dataset).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Some(data_dir.join(dataset)),
            _ => None,
        }
    }

    fn scan(&self, dataset: &str) -> Result<LazyFrame> {
        if let Some(frame) = self.frames.get(dataset) {
            return Ok(frame.clone().lazy());
        }

        let path = self
            .dataset_path(dataset)
            .filter(|p| p.is_file())
            .ok_or_else(|| PipelineError::DataAccess(format!("Dataset not found: {}", dataset)))?;

        debug!("Scanning {}", path.display());
        let frame = if has_extension(&path, "csv") {
            LazyCsvReader::new(&path)
                .with_has_header(true)
                .finish()
                .map_err(|e| PipelineError::DataAccess(format!("Failed to load CSV {}: {}", dataset, e)))?
        } else {
            LazyFrame::scan_parquet(&path, ScanArgsParquet::default())
                .map_err(|e| PipelineError::DataAccess(format!("Failed to load Parquet {}: {}", dataset, e)))?
        };
        Ok(frame)
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map_or(false, |s| s.eq_ignore_ascii_case(ext))
}

fn aggregation_expr(column: &str, rule: AggregationRule) -> Expr {
    match rule {
        AggregationRule::Sum => col(column).sum(),
        AggregationRule::Avg => col(column).mean(),
        AggregationRule::Count => col(column).count(),
        AggregationRule::Min => col(column).min(),
        AggregationRule::Max => col(column).max(),
    }
}

impl ColumnarEngine for PolarsEngine {
    fn name(&self) -> &'static str {
        "polars"
    }

    fn list_datasets(&self) -> Result<Vec<String>> {
        let mut datasets: Vec<String> = self.frames.keys().cloned().collect();

        if let Some(ref data_dir) = self.data_dir {
            for entry in std::fs::read_dir(data_dir)? {
                let path = entry?.path();
                if path.is_file() && (has_extension(&path, "parquet") || has_extension(&path, "csv")) {
                    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                        datasets.push(name.to_string());
                    }
                }
            }
        }

        datasets.sort();
        datasets.dedup();
        Ok(datasets)
    }

    fn get_columns(&self, dataset: &str) -> Result<Vec<String>> {
        if let Some(frame) = self.frames.get(dataset) {
            return Ok(frame
                .get_column_names()
                .iter()
                .map(|name| name.to_string())
                .collect());
        }

        let schema = self.scan(dataset)?.schema().map_err(|e| {
            PipelineError::DataAccess(format!("Failed to read schema of {}: {}", dataset, e))
        })?;
        Ok(schema.iter_names().map(|name| name.to_string()).collect())
    }

    fn aggregate(
        &self,
        dataset: &str,
        column: &str,
        rule: AggregationRule,
        filter: Option<&KeyFilter>,
    ) -> Result<Option<f64>> {
        let mut frame = self.scan(dataset)?;

        if let Some(filter) = filter {
            let keys = Series::new("keys", filter.keys.as_slice());
            frame = frame.filter(col(&filter.column).cast(DataType::String).is_in(lit(keys)));
        }

        let result = frame
            .select([
                aggregation_expr(column, rule).alias("value"),
                len().alias("rows"),
            ])
            .collect()
            .map_err(|e| {
                PipelineError::DataAccess(format!(
                    "Failed to aggregate {}({}) on {}: {}",
                    rule, column, dataset, e
                ))
            })?;

        let value = result.column("value")?;
        let dtype = value.dtype();
        if !(dtype.is_numeric() || matches!(dtype, DataType::Boolean | DataType::Null)) {
            return Err(PipelineError::DataAccess(format!(
                "{}({}) on {} does not produce a number (column type {})",
                rule, column, dataset, dtype
            )));
        }

        let rows = result.column("rows")?.get(0)?.extract::<u64>().unwrap_or(0);
        debug!("{}({}) on {} over {} row(s)", rule, column, dataset, rows);
        if rows == 0 && rule != AggregationRule::Count {
            return Ok(None);
        }

        match value.get(0)? {
            AnyValue::Null => Ok(None),
            AnyValue::Boolean(b) => Ok(Some(if b { 1.0 } else { 0.0 })),
            other => other.extract::<f64>().map(Some).ok_or_else(|| {
                PipelineError::DataAccess(format!(
                    "{}({}) on {} returned a non-numeric value: {}",
                    rule, column, dataset, other
                ))
            }),
        }
    }
}
