//! Execution Module - columnar dataset engines
//!
//! - `ColumnarEngine` trait: the narrow boundary the aggregator talks to
//! - `PolarsEngine`: parquet/csv files in a data directory plus in-memory frames

pub mod engine;
pub mod polars_engine;

pub use engine::{ColumnarEngine, KeyFilter};
pub use polars_engine::PolarsEngine;
