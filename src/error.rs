use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed catalog input; aborts the load.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A value outside an allow-list; aborts the single request.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The columnar engine cannot satisfy the request. Never retried.
    #[error("Data access error: {0}")]
    DataAccess(String),

    #[error("Graph store error: {0}")]
    Graph(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<polars::error::PolarsError> for PipelineError {
    fn from(err: polars::error::PolarsError) -> Self {
        PipelineError::DataAccess(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
