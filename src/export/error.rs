use crate::api::error::ApiError;
use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to create export directory '{0}'")]
    DirCreation(PathBuf, #[source] std::io::Error),

    #[error("I/O error on '{0}'")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to read or write CSV file '{0}'")]
    Polars(PathBuf, #[source] PolarsError),

    #[error("Columns of '{path}' are [{found}], expected [{expected}]")]
    SchemaMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Module {module} is a {kind}, which is not exported")]
    UnsupportedModule { module: String, kind: String },

    #[error("Module {0} reports no metrics")]
    NoMetrics(String),
}

impl ExportError {
    /// Errors that end the whole run rather than one module's export.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExportError::Api(e) if e.is_fatal())
    }
}
