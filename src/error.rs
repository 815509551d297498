use crate::api::error::ApiError;
use crate::config::ConfigError;
use crate::export::error::{ExportError, SinkError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetatmoError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
