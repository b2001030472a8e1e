use thiserror::Error;
use towcheck_store::StoreError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid pipeline configuration: {0}")]
    Config(String),
}
