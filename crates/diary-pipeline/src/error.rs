use ai::{ModelLoadError, VisionError};
use std::time::Duration;
use thiserror::Error;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Hard failures of a pipeline run. A degraded generation is not one of them.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("inference timed out after {0:?}")]
    InferenceTimeout(Duration),

    #[error("inference task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<VisionError> for PipelineError {
    fn from(e: VisionError) -> Self {
        match e {
            VisionError::InvalidImage(e) => Self::InvalidImage(e.to_string()),
            VisionError::ModelLoad(e) => Self::ModelLoad(e),
            VisionError::Inference(msg) => Self::Inference(msg),
        }
    }
}

impl PipelineError {
    /// Whether the caller sent something unusable, as opposed to a server fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidImage(_))
    }
}
