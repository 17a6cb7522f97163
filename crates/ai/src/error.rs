use crate::ModelKind;
use thiserror::Error;

pub type VisionResult<T> = std::result::Result<T, VisionError>;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("invalid image: {0}")]
    InvalidImage(#[from] image::ImageError),

    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    #[error("inference error: {0}")]
    Inference(String),
}

impl VisionError {
    pub fn inference(e: impl std::fmt::Display) -> Self {
        Self::Inference(e.to_string())
    }
}

impl From<anyhow::Error> for VisionError {
    fn from(e: anyhow::Error) -> Self {
        Self::Inference(format!("{:#}", e))
    }
}

/// Load failure shared by every caller that waited on the same load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to load {kind} model: {message}")]
pub struct ModelLoadError {
    pub kind: ModelKind,
    pub message: String,
}

impl ModelLoadError {
    pub fn new(kind: ModelKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
