use crate::blip::{BlipConfig, CaptionModel};
use crate::clip::{ClipConfig, MoodModel};
use crate::{ExecutionDevice, ModelKind, ModelProvider};
use anyhow::bail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub caption: BlipConfig,
    /// `None` disables mood classification.
    pub mood: Option<ClipConfig>,
    pub device: ExecutionDevice,
}

/// A loaded vision model of either kind, as stored in the registry.
pub enum VisionModel {
    Caption(CaptionModel),
    Mood(MoodModel),
}

impl VisionModel {
    pub fn as_caption(&self) -> Option<&CaptionModel> {
        match self {
            Self::Caption(model) => Some(model),
            _ => None,
        }
    }

    pub fn as_mood(&self) -> Option<&MoodModel> {
        match self {
            Self::Mood(model) => Some(model),
            _ => None,
        }
    }
}

/// Builds ONNX sessions from [`VisionConfig`] on the blocking pool.
pub struct OnnxVisionProvider {
    config: VisionConfig,
}

impl OnnxVisionProvider {
    pub fn new(config: VisionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ModelProvider<VisionModel> for OnnxVisionProvider {
    async fn load(&self, kind: ModelKind) -> anyhow::Result<VisionModel> {
        let device = self.config.device;
        match kind {
            ModelKind::Caption => {
                let config = self.config.caption.clone();
                let model = tokio::task::spawn_blocking(move || {
                    CaptionModel::from_config(&config, device)
                })
                .await??;
                Ok(VisionModel::Caption(model))
            }
            ModelKind::Mood => {
                let Some(config) = self.config.mood.clone() else {
                    bail!("mood model is not configured");
                };
                let model =
                    tokio::task::spawn_blocking(move || MoodModel::from_config(&config, device))
                        .await??;
                Ok(VisionModel::Mood(model))
            }
        }
    }
}
