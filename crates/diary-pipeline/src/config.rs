use ai::blip::DecodeParams;
use ai::clip::MoodSettings;
use llm::PromptStyle;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub decode: DecodeParams,
    /// `None` skips mood classification.
    pub mood: Option<MoodSettings>,
    pub prompt: PromptStyle,
    /// Translate the caption into the prompt language before generation.
    pub translate_caption: bool,
    /// How long to wait for local inference. The blocking work itself is not aborted.
    pub inference_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decode: DecodeParams::default(),
            mood: None,
            prompt: PromptStyle::default(),
            translate_caption: false,
            inference_timeout: Some(Duration::from_secs(60)),
        }
    }
}
