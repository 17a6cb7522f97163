mod config;
mod openai;
mod prompt;
mod structured;
mod translate;
mod usage;

pub use config::*;
pub use openai::OpenAI;
pub use prompt::*;
pub use structured::*;
pub use usage::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "content", rename_all = "lowercase")]
pub enum LLMMessage {
    System(String),
    User(String),
    Assistant(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LLMParams {
    pub temperature: Option<f32>,
    pub seed: Option<u32>,
    pub max_tokens: Option<u32>,
    pub response_format: Option<ResponseFormat>,
}

/// Chat completion transport. Returns the assistant message text.
#[async_trait]
pub trait Chat: Send + Sync {
    async fn get_completion(
        &self,
        history: Vec<LLMMessage>,
        params: Option<LLMParams>,
    ) -> anyhow::Result<String>;
}
