use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum_macros::{AsRefStr, Display, EnumString};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1/";

/// Language the narrative, keywords and translated caption are written in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum PromptLanguage {
    #[default]
    #[strum(serialize = "ko", to_string = "korean")]
    Korean,
    #[strum(serialize = "en", to_string = "english")]
    English,
}

impl PromptLanguage {
    /// Rough tokens per whitespace separated word.
    pub fn token_ratio(&self) -> f64 {
        match self {
            Self::Korean => 2.0,
            Self::English => 1.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
    /// `None` disables the daily usage gate.
    pub daily_token_limit: Option<u64>,
    pub language: PromptLanguage,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OPENAI_BASE_URL.into(),
            model: "gpt-3.5-turbo".into(),
            temperature: 0.3,
            timeout: Duration::from_secs(30),
            daily_token_limit: Some(50_000),
            language: PromptLanguage::Korean,
        }
    }
}

impl GenerationConfig {
    pub fn has_credential(&self) -> bool {
        self.api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }
}
