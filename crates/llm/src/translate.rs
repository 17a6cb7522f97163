use crate::{LLMMessage, LLMParams, PromptLanguage, StructuredGenerationClient};
use tracing::{debug, warn};

const TRANSLATION_MAX_TOKENS: u32 = 200;

fn translation_system_prompt(language: PromptLanguage) -> Option<&'static str> {
    match language {
        PromptLanguage::Korean => Some(
            "You are a professional Korean translator. Translate the given text into natural Korean. \
             Do not add any explanations or extra text.",
        ),
        // captions already come out in English
        PromptLanguage::English => None,
    }
}

impl StructuredGenerationClient {
    /// Translate a caption into the configured output language.
    ///
    /// Best effort: without a credential, on any error, timeout or empty reply
    /// the input is returned unchanged.
    #[tracing::instrument(name = "StructuredGenerationClient::translate", skip_all)]
    pub async fn translate(&self, text: &str) -> String {
        let Some(system) = translation_system_prompt(self.config().language) else {
            return text.to_string();
        };
        if text.trim().is_empty() {
            return text.to_string();
        }
        if !self.has_credential() {
            debug!("translation skipped: API key is not configured");
            return text.to_string();
        }

        let history = vec![
            LLMMessage::System(system.to_string()),
            LLMMessage::User(text.to_string()),
        ];
        let params = LLMParams {
            temperature: Some(0.1),
            max_tokens: Some(TRANSLATION_MAX_TOKENS),
            ..Default::default()
        };

        match tokio::time::timeout(
            self.config().timeout,
            self.chat().get_completion(history, Some(params)),
        )
        .await
        {
            Ok(Ok(translated)) if !translated.trim().is_empty() => translated.trim().to_string(),
            Ok(Ok(_)) => {
                warn!("translation returned empty text, keeping original");
                text.to_string()
            }
            Ok(Err(e)) => {
                warn!("translation failed: {:#}", e);
                text.to_string()
            }
            Err(_) => {
                warn!("translation timed out");
                text.to_string()
            }
        }
    }
}
