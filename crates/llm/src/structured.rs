use crate::{
    estimate_tokens, Chat, DailyUsageCounter, GenerationConfig, GenerationPrompt, LLMMessage,
    LLMParams, OpenAI, ResponseFormat,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Prefix of `refined_caption` whenever generation degraded. Existing clients
/// match on it, keep it stable.
pub const FAILURE_MARKER: &str = "LLM API 호출 실패";
pub const MISSING_CAPTION_PLACEHOLDER: &str = "캡션 생성 결과 없음";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructuredCaptionResult {
    pub refined_caption: String,
    pub keywords: Vec<String>,
}

impl StructuredCaptionResult {
    pub fn has_failure_marker(&self) -> bool {
        self.refined_caption.starts_with(FAILURE_MARKER)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DegradeReason {
    #[error("ChatGPT API 키가 설정되지 않았습니다.")]
    MissingCredential,
    #[error("일일 토큰 사용량 제한에 도달했습니다. 내일 다시 시도해주세요.")]
    RateLimited,
    #[error("{0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Generated(StructuredCaptionResult),
    /// The generator was skipped or failed. `result` carries the failure marker
    /// and no keywords.
    Degraded {
        reason: DegradeReason,
        result: StructuredCaptionResult,
    },
}

impl GenerationOutcome {
    pub fn degraded(reason: DegradeReason) -> Self {
        let result = StructuredCaptionResult {
            refined_caption: format!("{}: {}", FAILURE_MARKER, reason),
            keywords: vec![],
        };
        Self::Degraded { reason, result }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub fn degrade_reason(&self) -> Option<&DegradeReason> {
        match self {
            Self::Degraded { reason, .. } => Some(reason),
            Self::Generated(_) => None,
        }
    }

    pub fn result(&self) -> &StructuredCaptionResult {
        match self {
            Self::Generated(result) | Self::Degraded { result, .. } => result,
        }
    }

    pub fn into_result(self) -> StructuredCaptionResult {
        match self {
            Self::Generated(result) | Self::Degraded { result, .. } => result,
        }
    }
}

/// Parse a generator reply into the two-key contract.
///
/// Accepts the object bare or inside a ```json fence, `caption` as an alias of
/// `refined_caption`, and `keywords` as an array or a comma separated string.
/// A missing narrative becomes [`MISSING_CAPTION_PLACEHOLDER`], missing keywords
/// an empty list. Anything that is not a JSON object is an error.
pub fn parse_structured_response(
    text: &str,
    max_keywords: usize,
) -> Result<StructuredCaptionResult, String> {
    let body = strip_code_fence(text);
    let value: Value = serde_json::from_str(body).map_err(|e| e.to_string())?;
    let Value::Object(object) = value else {
        return Err(format!("expected a JSON object, got {}", body));
    };

    let refined_caption = ["refined_caption", "caption"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(MISSING_CAPTION_PLACEHOLDER)
        .to_string();

    Ok(StructuredCaptionResult {
        refined_caption,
        keywords: parse_keywords(&object, max_keywords),
    })
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // drop the language tag line
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

fn parse_keywords(object: &Map<String, Value>, max_keywords: usize) -> Vec<String> {
    let raw: Vec<String> = match object.get("keywords") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(v) => Some(v.clone()),
                Value::Number(v) => Some(v.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(joined)) => joined.split(',').map(|v| v.to_string()).collect(),
        _ => vec![],
    };

    raw.into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .take(max_keywords)
        .collect()
}

/// Sends a [`GenerationPrompt`] to the chat transport and enforces the
/// structured response contract. Never fails: every problem is reported as
/// [`GenerationOutcome::Degraded`].
pub struct StructuredGenerationClient {
    config: GenerationConfig,
    chat: Arc<dyn Chat>,
    usage: Option<Arc<DailyUsageCounter>>,
}

impl StructuredGenerationClient {
    pub fn new(config: GenerationConfig, chat: Arc<dyn Chat>) -> Self {
        let usage = config
            .daily_token_limit
            .map(|limit| Arc::new(DailyUsageCounter::new(limit)));
        Self {
            config,
            chat,
            usage,
        }
    }

    /// Build with an OpenAI compatible transport. Without a key the transport is
    /// still created but never called.
    pub fn from_config(config: GenerationConfig) -> anyhow::Result<Self> {
        let api_key = config.api_key.clone().unwrap_or_default();
        let chat = OpenAI::new(&config.base_url, api_key.trim(), &config.model)?;
        Ok(Self::new(config, Arc::new(chat)))
    }

    pub fn with_usage_counter(mut self, usage: Option<Arc<DailyUsageCounter>>) -> Self {
        self.usage = usage;
        self
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn usage(&self) -> Option<&Arc<DailyUsageCounter>> {
        self.usage.as_ref()
    }

    pub fn has_credential(&self) -> bool {
        self.config.has_credential()
    }

    pub(crate) fn chat(&self) -> &dyn Chat {
        self.chat.as_ref()
    }

    #[tracing::instrument(name = "StructuredGenerationClient::generate", skip_all, fields(version = prompt.version))]
    pub async fn generate(&self, prompt: &GenerationPrompt) -> GenerationOutcome {
        if !self.has_credential() {
            warn!("LLM call skipped: API key is not configured");
            return GenerationOutcome::degraded(DegradeReason::MissingCredential);
        }

        let language = self.config.language;
        let estimated_input = estimate_tokens(&prompt.system, language)
            + estimate_tokens(&prompt.user, language);
        if let Some(usage) = &self.usage {
            if !usage.allows(estimated_input) {
                warn!(
                    "daily token limit {} reached, estimated input {}",
                    usage.limit(),
                    estimated_input
                );
                return GenerationOutcome::degraded(DegradeReason::RateLimited);
            }
        }

        let history = vec![
            LLMMessage::System(prompt.system.clone()),
            LLMMessage::User(prompt.user.clone()),
        ];
        let params = LLMParams {
            temperature: Some(self.config.temperature),
            response_format: Some(ResponseFormat::JsonObject),
            ..Default::default()
        };

        let start = Instant::now();
        let reply = tokio::time::timeout(
            self.config.timeout,
            self.chat.get_completion(history, Some(params)),
        )
        .await;
        debug!("LLM call time: {:?}", start.elapsed());

        let text = match reply {
            Err(_) => {
                error!("LLM call timed out after {:?}", self.config.timeout);
                return GenerationOutcome::degraded(DegradeReason::Timeout(self.config.timeout));
            }
            Ok(Err(e)) => {
                error!("error calling LLM: {:#}", e);
                return GenerationOutcome::degraded(DegradeReason::Transport(format!("{:#}", e)));
            }
            Ok(Ok(text)) => text,
        };

        if let Some(usage) = &self.usage {
            usage.record(estimated_input, estimate_tokens(&text, language));
        }

        match parse_structured_response(&text, prompt.max_keywords) {
            Ok(result) => {
                info!("generated diary with {} keywords", result.keywords.len());
                GenerationOutcome::Generated(result)
            }
            Err(e) => {
                error!("failed to parse LLM response: {}, raw: {}", e, text);
                GenerationOutcome::degraded(DegradeReason::Malformed(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockChat, Reply};
    use crate::{PromptBuilder, PromptStyle};

    fn config() -> GenerationConfig {
        GenerationConfig {
            api_key: Some("sk-test".into()),
            timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn prompt() -> GenerationPrompt {
        PromptBuilder::default().build("a white wall", Some("a calm afternoon"))
    }

    #[test_log::test(tokio::test)]
    async fn parses_two_key_contract() {
        let chat = Arc::new(MockChat::text(r#"{"refined_caption": "X", "keywords": ["a","b"]}"#));
        let client = StructuredGenerationClient::new(config(), chat.clone());

        let outcome = client.generate(&prompt()).await;
        assert_eq!(
            outcome,
            GenerationOutcome::Generated(StructuredCaptionResult {
                refined_caption: "X".into(),
                keywords: vec!["a".into(), "b".into()],
            })
        );
        assert_eq!(chat.calls(), 1);

        let requests = chat.requests.lock().unwrap();
        let (history, params) = &requests[0];
        assert!(matches!(&history[0], LLMMessage::System(v) if v.contains("refined_caption")));
        assert!(matches!(&history[1], LLMMessage::User(v) if v.contains("a calm afternoon")));
        let params = params.as_ref().unwrap();
        assert_eq!(params.response_format, Some(ResponseFormat::JsonObject));
        assert_eq!(params.temperature, Some(0.3));
    }

    #[test_log::test(tokio::test)]
    async fn malformed_json_degrades() {
        let chat = Arc::new(MockChat::text("sure! here is your diary"));
        let client = StructuredGenerationClient::new(config(), chat.clone());

        let outcome = client.generate(&prompt()).await;
        assert!(matches!(
            outcome.degrade_reason(),
            Some(DegradeReason::Malformed(_))
        ));
        assert!(outcome.result().has_failure_marker());
        assert!(outcome.result().keywords.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn missing_credential_never_calls_transport() {
        let chat = Arc::new(MockChat::text(r#"{"refined_caption": "X", "keywords": []}"#));
        let client = StructuredGenerationClient::new(
            GenerationConfig {
                api_key: None,
                ..config()
            },
            chat.clone(),
        );

        let outcome = client.generate(&prompt()).await;
        assert_eq!(chat.calls(), 0);
        assert_eq!(
            outcome.result().refined_caption,
            "LLM API 호출 실패: ChatGPT API 키가 설정되지 않았습니다."
        );
        assert_eq!(
            outcome.degrade_reason(),
            Some(&DegradeReason::MissingCredential)
        );
    }

    #[test_log::test(tokio::test)]
    async fn transport_error_degrades_with_reason() {
        let chat = Arc::new(MockChat::new(vec![Reply::Fail("connection refused".into())]));
        let client = StructuredGenerationClient::new(config(), chat.clone());

        let outcome = client.generate(&prompt()).await;
        assert_eq!(
            outcome.result().refined_caption,
            "LLM API 호출 실패: connection refused"
        );
        assert!(outcome.result().keywords.is_empty());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn timeout_cancels_the_call() {
        let chat = Arc::new(MockChat::new(vec![Reply::Hang]));
        let client = StructuredGenerationClient::new(config(), chat.clone());

        let outcome = client.generate(&prompt()).await;
        assert_eq!(
            outcome.degrade_reason(),
            Some(&DegradeReason::Timeout(Duration::from_secs(5)))
        );
        assert_eq!(chat.calls(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn daily_limit_gates_and_counts_only_completed_calls() {
        let chat = Arc::new(MockChat::new(vec![
            Reply::Fail("boom".into()),
            Reply::Text(r#"{"refined_caption": "하루", "keywords": "a, b"}"#.into()),
        ]));
        let client = StructuredGenerationClient::new(
            GenerationConfig {
                daily_token_limit: Some(10_000),
                ..config()
            },
            chat.clone(),
        );
        let usage = client.usage().unwrap().clone();

        assert!(client.generate(&prompt()).await.is_degraded());
        assert_eq!(usage.snapshot().total(), 0);

        let outcome = client.generate(&prompt()).await;
        assert_eq!(outcome.result().keywords, vec!["a", "b"]);
        let used = usage.snapshot().total();
        assert!(used > 0);

        // a limit the prompt alone exceeds
        let tight = StructuredGenerationClient::new(
            GenerationConfig {
                daily_token_limit: Some(10),
                ..config()
            },
            chat.clone(),
        );
        let before = chat.calls();
        let outcome = tight.generate(&prompt()).await;
        assert_eq!(outcome.degrade_reason(), Some(&DegradeReason::RateLimited));
        assert!(outcome
            .result()
            .refined_caption
            .contains("일일 토큰 사용량 제한에 도달했습니다"));
        assert_eq!(chat.calls(), before);
    }

    #[test_log::test(tokio::test)]
    async fn keywords_follow_the_prompt_style_cap() {
        let chat = Arc::new(MockChat::text(
            r#"{"refined_caption": "X", "keywords": ["a", "b", "c", "d", "e"]}"#,
        ));
        let client = StructuredGenerationClient::new(config(), chat.clone());
        let prompt = PromptBuilder::new(PromptStyle {
            max_keywords: 3,
            ..Default::default()
        })
        .build("a white wall", None);
        assert_eq!(prompt.max_keywords, 3);

        let outcome = client.generate(&prompt).await;
        assert_eq!(outcome.result().keywords, vec!["a", "b", "c"]);
    }

    #[test]
    fn parser_accepts_legacy_shapes() {
        let fenced = "```json\n{\"caption\": \" 바다에 갔다. \", \"keywords\": \"바다, , 모래,파도\"}\n```";
        let result = parse_structured_response(fenced, 10).unwrap();
        assert_eq!(result.refined_caption, "바다에 갔다.");
        assert_eq!(result.keywords, vec!["바다", "모래", "파도"]);

        let many: Vec<String> = (0..15).map(|i| format!("k{i}")).collect();
        let text = serde_json::json!({"refined_caption": "x", "keywords": many}).to_string();
        assert_eq!(parse_structured_response(&text, 10).unwrap().keywords.len(), 10);
    }

    #[test]
    fn parser_substitutes_placeholders() {
        let result = parse_structured_response(r#"{"keywords": ["a"]}"#, 10).unwrap();
        assert_eq!(result.refined_caption, MISSING_CAPTION_PLACEHOLDER);
        assert_eq!(result.keywords, vec!["a"]);

        let result = parse_structured_response(r#"{"refined_caption": "x"}"#, 10).unwrap();
        assert!(result.keywords.is_empty());

        assert!(parse_structured_response("[1, 2]", 10).is_err());
        assert!(parse_structured_response("", 10).is_err());
    }
}
