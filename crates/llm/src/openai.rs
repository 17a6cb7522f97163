use crate::{Chat, LLMMessage, LLMParams};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, AUTHORIZATION},
    Url,
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

pub struct OpenAI {
    base_url: Url,
    model: String,
    headers: HeaderMap,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatResponseChoice>,
}

impl OpenAI {
    /// Create a new OpenAI compatible chat completion client.
    pub fn new(base_url: &str, api_key: &str, model: &str) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, format!("Bearer {}", api_key).parse()?);

        Ok(Self {
            base_url,
            model: model.to_string(),
            headers,
            client: reqwest::Client::new(),
        })
    }

    fn completions_url(&self) -> anyhow::Result<Url> {
        let query = self.base_url.query().map(|v| v.to_string());
        let mut url = self.base_url.join("chat/completions")?;
        url.set_query(query.as_deref());
        Ok(url)
    }
}

#[async_trait]
impl Chat for OpenAI {
    async fn get_completion(
        &self,
        history: Vec<LLMMessage>,
        params: Option<LLMParams>,
    ) -> anyhow::Result<String> {
        let url = self.completions_url()?;
        let params = params.unwrap_or_default();

        let mut body = json!({
            "model": &self.model,
            "messages": history,
        });
        if let Some(temperature) = params.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(seed) = params.seed {
            body["seed"] = json!(seed);
        }
        if let Some(max_tokens) = params.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(format) = params.response_format {
            body["response_format"] = json!({ "type": format });
        }

        debug!("openai url: {}", url);

        let resp = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            bail!("error from LLM server ({}): {}", status, resp.text().await?);
        }

        let response: ChatResponse = resp.json().await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(anyhow!("no choices in response"))?;

        if let Some(finish_reason) = &choice.finish_reason {
            debug!("LLM finish reason: {:?}", finish_reason);
        }

        choice
            .message
            .content
            .ok_or(anyhow!("empty message in response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResponseFormat;

    #[test]
    fn completions_url_keeps_base_path_and_query() {
        let client = OpenAI::new("https://example.com/v1?api-version=1", "sk", "m").unwrap();
        assert_eq!(
            client.completions_url().unwrap().as_str(),
            "https://example.com/v1/chat/completions?api-version=1"
        );

        let client = OpenAI::new("https://api.openai.com/v1/", "sk", "m").unwrap();
        assert_eq!(
            client.completions_url().unwrap().as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn messages_serialize_as_chat_roles() {
        let value = serde_json::to_value(vec![
            LLMMessage::System("rules".into()),
            LLMMessage::User("hi".into()),
        ])
        .unwrap();
        assert_eq!(
            value,
            json!([
                {"role": "system", "content": "rules"},
                {"role": "user", "content": "hi"}
            ])
        );
        assert_eq!(json!(ResponseFormat::JsonObject), json!("json_object"));
    }
}
