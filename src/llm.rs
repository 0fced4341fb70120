//! Chat-completion backends used for classification and answer generation.
//!
//! [`ChatModel`] is the seam the classifier and the semantic strategy call
//! through. [`OpenAIChat`] speaks the OpenAI chat-completions protocol,
//! either against the public API or an Azure OpenAI deployment.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::LlmConfig;
use crate::error::BackendError;
use crate::http::{api_key_from_env, send_json};

/// A single system + user exchange.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub system: &'a str,
    pub user: &'a str,
    pub temperature: Option<f32>,
    /// Ask the backend to constrain output to a JSON object.
    pub json_mode: bool,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    /// Returns the assistant message text.
    async fn complete(&self, request: &ChatRequest<'_>) -> Result<String, BackendError>;
}

/// Chat model that refuses every request; used when `llm.provider = "disabled"`.
pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &ChatRequest<'_>) -> Result<String, BackendError> {
        Err(BackendError::Unavailable("LLM provider is disabled".to_string()))
    }
}

/// OpenAI-protocol chat completions.
///
/// - `openai`: `POST {url}/v1/chat/completions`, bearer token.
/// - `azure`: `POST {url}/openai/deployments/{model}/chat/completions?api-version=…`,
///   `api-key` header; `model` names the deployment.
pub struct OpenAIChat {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    azure: bool,
    model: String,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig, model: &str, client: reqwest::Client) -> anyhow::Result<Self> {
        let api_key = api_key_from_env(&config.api_key_env)?;
        let azure = config.provider == "azure";

        let endpoint = if azure {
            let base = config
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("llm.url required for azure provider"))?;
            format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                base.trim_end_matches('/'),
                model,
                config.api_version
            )
        } else {
            let base = config.url.as_deref().unwrap_or("https://api.openai.com");
            format!("{}/v1/chat/completions", base.trim_end_matches('/'))
        };

        Ok(Self {
            client,
            endpoint,
            api_key,
            azure,
            model: model.to_string(),
        })
    }

    fn request_body(&self, request: &ChatRequest<'_>) -> Value {
        let mut body = json!({
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
        });
        if !self.azure {
            body["model"] = json!(self.model);
        }
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest<'_>) -> Result<String, BackendError> {
        let builder = self.client.post(&self.endpoint);
        let builder = if self.azure {
            builder.header("api-key", &self.api_key)
        } else {
            builder.header("Authorization", format!("Bearer {}", self.api_key))
        };

        let json = send_json("llm", builder.json(&self.request_body(request))).await?;
        parse_chat_response(&json)
    }
}

/// Extract `choices[0].message.content` from a chat-completions response.
fn parse_chat_response(json: &Value) -> Result<String, BackendError> {
    let choice = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| BackendError::malformed("llm", "missing choices"))?;

    if choice.get("finish_reason").and_then(|r| r.as_str()) == Some("content_filter") {
        return Err(BackendError::malformed("llm", "response blocked by content filter"));
    }

    let content = choice
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default();

    if content.trim().is_empty() {
        return Err(BackendError::malformed("llm", "empty assistant message"));
    }
    Ok(content.to_string())
}

/// Create a chat model for `model` based on the `[llm]` configuration.
pub fn create_chat_model(
    config: &LlmConfig,
    model: &str,
    client: reqwest::Client,
) -> anyhow::Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChat)),
        "openai" | "azure" => Ok(Arc::new(OpenAIChat::new(config, model, client)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_response() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"query_type\":\"nl2sql\"}" } }]
        });
        assert_eq!(
            parse_chat_response(&body).unwrap(),
            "{\"query_type\":\"nl2sql\"}"
        );
    }

    #[test]
    fn test_parse_chat_response_empty_content() {
        let body = json!({ "choices": [{ "message": { "content": "  " } }] });
        assert!(parse_chat_response(&body).is_err());
    }

    #[test]
    fn test_parse_chat_response_content_filter() {
        let body = json!({
            "choices": [{ "finish_reason": "content_filter", "message": { "content": "x" } }]
        });
        let err = parse_chat_response(&body).unwrap_err();
        assert!(err.to_string().contains("content filter"));
    }

    #[test]
    fn test_parse_chat_response_no_choices() {
        assert!(parse_chat_response(&json!({ "choices": [] })).is_err());
    }

    #[tokio::test]
    async fn test_disabled_chat() {
        let req = ChatRequest {
            system: "s",
            user: "u",
            temperature: None,
            json_mode: false,
        };
        let err = DisabledChat.complete(&req).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
