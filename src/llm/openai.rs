//! OpenAI-compatible chat-completions adapter behind the abstract
//! `LanguageModel` trait. Works against any endpoint speaking the same
//! dialect via `base_url`.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use openbrowser_agent::{
    ContentPart, FinishReason, InvokeRequest, InvokeResponse, LanguageModel, Message, ModelError,
    UserContent,
};
use openbrowser_core_types::TokenUsage;
use serde_json::{json, Value};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl OpenAiConfig {
    /// Build from `OPENAI_API_KEY` / `OPENAI_BASE_URL`.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ModelError> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| ModelError::Provider("OPENAI_API_KEY is not set".into()))?;
        let base_url = env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        Ok(Self {
            api_key,
            base_url,
            model: model.into(),
        })
    }
}

pub struct OpenAiModel {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiModel {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn render_messages(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|message| match message {
                Message::System { content } => json!({ "role": "system", "content": content }),
                Message::Assistant { content } => {
                    json!({ "role": "assistant", "content": content })
                }
                Message::ToolResult { id, content } => json!({
                    "role": "tool", "tool_call_id": id, "content": content
                }),
                Message::User { content } => match content {
                    UserContent::Text(text) => json!({ "role": "user", "content": text }),
                    UserContent::Parts(parts) => {
                        let rendered: Vec<Value> = parts
                            .iter()
                            .map(|part| match part {
                                ContentPart::Text { text } => {
                                    json!({ "type": "text", "text": text })
                                }
                                ContentPart::Image { media_type, data } => json!({
                                    "type": "image_url",
                                    "image_url": {
                                        "url": format!("data:{media_type};base64,{data}")
                                    }
                                }),
                            })
                            .collect();
                        json!({ "role": "user", "content": rendered })
                    }
                },
            })
            .collect()
    }

    fn map_finish_reason(raw: Option<&str>) -> FinishReason {
        match raw {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some("tool_calls") => FinishReason::ToolCalls,
            Some(_) => FinishReason::Other,
            None => FinishReason::Other,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse, ModelError> {
        let schema_name = request
            .schema_name
            .clone()
            .unwrap_or_else(|| "response".to_string());
        let body = json!({
            "model": self.config.model,
            "messages": Self::render_messages(&request.messages),
            "temperature": request.temperature.unwrap_or(0.0),
            "max_tokens": request.max_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema_name,
                    "schema": request.response_schema,
                }
            }
        });

        let timeout = request.timeout.unwrap_or(Duration::from_secs(30));
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ModelError::Timeout
                } else {
                    ModelError::Provider(err.to_string())
                }
            })?;

        if response.status().as_u16() == 429 {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1_000);
            return Err(ModelError::Throttled { retry_after_ms });
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ModelError::Provider(format!("{status}: {text}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| ModelError::Provider(err.to_string()))?;

        let choice = payload
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| ModelError::InvalidResponse("no choices in response".into()))?;
        let content = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| ModelError::InvalidResponse("choice has no content".into()))?;
        let parsed: Value = serde_json::from_str(content)
            .map_err(|err| ModelError::InvalidResponse(format!("content is not JSON: {err}")))?;

        let usage = payload.get("usage").map(|u| TokenUsage {
            prompt_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
            completion_tokens: u
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            total_tokens: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(0),
        });

        debug!(
            target: "llm-openai",
            model = %self.config.model,
            tokens = usage.map(|u| u.total_tokens).unwrap_or(0),
            "inference completed"
        );

        Ok(InvokeResponse {
            parsed,
            usage: usage.unwrap_or_default(),
            finish_reason: Self::map_finish_reason(
                choice.get("finish_reason").and_then(Value::as_str),
            ),
        })
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}
