//! The structured-output inference contract the loop runs against.
//!
//! Providers plug in behind [`LanguageModel`]; the core never sees
//! provider specifics, only messages in, parsed JSON plus usage out.

use std::time::Duration;

use async_trait::async_trait;
use openbrowser_core_types::TokenUsage;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use openbrowser_commands::Command;

/// One part of a multi-part user message.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// Base64 payload with its media type, e.g. `image/png`.
    Image { media_type: String, data: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System { content: String },
    User { content: UserContent },
    Assistant { content: String },
    ToolResult { id: String, content: String },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: UserContent::Text(content.into()),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::User {
            content: UserContent::Parts(parts),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    /// Rough accounting at ~4 characters per token.
    pub fn estimated_tokens(&self) -> usize {
        let chars = match self {
            Message::System { content }
            | Message::Assistant { content }
            | Message::ToolResult { content, .. } => content.chars().count(),
            Message::User { content } => match content {
                UserContent::Text(text) => text.chars().count(),
                UserContent::Parts(parts) => parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => text.chars().count(),
                        // Images are billed separately by providers; count
                        // a flat placeholder.
                        ContentPart::Image { .. } => 4_000,
                    })
                    .sum(),
            },
        };
        chars / 4
    }
}

#[derive(Clone, Debug)]
pub struct InvokeRequest {
    pub messages: Vec<Message>,
    pub response_schema: Value,
    pub schema_name: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Option<Duration>,
    pub cache: bool,
    pub thinking_budget: Option<u32>,
}

impl InvokeRequest {
    pub fn new(messages: Vec<Message>, response_schema: Value) -> Self {
        Self {
            messages,
            response_schema,
            schema_name: None,
            temperature: None,
            max_tokens: None,
            timeout: None,
            cache: false,
            thinking_budget: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
}

#[derive(Clone, Debug)]
pub struct InvokeResponse {
    pub parsed: Value,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Error, Clone)]
pub enum ModelError {
    #[error("model throttled{}", retry_after_ms.map(|ms| format!(" (retry after {ms}ms)")).unwrap_or_default())]
    Throttled { retry_after_ms: Option<u64> },

    #[error("model call timed out")]
    Timeout,

    #[error("model returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("provider error: {0}")]
    Provider(String),
}

/// Structured-output inference over any provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse, ModelError>;

    fn name(&self) -> &str {
        "language-model"
    }
}

/// The planner's per-step self-assessment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CurrentState {
    /// How well the previous step's goal was achieved.
    pub evaluation: String,
    /// Facts to carry forward.
    pub memory: String,
    /// Immediate objective for this step's actions.
    pub next_goal: String,
}

/// The decision the model must produce each step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentDecision {
    pub current_state: CurrentState,
    pub actions: Vec<Command>,
}

impl AgentDecision {
    pub fn response_schema() -> Value {
        serde_json::to_value(schema_for!(AgentDecision)).unwrap_or_else(|_| Value::Null)
    }

    /// Parse a raw model payload, tolerating omitted `params` on
    /// parameterless actions.
    pub fn parse(mut value: Value) -> Result<Self, ModelError> {
        if let Some(actions) = value.get_mut("actions").and_then(Value::as_array_mut) {
            for action in actions {
                if let Some(obj) = action.as_object_mut() {
                    obj.entry("params")
                        .or_insert_with(|| Value::Object(Default::default()));
                }
            }
        }
        serde_json::from_value(value).map_err(|err| ModelError::InvalidResponse(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_parses_wire_shape() {
        let raw = serde_json::json!({
            "currentState": {
                "evaluation": "Success",
                "memory": "on results page",
                "nextGoal": "open first result"
            },
            "actions": [
                { "name": "tap", "params": { "index": 3 } },
                { "name": "read_page" }
            ]
        });
        let decision = AgentDecision::parse(raw).expect("parse");
        assert_eq!(decision.actions.len(), 2);
        assert_eq!(decision.actions[0].name(), "tap");
        assert_eq!(decision.actions[1].name(), "read_page");
        assert_eq!(decision.current_state.next_goal, "open first result");
    }

    #[test]
    fn invalid_action_is_rejected() {
        let raw = serde_json::json!({
            "currentState": { "evaluation": "", "memory": "", "nextGoal": "" },
            "actions": [{ "name": "warp", "params": {} }]
        });
        assert!(AgentDecision::parse(raw).is_err());
    }

    #[test]
    fn schema_mentions_both_sections() {
        let schema = AgentDecision::response_schema();
        let text = schema.to_string();
        assert!(text.contains("currentState"));
        assert!(text.contains("actions"));
    }

    #[test]
    fn token_estimate_counts_characters() {
        let message = Message::user("a".repeat(400));
        assert_eq!(message.estimated_tokens(), 100);
    }
}
