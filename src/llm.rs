//! Language model abstraction and the Anthropic Messages API client.
//!
//! The orchestrator only depends on [`LanguageModel`]: given a system
//! prompt, the running message list and optionally the tool declarations,
//! the model either answers in text or asks for tool calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{ConfigError, ModelError};
use crate::tools::ToolDeclaration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One block of message content, in the Messages API wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Tool results travel back to the model as a user turn.
    pub fn tool_results(results: Vec<(String, String)>) -> Self {
        Self {
            role: Role::User,
            content: results
                .into_iter()
                .map(|(tool_use_id, content)| ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                })
                .collect(),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// What the model returned.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    /// A direct natural-language answer.
    Answer(String),
    /// One or more tool calls, with any text the model emitted alongside.
    ToolUse { text: String, calls: Vec<ToolCall> },
}

impl ModelResponse {
    /// Assistant message to append to the conversation before tool results.
    pub fn to_message(&self) -> Message {
        match self {
            ModelResponse::Answer(text) => Message::assistant(vec![ContentBlock::Text {
                text: text.clone(),
            }]),
            ModelResponse::ToolUse { text, calls } => {
                let mut content = Vec::with_capacity(calls.len() + 1);
                if !text.is_empty() {
                    content.push(ContentBlock::Text { text: text.clone() });
                }
                content.extend(calls.iter().map(|c| ContentBlock::ToolUse {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    input: c.arguments.clone(),
                }));
                Message::assistant(content)
            }
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// One round trip. `tools = None` forbids tool calls for this request.
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: Option<&[ToolDeclaration]>,
    ) -> Result<ModelResponse, ModelError>;
}

// ============ Anthropic ============

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client for `POST /v1/messages`.
///
/// Requires `ANTHROPIC_API_KEY`; construction fails without it.
pub struct AnthropicClient {
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(config: &LlmConfig) -> Result<Self, ConfigError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingCredential("ANTHROPIC_API_KEY"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }

    fn request_body(
        &self,
        system: &str,
        messages: &[Message],
        tools: Option<&[ToolDeclaration]>,
    ) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": system,
            "messages": messages,
        });
        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            body["tools"] = serde_json::json!(tools);
            body["tool_choice"] = serde_json::json!({ "type": "auto" });
        }
        body
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: Option<&[ToolDeclaration]>,
    ) -> Result<ModelResponse, ModelError> {
        let body = self.request_body(system, messages, tools);
        let url = format!("{}/v1/messages", self.base_url);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!("language model retry {} after {:?}", attempt, delay);
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: Value = response
                            .json()
                            .await
                            .map_err(|e| ModelError::Response(e.to_string()))?;
                        return parse_response(&json);
                    }
                    let text = response.text().await.unwrap_or_default();
                    let err = ModelError::Api {
                        status: status.as_u16(),
                        body: text,
                    };
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(ModelError::Transport(e.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ModelError::Transport("request failed".to_string())))
    }
}

/// Interpret a Messages API response body.
///
/// Block types other than text and tool use are ignored.
pub fn parse_response(json: &Value) -> Result<ModelResponse, ModelError> {
    let blocks = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ModelError::Response("missing content array".to_string()))?;

    let mut text = String::new();
    let mut calls = Vec::new();
    for block in blocks {
        match serde_json::from_value::<ContentBlock>(block.clone()) {
            Ok(ContentBlock::Text { text: t }) => text.push_str(&t),
            Ok(ContentBlock::ToolUse { id, name, input }) => calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
            _ => {}
        }
    }

    if calls.is_empty() {
        Ok(ModelResponse::Answer(text))
    } else {
        Ok(ModelResponse::ToolUse { text, calls })
    }
}
