//! Anthropic (Claude) Messages API client.
//!
//! See: https://docs.anthropic.com/en/api/messages

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::provider::{classify_status, retry_after, LlmProvider, ProviderResult};
use super::{
    CompletionRequest, CompletionResponse, FinishReason, ModelConfig, ModelProviderName, Role,
    ToolCall, Usage,
};
use crate::auth::ANTHROPIC_API_BASE;

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Request body for Anthropic Messages API.
#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool<'a>>,
}

/// Anthropic only accepts "user" and "assistant" roles; the system prompt
/// is a separate field.
#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

/// Error response from Anthropic API.
#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Anthropic API client.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: Client,
    api_base: String,
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            api_base: ANTHROPIC_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl LlmProvider for AnthropicClient {
    fn name(&self) -> ModelProviderName {
        ModelProviderName::Anthropic
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        config: &ModelConfig,
        token: &str,
    ) -> ProviderResult<CompletionResponse> {
        let url = format!("{}/messages", self.api_base);
        let body = build_request(request, config);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", token)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<AnthropicError>(&text) {
                Ok(error) => classify_status(
                    status.as_u16(),
                    Some(&error.error.error_type),
                    format!("Anthropic API error: {}", error.error.message),
                    retry,
                ),
                Err(_) => classify_status(
                    status.as_u16(),
                    None,
                    format!("Anthropic API error: {}", text),
                    retry,
                ),
            });
        }

        let data: AnthropicResponse = response.json().await?;
        Ok(convert_response(data, config))
    }
}

fn build_request<'a>(request: &'a CompletionRequest, config: &'a ModelConfig) -> AnthropicRequest<'a> {
    let messages = request
        .messages
        .iter()
        .filter_map(|m| {
            let role = match m.role {
                Role::User | Role::Tool => "user",
                Role::Assistant => "assistant",
                Role::System => return None,
            };
            Some(AnthropicMessage {
                role,
                content: &m.content,
            })
        })
        .collect();

    let tools = request
        .tools
        .iter()
        .map(|t| AnthropicTool {
            name: &t.name,
            description: &t.description,
            input_schema: &t.parameters,
        })
        .collect();

    AnthropicRequest {
        model: &config.model,
        messages,
        max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        system: request.effective_system_prompt(),
        tools,
    }
}

fn convert_response(data: AnthropicResponse, config: &ModelConfig) -> CompletionResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    for block in data.content {
        match block {
            ContentBlock::Text { text } => content.push_str(&text),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
            ContentBlock::Unknown => {}
        }
    }

    let finish_reason = match data.stop_reason.as_deref() {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("refusal") => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    };

    CompletionResponse {
        content,
        tool_calls,
        usage: data
            .usage
            .map(|u| Usage::new(u.input_tokens, u.output_tokens)),
        model: config.id(),
        finish_reason,
    }
}
