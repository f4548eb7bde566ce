//! OpenAI Chat Completions API client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::provider::{classify_status, retry_after, LlmProvider, ProviderError, ProviderResult};
use super::{
    CompletionRequest, CompletionResponse, FinishReason, ModelConfig, ModelProviderName, Role,
    ToolCall, Usage,
};
use crate::auth::OPENAI_API_BASE;

const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool<'a>>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: Role,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct OpenAiTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OpenAiFunction<'a>,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    /// JSON-encoded arguments.
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// OpenAI API client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_base: String,
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            api_base: OPENAI_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl LlmProvider for OpenAiClient {
    fn name(&self) -> ModelProviderName {
        ModelProviderName::OpenAI
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        config: &ModelConfig,
        token: &str,
    ) -> ProviderResult<CompletionResponse> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = build_request(request, config);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<OpenAiError>(&text) {
                Ok(OpenAiError { error }) => {
                    let kind = error.code.as_deref().or(error.error_type.as_deref());
                    classify_status(
                        status.as_u16(),
                        kind,
                        format!("OpenAI API error: {}", error.message),
                        retry,
                    )
                }
                Err(_) => classify_status(
                    status.as_u16(),
                    None,
                    format!("OpenAI API error: {}", text),
                    retry,
                ),
            });
        }

        let data: OpenAiResponse = response.json().await?;
        convert_response(data, config)
    }
}

fn build_request<'a>(request: &'a CompletionRequest, config: &'a ModelConfig) -> OpenAiRequest<'a> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = request.system_prompt.as_deref() {
        messages.push(OpenAiMessage {
            role: Role::System,
            content: system,
            tool_call_id: None,
        });
    }
    messages.extend(request.messages.iter().map(|m| OpenAiMessage {
        role: m.role,
        content: &m.content,
        tool_call_id: m.tool_call_id.as_deref(),
    }));

    let tools = request
        .tools
        .iter()
        .map(|t| OpenAiTool {
            kind: "function",
            function: OpenAiFunction {
                name: &t.name,
                description: &t.description,
                parameters: &t.parameters,
            },
        })
        .collect();

    OpenAiRequest {
        model: &config.model,
        messages,
        max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        tools,
    }
}

fn convert_response(data: OpenAiResponse, config: &ModelConfig) -> ProviderResult<CompletionResponse> {
    let choice = data
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Other("OpenAI response had no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| {
            let arguments = serde_json::from_str(&call.function.arguments).map_err(|e| {
                ProviderError::Other(format!(
                    "Malformed arguments for tool {}: {}",
                    call.function.name, e
                ))
            })?;
            Ok(ToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            })
        })
        .collect::<ProviderResult<Vec<_>>>()?;

    let finish_reason = match choice.finish_reason.as_deref() {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("tool_calls") | Some("function_call") => FinishReason::ToolCalls,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    };

    Ok(CompletionResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        usage: data
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens)),
        model: config.id(),
        finish_reason,
    })
}
