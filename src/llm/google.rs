//! Google Gemini `generateContent` client.
//!
//! API keys go in the `key` query parameter; OAuth access tokens are sent as
//! a bearer token.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::provider::{classify_status, retry_after, LlmProvider, ProviderError, ProviderResult};
use super::{
    CompletionRequest, CompletionResponse, FinishReason, ModelConfig, ModelProviderName, Role,
    ToolCall, Usage,
};
use crate::auth::GEMINI_API_BASE;

const DEFAULT_MAX_TOKENS: u32 = 8192;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Google API keys all carry this prefix.
const API_KEY_PREFIX: &str = "AIza";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent<'a>>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool<'a> {
    function_declarations: Vec<FunctionDeclaration<'a>>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Gemini API client.
#[derive(Debug, Clone)]
pub struct GoogleClient {
    client: Client,
    api_base: String,
}

impl Default for GoogleClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GoogleClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            api_base: GEMINI_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl LlmProvider for GoogleClient {
    fn name(&self) -> ModelProviderName {
        ModelProviderName::Google
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        config: &ModelConfig,
        token: &str,
    ) -> ProviderResult<CompletionResponse> {
        let url = format!("{}/models/{}:generateContent", self.api_base, config.model);
        let body = build_request(request, config);

        let mut builder = self.client.post(&url).json(&body);
        builder = if token.starts_with(API_KEY_PREFIX) {
            builder.query(&[("key", token)])
        } else {
            builder.bearer_auth(token)
        };
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let retry = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<GeminiError>(&text) {
                Ok(GeminiError { error }) => classify_status(
                    status.as_u16(),
                    error.status.as_deref(),
                    format!("Google AI API error: {}", error.message),
                    retry,
                ),
                Err(_) => classify_status(
                    status.as_u16(),
                    None,
                    format!("Google AI API error: {}", text),
                    retry,
                ),
            });
        }

        let data: GeminiResponse = response.json().await?;
        convert_response(data, config)
    }
}

fn build_request<'a>(request: &'a CompletionRequest, config: &ModelConfig) -> GeminiRequest<'a> {
    let contents = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| GeminiContent {
            role: Some(if m.role == Role::Assistant { "model" } else { "user" }),
            parts: vec![TextPart { text: &m.content }],
        })
        .collect();

    let system_instruction = request.effective_system_prompt().map(|text| GeminiContent {
        role: None,
        parts: vec![TextPart { text }],
    });

    let tools = if request.tools.is_empty() {
        Vec::new()
    } else {
        vec![GeminiTool {
            function_declarations: request
                .tools
                .iter()
                .map(|t| FunctionDeclaration {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                })
                .collect(),
        }]
    };

    GeminiRequest {
        contents,
        system_instruction,
        generation_config: GenerationConfig {
            max_output_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        },
        tools,
    }
}

fn convert_response(data: GeminiResponse, config: &ModelConfig) -> ProviderResult<CompletionResponse> {
    let candidate = data
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Other("Gemini response had no candidates".to_string()))?;

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(text) = part.text {
            content.push_str(&text);
        }
        if let Some(call) = part.function_call {
            tool_calls.push(ToolCall {
                id: format!("call_{}", tool_calls.len()),
                name: call.name,
                arguments: call.args,
            });
        }
    }

    let finish_reason = if !tool_calls.is_empty() {
        FinishReason::ToolCalls
    } else {
        match candidate.finish_reason.as_deref() {
            Some("STOP") => FinishReason::Stop,
            Some("MAX_TOKENS") => FinishReason::Length,
            Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        }
    };

    Ok(CompletionResponse {
        content,
        tool_calls,
        usage: data
            .usage_metadata
            .map(|u| Usage::new(u.prompt_token_count, u.candidates_token_count)),
        model: config.id(),
        finish_reason,
    })
}
