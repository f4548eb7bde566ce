//! Model providers and the request router.
//!
//! Each provider client turns a [`CompletionRequest`] into one non-streaming
//! call against its HTTP API. The [`ModelRouter`] picks the provider from the
//! current model id, fetches a token through the auth hub and handles retry
//! and fallback.
//!
//! Supported providers:
//! - Anthropic (Messages API)
//! - OpenAI (Chat Completions API)
//! - Google (Gemini `generateContent`)

mod anthropic;
mod catalog;
mod google;
mod openai;
mod provider;
mod router;

pub use anthropic::AnthropicClient;
pub use catalog::{
    aliases, models_for, resolve_alias, ModelCapability, ModelDefinition, ModelInfo, Pricing,
    DEFAULT_FALLBACK_MODELS, DEFAULT_MODEL,
};
pub use google::GoogleClient;
pub use openai::OpenAiClient;
pub use provider::{classify_status, LlmProvider, ProviderError, ProviderResult};
pub use router::{parse_model_id, ModelRouter, RouteOptions};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::auth::AuthProviderName;
use crate::error::HubError;

/// Providers that serve completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProviderName {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    Google,
}

impl ModelProviderName {
    pub const fn all() -> &'static [ModelProviderName] {
        &[
            ModelProviderName::Anthropic,
            ModelProviderName::OpenAI,
            ModelProviderName::Google,
        ]
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ModelProviderName::Anthropic => "anthropic",
            ModelProviderName::OpenAI => "openai",
            ModelProviderName::Google => "google",
        }
    }

    pub const fn display_name(&self) -> &'static str {
        match self {
            ModelProviderName::Anthropic => "Anthropic",
            ModelProviderName::OpenAI => "OpenAI",
            ModelProviderName::Google => "Google",
        }
    }

    /// Auth provider holding this provider's credentials.
    pub const fn auth_provider(&self) -> AuthProviderName {
        match self {
            ModelProviderName::Anthropic => AuthProviderName::Claude,
            ModelProviderName::OpenAI => AuthProviderName::Codex,
            ModelProviderName::Google => AuthProviderName::Gemini,
        }
    }
}

impl fmt::Display for ModelProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelProviderName {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAI),
            "google" => Ok(Self::Google),
            other => Err(HubError::Validation(format!("Unknown provider: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Set on `Role::Tool` messages answering a tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// A function the model may call. `parameters` is a JSON schema object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

impl CompletionRequest {
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(prompt)],
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// The explicit system prompt, else the first system message.
    pub fn effective_system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref().or_else(|| {
            self.messages
                .iter()
                .find(|m| m.role == Role::System)
                .map(|m| m.content.as_str())
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Canonical id of the model that produced this response.
    pub model: String,
    pub finish_reason: FinishReason,
}

/// The model a request is sent to, plus sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub provider: ModelProviderName,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelConfig {
    pub fn new(provider: ModelProviderName, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Canonical `provider/model` id.
    pub fn id(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}
