//! Static model catalogs and the alias table.

use serde::Serialize;

use super::ModelProviderName;

/// Used when no model has been configured.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4-5";

/// Tried in order after the primary model is exhausted.
pub const DEFAULT_FALLBACK_MODELS: &[&str] = &["openai/gpt-5.2", "google/gemini-3-flash"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCapability {
    Chat,
    Vision,
    FunctionCalling,
    Reasoning,
    Coding,
    LongContext,
}

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pricing {
    pub input: f64,
    pub output: f64,
}

/// One model in a provider's static catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDefinition {
    pub id: &'static str,
    pub name: &'static str,
    pub context_window: u32,
    pub capabilities: &'static [ModelCapability],
    pub pricing: Pricing,
}

/// A catalog entry keyed by its canonical `provider/model` id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    pub provider: ModelProviderName,
    pub name: String,
    pub context_window: u32,
    pub capabilities: Vec<ModelCapability>,
    pub pricing: Pricing,
}

impl ModelInfo {
    pub fn new(provider: ModelProviderName, def: &ModelDefinition) -> Self {
        Self {
            id: format!("{}/{}", provider, def.id),
            provider,
            name: def.name.to_string(),
            context_window: def.context_window,
            capabilities: def.capabilities.to_vec(),
            pricing: def.pricing,
        }
    }
}

use ModelCapability::*;

const CLAUDE_CAPS: &[ModelCapability] = &[Chat, Vision, FunctionCalling];
const GPT_CAPS: &[ModelCapability] = &[Chat, Vision, FunctionCalling];
const GEMINI_CAPS: &[ModelCapability] = &[Chat, Vision, FunctionCalling, LongContext];

static ANTHROPIC_MODELS: &[ModelDefinition] = &[
    ModelDefinition {
        id: "claude-opus-4-5",
        name: "Claude Opus 4.5",
        context_window: 200_000,
        capabilities: CLAUDE_CAPS,
        pricing: Pricing { input: 15.0, output: 75.0 },
    },
    ModelDefinition {
        id: "claude-sonnet-4-5",
        name: "Claude Sonnet 4.5",
        context_window: 200_000,
        capabilities: CLAUDE_CAPS,
        pricing: Pricing { input: 3.0, output: 15.0 },
    },
    ModelDefinition {
        id: "claude-haiku-4-5",
        name: "Claude Haiku 4.5",
        context_window: 200_000,
        capabilities: CLAUDE_CAPS,
        pricing: Pricing { input: 1.0, output: 5.0 },
    },
    ModelDefinition {
        id: "claude-sonnet-4",
        name: "Claude Sonnet 4",
        context_window: 200_000,
        capabilities: CLAUDE_CAPS,
        pricing: Pricing { input: 3.0, output: 15.0 },
    },
    ModelDefinition {
        id: "claude-haiku-3-5",
        name: "Claude Haiku 3.5",
        context_window: 200_000,
        capabilities: CLAUDE_CAPS,
        pricing: Pricing { input: 0.8, output: 4.0 },
    },
];

static OPENAI_MODELS: &[ModelDefinition] = &[
    ModelDefinition {
        id: "gpt-5.2",
        name: "GPT-5.2",
        context_window: 400_000,
        capabilities: &[Chat, Vision, FunctionCalling, Reasoning, Coding],
        pricing: Pricing { input: 1.75, output: 14.0 },
    },
    ModelDefinition {
        id: "gpt-4o",
        name: "GPT-4o",
        context_window: 128_000,
        capabilities: GPT_CAPS,
        pricing: Pricing { input: 2.5, output: 10.0 },
    },
    ModelDefinition {
        id: "gpt-4-turbo",
        name: "GPT-4 Turbo",
        context_window: 128_000,
        capabilities: GPT_CAPS,
        pricing: Pricing { input: 10.0, output: 30.0 },
    },
    ModelDefinition {
        id: "o1",
        name: "o1",
        context_window: 128_000,
        capabilities: &[Chat, Reasoning],
        pricing: Pricing { input: 15.0, output: 60.0 },
    },
    ModelDefinition {
        id: "o1-mini",
        name: "o1 Mini",
        context_window: 128_000,
        capabilities: &[Chat, Reasoning, Coding],
        pricing: Pricing { input: 3.0, output: 12.0 },
    },
    ModelDefinition {
        id: "o3",
        name: "o3",
        context_window: 200_000,
        capabilities: &[Chat, Reasoning, Coding, FunctionCalling],
        pricing: Pricing { input: 2.0, output: 8.0 },
    },
];

static GOOGLE_MODELS: &[ModelDefinition] = &[
    ModelDefinition {
        id: "gemini-3-pro",
        name: "Gemini 3 Pro",
        context_window: 2_000_000,
        capabilities: GEMINI_CAPS,
        pricing: Pricing { input: 1.25, output: 5.0 },
    },
    ModelDefinition {
        id: "gemini-3-flash",
        name: "Gemini 3 Flash",
        context_window: 1_000_000,
        capabilities: GEMINI_CAPS,
        pricing: Pricing { input: 0.075, output: 0.3 },
    },
    ModelDefinition {
        id: "gemini-2.0-flash",
        name: "Gemini 2.0 Flash",
        context_window: 1_000_000,
        capabilities: GEMINI_CAPS,
        pricing: Pricing { input: 0.075, output: 0.3 },
    },
    ModelDefinition {
        id: "gemini-2.0-pro",
        name: "Gemini 2.0 Pro",
        context_window: 1_000_000,
        capabilities: GEMINI_CAPS,
        pricing: Pricing { input: 1.25, output: 5.0 },
    },
];

pub fn models_for(provider: ModelProviderName) -> &'static [ModelDefinition] {
    match provider {
        ModelProviderName::Anthropic => ANTHROPIC_MODELS,
        ModelProviderName::OpenAI => OPENAI_MODELS,
        ModelProviderName::Google => GOOGLE_MODELS,
    }
}

static ALIASES: &[(&str, &str)] = &[
    ("claude-opus", "anthropic/claude-opus-4-5"),
    ("opus", "anthropic/claude-opus-4-5"),
    ("claude-sonnet", "anthropic/claude-sonnet-4-5"),
    ("sonnet", "anthropic/claude-sonnet-4-5"),
    ("claude", "anthropic/claude-sonnet-4-5"),
    ("claude-haiku", "anthropic/claude-haiku-4-5"),
    ("haiku", "anthropic/claude-haiku-4-5"),
    ("gpt-5.2", "openai/gpt-5.2"),
    ("gpt-5", "openai/gpt-5.2"),
    ("gpt", "openai/gpt-5.2"),
    ("gpt-4o", "openai/gpt-4o"),
    ("4o", "openai/gpt-4o"),
    ("o1", "openai/o1"),
    ("o1-mini", "openai/o1-mini"),
    ("o3", "openai/o3"),
    ("gemini-flash", "google/gemini-3-flash"),
    ("flash", "google/gemini-3-flash"),
    ("gemini", "google/gemini-3-flash"),
    ("gemini-pro", "google/gemini-3-pro"),
];

/// `(alias, canonical id)` pairs in table order.
pub fn aliases() -> &'static [(&'static str, &'static str)] {
    ALIASES
}

/// Resolve an alias to its canonical id. Ids containing `/` and unknown
/// names come back unchanged.
pub fn resolve_alias(id: &str) -> &str {
    if id.contains('/') {
        return id;
    }
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == id)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(id)
}
