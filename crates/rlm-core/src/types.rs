//! Core data types for the RLM executor.
//!
//! These types model the minimal, provider-agnostic contract a host LLM
//! client must honor (see `backend::LLMBackend`) plus the data the agent
//! loop threads through a run: messages, parsed model output, usage, and
//! the final result handed back to the caller.

use serde::{Deserialize, Serialize};

/// The role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single part of a (possibly multimodal) message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text { text: String },
    /// An inline image, base64-encoded.
    Image { media_type: String, data: String },
}

/// Message content: either simple text or a list of multimodal parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Extract all text content, concatenated in order.
    pub fn to_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

/// A message in the conversation threaded through one top-level `execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// A user message carrying a text prompt alongside an inline image.
    pub fn user_with_image(
        text: impl Into<String>,
        media_type: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::Image {
                    media_type: media_type.into(),
                    data: data.into(),
                },
            ]),
        }
    }

    pub fn text(&self) -> String {
        self.content.to_text()
    }
}

/// Why the model stopped generating, normalized across providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Unknown,
}

/// Token usage for a single LLM turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
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
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Configuration for extended ("thinking") reasoning, if the provider supports it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExtendedThinkingConfig {
    pub enabled: bool,
    pub budget_tokens: Option<u32>,
}

/// Per-call options forwarded to the LLM client.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub stop_sequences: Vec<String>,
    pub thinking: Option<ExtendedThinkingConfig>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: None,
            stop_sequences: Vec::new(),
            thinking: None,
        }
    }
}

/// The result of a single `complete` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResult {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub usage: Usage,
    pub finish_reason: FinishReason,
}

/// The kind of terminator a model response carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminatorKind {
    Final,
    FinalVar,
}

/// A parsed `FINAL(...)` / `FINAL_VAR(...)` marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Terminator {
    pub kind: TerminatorKind,
    pub value: String,
}

/// The structured result of parsing one model turn's raw text.
#[derive(Debug, Clone, Default)]
pub struct ParsedOutput {
    /// Prose preceding the first code fence, if any.
    pub thinking: Option<String>,
    /// Concatenated bodies of every fenced code block found, in order.
    pub code: Option<String>,
    /// The first terminator found, if any.
    pub terminator: Option<Terminator>,
}

impl ParsedOutput {
    pub fn has_code(&self) -> bool {
        self.code.is_some()
    }

    pub fn has_terminator(&self) -> bool {
        self.terminator.is_some()
    }
}

/// The outcome of a single `sandbox.execute(code)` call.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub output: String,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

/// Usage + cost totals for one top-level `execute`, handed back in `RLMResult`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost_usd: f64,
    pub call_count: u32,
}

/// The result of a top-level `execute`.
#[derive(Debug, Clone)]
pub struct RLMResult {
    pub response: String,
    pub trace: Vec<crate::trace::TraceEntry>,
    pub usage: UsageSummary,
    pub execution_time_ms: u64,
}

/// Pricing for one model: USD per 1M tokens, input and output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

/// Mapping of model id to pricing. Unknown models cost 0 but still accumulate tokens.
pub type PricingTable = std::collections::HashMap<String, ModelPricing>;
