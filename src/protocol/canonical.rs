use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Which ingress API the request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngressApi {
    LegacyGenerate,
    Chat,
}

impl IngressApi {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            IngressApi::LegacyGenerate => "v1.generate",
            IngressApi::Chat => "v2.chat",
        }
    }
}

/// Canonical message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A resolved function call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, possibly incomplete while streaming.
    pub arguments: String,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub role: Option<Role>,
    pub content: Option<String>,
    /// Base64 image payloads attached to this turn.
    pub images: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
}

impl Message {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Some(Role::User),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role.unwrap_or(Role::User)
    }
}

/// Generation parameters passed through to the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u64>,
    pub stop: Vec<String>,
    /// Backend-specific options (`num_ctx`, `seed`, ...) forwarded as given.
    /// The typed fields above take precedence on key collisions.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GenerationOptions {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.top_p.is_none()
            && self.top_k.is_none()
            && self.max_tokens.is_none()
            && self.stop.is_empty()
            && self.extra.is_empty()
    }
}

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type", default = "default_tool_type")]
    pub tool_type: String,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

fn default_tool_type() -> String {
    "function".to_string()
}

/// Tool choice specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Function(String),
}

/// Normalized request shared by both ingress APIs. Built once by the
/// normalizer and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub request_id: uuid::Uuid,
    pub ingress: IngressApi,
    pub model: String,
    pub messages: Vec<Message>,
    pub options: GenerationOptions,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: Option<ToolChoice>,
    pub stream: bool,
    /// Caller's explicit reasoning preference; `None` leaves the backend default.
    pub think: Option<bool>,
}

impl GenerationRequest {
    /// Tools reach the backend unless the caller chose `tool_choice: none`.
    #[must_use]
    pub fn offers_tools(&self) -> bool {
        !self.tools.is_empty() && self.tool_choice != Some(ToolChoice::None)
    }

    /// Reasoning text is only surfaced to callers that asked for it.
    #[must_use]
    pub fn wants_reasoning(&self) -> bool {
        self.think == Some(true)
    }

    /// Text used to key mock lookups and exchange-log prompts: the content of
    /// the last user turn.
    #[must_use]
    pub fn identifying_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role() == Role::User)
            .and_then(|message| message.content.as_deref())
            .unwrap_or("")
    }
}

/// Partial tool call as delivered by a backend chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

impl Usage {
    #[must_use]
    pub fn total_tokens(&self) -> Option<u64> {
        match (self.prompt_tokens, self.completion_tokens) {
            (None, None) => None,
            (prompt, completion) => Some(prompt.unwrap_or(0) + completion.unwrap_or(0)),
        }
    }
}

/// One backend-delivered increment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawChunk {
    pub text: String,
    pub done: bool,
    pub tool_calls: SmallVec<[ToolCallFragment; 1]>,
    pub done_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl RawChunk {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FinishReason {
    #[default]
    None,
    Stop,
    Length,
    ToolCalls,
}

impl FinishReason {
    /// Wire name, or `None` while the stream is still open.
    #[must_use]
    pub fn as_wire(self) -> Option<&'static str> {
        match self {
            FinishReason::None => None,
            FinishReason::Stop => Some("stop"),
            FinishReason::Length => Some("length"),
            FinishReason::ToolCalls => Some("tool_calls"),
        }
    }
}

/// Output of one translation cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslatedEvent {
    pub visible_delta: String,
    pub reasoning_delta: String,
    /// Chunk text with markers intact.
    pub raw_delta: String,
    pub tool_call_deltas: SmallVec<[ToolCallFragment; 1]>,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
}

impl TranslatedEvent {
    #[must_use]
    pub fn has_text(&self) -> bool {
        !self.visible_delta.is_empty() || !self.reasoning_delta.is_empty()
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        self.finish_reason != FinishReason::None
    }
}

/// Terminal result of a generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResult {
    pub content: String,
    pub reasoning: Option<String>,
    pub raw: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}
