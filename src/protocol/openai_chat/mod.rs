pub mod response_encoder;
pub mod stream;

use serde::{Deserialize, Serialize};

use crate::protocol::canonical::{ToolCall, ToolSpec};

/// `POST /api/v2/chat` request wire type. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default, alias = "model_name")]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub tools: Option<Vec<ToolSpec>>,
    #[serde(default)]
    pub tool_choice: Option<ChatToolChoice>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub stop: Option<ChatStop>,
    #[serde(default)]
    pub think: Option<bool>,
    /// Free-form backend options merged under the typed sampling fields.
    #[serde(default)]
    pub options: Option<serde_json::Map<String, serde_json::Value>>,
}

/// One inbound conversation turn.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Option<ChatContent>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChatToolCallIn>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Message content: a plain string or a list of typed parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatContentPart {
    #[serde(rename = "type", default)]
    pub part_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_url: Option<ChatImageUrl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChatImageUrl {
    Url(String),
    Object { url: String },
}

impl ChatImageUrl {
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            ChatImageUrl::Url(url) | ChatImageUrl::Object { url } => url,
        }
    }
}

/// Tool call echoed back in an assistant turn. `arguments` may be a JSON
/// string or an object.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatToolCallIn {
    #[serde(default)]
    pub id: Option<String>,
    pub function: ChatToolCallFunctionIn,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatToolCallFunctionIn {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<serde_json::Value>,
}

/// `tool_choice` field in chat requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChatToolChoice {
    Mode(String),
    Function(ChatToolChoiceFunctionCall),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatToolChoiceFunctionCall {
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    pub function: ChatToolChoiceFunction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatToolChoiceFunction {
    pub name: String,
}

/// `stop` field: one sequence or several.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChatStop {
    Single(String),
    Multi(Vec<String>),
}

impl ChatStop {
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        match self {
            ChatStop::Single(stop) => vec![stop],
            ChatStop::Multi(stops) => stops,
        }
    }
}

/// Non-streaming chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: ChatUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatResponseMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponseMessage {
    pub role: String,
    /// `null` when the turn resolved to tool calls.
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}
