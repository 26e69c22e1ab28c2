use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::protocol::canonical::{
    GenerationOptions, GenerationRequest, Message, RawChunk, ToolCallFragment, ToolSpec, Usage,
};
use crate::stream::ReasoningMarkers;

/// `POST /api/chat` request body.
#[derive(Debug, Clone, Serialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<OllamaMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub think: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OllamaMessage {
    pub role: &'static str,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<OllamaToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaToolCall {
    pub function: OllamaFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// One NDJSON record of a `/api/chat` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OllamaChatChunk {
    #[serde(default)]
    pub message: Option<OllamaMessageOut>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OllamaMessageOut {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OllamaToolCall>>,
}

/// `GET /api/tags` response body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OllamaTagsResponse {
    #[serde(default)]
    pub models: Vec<OllamaModelTag>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModelTag {
    pub name: String,
}

fn encode_message(message: &Message) -> OllamaMessage {
    OllamaMessage {
        role: message.role().as_str(),
        content: message.content.clone().unwrap_or_default(),
        images: message.images.clone(),
        tool_calls: message
            .tool_calls
            .iter()
            .map(|call| OllamaToolCall {
                function: OllamaFunction {
                    name: call.function.name.clone(),
                    arguments: serde_json::from_str(&call.function.arguments)
                        .unwrap_or_else(|_| serde_json::Value::String(call.function.arguments.clone())),
                },
            })
            .collect(),
        tool_call_id: message.tool_call_id.clone(),
        tool_name: message.name.clone(),
    }
}

fn encode_options(options: &GenerationOptions) -> Option<serde_json::Map<String, serde_json::Value>> {
    if options.is_empty() {
        return None;
    }
    let typed = OllamaOptions {
        temperature: options.temperature,
        top_p: options.top_p,
        top_k: options.top_k,
        num_predict: options.max_tokens,
        stop: options.stop.clone(),
    };
    let mut merged = options.extra.clone();
    if let Ok(serde_json::Value::Object(typed)) = serde_json::to_value(typed) {
        merged.extend(typed);
    }
    Some(merged)
}

/// Build the backend request. `max_tokens` maps to `num_predict`; tools are
/// withheld when the caller set `tool_choice: none`; `think` is forwarded
/// only when the caller set it.
#[must_use]
pub fn encode_chat_request(request: &GenerationRequest, stream: bool) -> OllamaChatRequest {
    let options = encode_options(&request.options);
    OllamaChatRequest {
        model: request.model.clone(),
        messages: request.messages.iter().map(encode_message).collect(),
        stream,
        tools: if request.offers_tools() {
            request.tools.clone()
        } else {
            Vec::new()
        },
        think: request.think,
        options,
    }
}

/// Tool-call arguments as a JSON string, whichever form the backend used.
#[must_use]
pub fn arguments_to_string(arguments: &serde_json::Value) -> String {
    match arguments {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

/// Converts backend records into [`RawChunk`]s, re-inlining out-of-band
/// `message.thinking` text between the reasoning markers so downstream sees a
/// single text channel.
pub struct ThinkingInliner {
    markers: ReasoningMarkers,
    in_thinking: bool,
    next_tool_index: usize,
}

impl ThinkingInliner {
    #[must_use]
    pub fn new(markers: ReasoningMarkers) -> Self {
        Self {
            markers,
            in_thinking: false,
            next_tool_index: 0,
        }
    }

    pub fn convert(&mut self, chunk: OllamaChatChunk) -> RawChunk {
        let mut text = String::new();
        let mut tool_calls: SmallVec<[ToolCallFragment; 1]> = SmallVec::new();

        if let Some(message) = chunk.message {
            if let Some(thinking) = message.thinking.as_deref().filter(|t| !t.is_empty()) {
                if !self.in_thinking {
                    self.in_thinking = true;
                    text.push_str(self.markers.open());
                }
                text.push_str(thinking);
            }
            if !message.content.is_empty() {
                self.close_thinking(&mut text);
                text.push_str(&message.content);
            }
            for call in message.tool_calls.unwrap_or_default() {
                tool_calls.push(ToolCallFragment {
                    index: self.next_tool_index,
                    id: None,
                    name: Some(call.function.name),
                    arguments: arguments_to_string(&call.function.arguments),
                });
                self.next_tool_index += 1;
            }
        }

        let usage = if chunk.done {
            self.close_thinking(&mut text);
            Some(Usage {
                prompt_tokens: chunk.prompt_eval_count,
                completion_tokens: chunk.eval_count,
            })
        } else {
            None
        };

        RawChunk {
            text,
            done: chunk.done,
            tool_calls,
            done_reason: chunk.done_reason,
            usage,
        }
    }

    fn close_thinking(&mut self, text: &mut String) {
        if self.in_thinking {
            self.in_thinking = false;
            text.push_str(self.markers.close());
        }
    }
}
