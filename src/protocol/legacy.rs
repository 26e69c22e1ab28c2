use serde::{Deserialize, Serialize};

use crate::protocol::canonical::{GenerationResult, TranslatedEvent};
use crate::stream::sse::empty_object_frame;
use crate::util::push_json_string_escaped;

/// `POST /api/v1/generate` request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub think: Option<bool>,
}

/// Non-streaming `POST /api/v1/generate` response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub think: String,
    pub content: String,
    pub response: String,
}

impl GenerateResponse {
    #[must_use]
    pub fn from_result(result: &GenerationResult, think: bool) -> Self {
        Self {
            think: if think {
                result.reasoning.clone().unwrap_or_default()
            } else {
                String::new()
            },
            content: result.content.clone(),
            response: result.raw.clone(),
        }
    }
}

/// Encodes translated events as legacy `data: {think, content, response}`
/// frames. Each frame carries only the delta of its event.
#[derive(Debug, Clone, Copy)]
pub struct LegacyEventEncoder {
    think: bool,
    finished: bool,
}

impl LegacyEventEncoder {
    #[must_use]
    pub fn new(think: bool) -> Self {
        Self {
            think,
            finished: false,
        }
    }

    pub fn encode_into(&mut self, event: &TranslatedEvent, out: &mut Vec<String>) {
        if self.finished {
            return;
        }
        let reasoning = if self.think {
            event.reasoning_delta.as_str()
        } else {
            ""
        };
        if !event.visible_delta.is_empty() || !reasoning.is_empty() || !event.raw_delta.is_empty()
        {
            out.push(encode_event_frame(
                reasoning,
                &event.visible_delta,
                &event.raw_delta,
            ));
        }
        if event.is_final() {
            self.finished = true;
            out.push(empty_object_frame());
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

fn encode_event_frame(think: &str, content: &str, response: &str) -> String {
    let mut out = String::with_capacity(48 + think.len() + content.len() + response.len());
    out.push_str("data: {\"think\":");
    push_json_string_escaped(&mut out, think);
    out.push_str(",\"content\":");
    push_json_string_escaped(&mut out, content);
    out.push_str(",\"response\":");
    push_json_string_escaped(&mut out, response);
    out.push_str("}\n\n");
    out
}
