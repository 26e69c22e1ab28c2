use crate::protocol::canonical::{ToolCallFragment, TranslatedEvent, Usage};
use crate::stream::sse::done_frame;
use crate::util::{push_json_string_escaped, push_u64_decimal, unix_now_secs};

/// Encodes translated events as `chat.completion.chunk` SSE frames.
///
/// The first frame carries only `delta.role`. A turn that produces a tool call
/// carries no content at all: when tools are offered, content is held back
/// until the turn ends and dropped if a tool-call delta arrives. The final
/// frame has an empty delta plus the finish reason and is followed by
/// `data: [DONE]`.
pub struct ChatChunkEncoder {
    id: String,
    model: String,
    created: u64,
    think: bool,
    hold_content: bool,
    held: String,
    role_sent: bool,
    tool_mode: bool,
    finished: bool,
}

impl ChatChunkEncoder {
    #[must_use]
    pub fn new(id: String, model: String, think: bool) -> Self {
        Self {
            id,
            model,
            created: unix_now_secs(),
            think,
            hold_content: false,
            held: String::new(),
            role_sent: false,
            tool_mode: false,
            finished: false,
        }
    }

    /// Buffer content until the turn ends, so a late tool call can still
    /// discard it.
    #[must_use]
    pub fn holding_content(mut self, hold: bool) -> Self {
        self.hold_content = hold;
        self
    }

    pub fn encode_into(&mut self, event: &TranslatedEvent, out: &mut Vec<String>) {
        if self.finished {
            return;
        }
        if !self.role_sent {
            self.role_sent = true;
            out.push(self.role_chunk());
        }

        if self.think && !event.reasoning_delta.is_empty() {
            out.push(self.text_chunk("reasoning_content", &event.reasoning_delta));
        }
        if !event.tool_call_deltas.is_empty() {
            self.tool_mode = true;
            self.held.clear();
            out.push(self.tool_call_chunk(&event.tool_call_deltas));
        }
        if !self.tool_mode && !event.visible_delta.is_empty() {
            if self.hold_content {
                self.held.push_str(&event.visible_delta);
            } else {
                out.push(self.text_chunk("content", &event.visible_delta));
            }
        }

        if let Some(reason) = event.finish_reason.as_wire() {
            self.finished = true;
            if !self.held.is_empty() {
                let held = std::mem::take(&mut self.held);
                out.push(self.text_chunk("content", &held));
            }
            out.push(self.final_chunk(reason, event.usage.as_ref()));
            out.push(done_frame());
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn push_prefix(&self, out: &mut String) {
        out.push_str("data: {\"id\":");
        push_json_string_escaped(out, &self.id);
        out.push_str(",\"object\":\"chat.completion.chunk\",\"created\":");
        push_u64_decimal(out, self.created);
        out.push_str(",\"model\":");
        push_json_string_escaped(out, &self.model);
    }

    fn role_chunk(&self) -> String {
        let mut out = String::with_capacity(160 + self.id.len() + self.model.len());
        self.push_prefix(&mut out);
        out.push_str(
            ",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
        );
        out
    }

    fn text_chunk(&self, field: &str, text: &str) -> String {
        let mut out = String::with_capacity(160 + self.id.len() + self.model.len() + text.len());
        self.push_prefix(&mut out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{");
        push_json_string_escaped(&mut out, field);
        out.push(':');
        push_json_string_escaped(&mut out, text);
        out.push_str("},\"finish_reason\":null}]}\n\n");
        out
    }

    fn tool_call_chunk(&self, fragments: &[ToolCallFragment]) -> String {
        let mut out = String::with_capacity(192 + self.id.len() + self.model.len());
        self.push_prefix(&mut out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[");
        for (i, fragment) in fragments.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str("{\"index\":");
            push_u64_decimal(&mut out, u64::try_from(fragment.index).unwrap_or(0));
            if let Some(id) = fragment.id.as_deref() {
                out.push_str(",\"id\":");
                push_json_string_escaped(&mut out, id);
                out.push_str(",\"type\":\"function\"");
            }
            out.push_str(",\"function\":{");
            if let Some(name) = fragment.name.as_deref() {
                out.push_str("\"name\":");
                push_json_string_escaped(&mut out, name);
                out.push(',');
            }
            out.push_str("\"arguments\":");
            push_json_string_escaped(&mut out, &fragment.arguments);
            out.push_str("}}");
        }
        out.push_str("]},\"finish_reason\":null}]}\n\n");
        out
    }

    fn final_chunk(&self, reason: &str, usage: Option<&Usage>) -> String {
        let mut out = String::with_capacity(224 + self.id.len() + self.model.len());
        self.push_prefix(&mut out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":");
        push_json_string_escaped(&mut out, reason);
        out.push_str("}]");
        if let Some(usage) = usage {
            let prompt = usage.prompt_tokens.unwrap_or(0);
            let completion = usage.completion_tokens.unwrap_or(0);
            out.push_str(",\"usage\":{\"prompt_tokens\":");
            push_u64_decimal(&mut out, prompt);
            out.push_str(",\"completion_tokens\":");
            push_u64_decimal(&mut out, completion);
            out.push_str(",\"total_tokens\":");
            push_u64_decimal(&mut out, prompt + completion);
            out.push('}');
        }
        out.push_str("}\n\n");
        out
    }
}
