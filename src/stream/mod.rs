pub mod aggregate;
pub mod splitter;
pub mod sse;

pub use aggregate::{collect, Aggregator};
pub use splitter::{ReasoningMarkers, ReasoningSplitter, SplitDelta, SplitMode};

use crate::protocol::canonical::{
    FinishReason, FunctionCall, RawChunk, ToolCall, ToolCallFragment, TranslatedEvent,
};
use crate::util::next_call_id;
use smallvec::SmallVec;

/// Turns raw backend chunks into [`TranslatedEvent`]s: one event per chunk.
///
/// Text goes through the reasoning splitter; tool-call fragments bypass it
/// and are forwarded with their call id filled in on first sight.
pub struct StreamTranslator {
    splitter: ReasoningSplitter,
    tool_calls: ToolCallAccumulator,
    finished: bool,
}

impl StreamTranslator {
    #[must_use]
    pub fn new(markers: ReasoningMarkers) -> Self {
        Self {
            splitter: ReasoningSplitter::new(markers),
            tool_calls: ToolCallAccumulator::default(),
            finished: false,
        }
    }

    pub fn translate(&mut self, chunk: RawChunk) -> TranslatedEvent {
        if self.finished {
            return TranslatedEvent::default();
        }

        let RawChunk {
            text,
            done,
            mut tool_calls,
            done_reason,
            usage,
        } = chunk;

        let split = self.splitter.feed(&text);
        for fragment in &mut tool_calls {
            self.tool_calls.absorb(fragment);
        }

        let mut event = TranslatedEvent {
            visible_delta: split.visible,
            reasoning_delta: split.reasoning,
            raw_delta: text,
            tool_call_deltas: tool_calls,
            finish_reason: FinishReason::None,
            usage,
        };

        if done {
            self.finished = true;
            let tail = self.splitter.finish();
            event.visible_delta.push_str(&tail.visible);
            event.reasoning_delta.push_str(&tail.reasoning);
            event.finish_reason = if !self.tool_calls.is_empty() {
                FinishReason::ToolCalls
            } else if done_reason.as_deref() == Some("length") {
                FinishReason::Length
            } else {
                FinishReason::Stop
            };
        }

        event
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[must_use]
    pub fn saw_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Debug)]
struct PendingCall {
    index: usize,
    id: String,
    name: String,
    arguments: String,
}

/// Concatenates tool-call fragments per index in arrival order.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: SmallVec<[PendingCall; 1]>,
}

impl ToolCallAccumulator {
    /// Merge a fragment. The first fragment for an index has its id filled in
    /// when the backend did not supply one.
    pub fn absorb(&mut self, fragment: &mut ToolCallFragment) {
        if let Some(call) = self.calls.iter_mut().find(|c| c.index == fragment.index) {
            if let Some(name) = fragment.name.as_deref() {
                if call.name.is_empty() {
                    call.name.push_str(name);
                }
            }
            call.arguments.push_str(&fragment.arguments);
            return;
        }

        let id = match fragment.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let id = next_call_id();
                fragment.id = Some(id.clone());
                id
            }
        };
        self.calls.push(PendingCall {
            index: fragment.index,
            id,
            name: fragment.name.clone().unwrap_or_default(),
            arguments: fragment.arguments.clone(),
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Resolved calls ordered by index.
    #[must_use]
    pub fn resolve(&self) -> Vec<ToolCall> {
        let mut ordered: Vec<&PendingCall> = self.calls.iter().collect();
        ordered.sort_by_key(|call| call.index);
        ordered
            .into_iter()
            .map(|call| ToolCall {
                id: call.id.clone(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            })
            .collect()
    }
}
