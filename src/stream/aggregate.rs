use futures_util::{Stream, StreamExt};

use super::{ReasoningMarkers, StreamTranslator, ToolCallAccumulator};
use crate::error::GatewayError;
use crate::protocol::canonical::{FinishReason, GenerationResult, RawChunk, TranslatedEvent, Usage};

/// Folds translated events into one [`GenerationResult`].
///
/// Content is concatenated exactly as streamed (no trimming, no separators
/// between reasoning blocks), so the batch result is byte-identical to the
/// sum of the streaming deltas.
#[derive(Debug, Default)]
pub struct Aggregator {
    content: String,
    reasoning: String,
    saw_reasoning: bool,
    raw: String,
    tool_calls: ToolCallAccumulator,
    finish_reason: FinishReason,
    usage: Usage,
}

impl Aggregator {
    pub fn fold(&mut self, event: &TranslatedEvent) {
        self.content.push_str(&event.visible_delta);
        if !event.reasoning_delta.is_empty() {
            self.saw_reasoning = true;
            self.reasoning.push_str(&event.reasoning_delta);
        }
        self.raw.push_str(&event.raw_delta);
        for fragment in &event.tool_call_deltas {
            let mut fragment = fragment.clone();
            self.tool_calls.absorb(&mut fragment);
        }
        if event.finish_reason != FinishReason::None {
            self.finish_reason = event.finish_reason;
        }
        if let Some(usage) = event.usage {
            if usage.prompt_tokens.is_some() {
                self.usage.prompt_tokens = usage.prompt_tokens;
            }
            if usage.completion_tokens.is_some() {
                self.usage.completion_tokens = usage.completion_tokens;
            }
        }
    }

    #[must_use]
    pub fn finish(self) -> GenerationResult {
        GenerationResult {
            content: self.content,
            reasoning: self.saw_reasoning.then_some(self.reasoning),
            raw: self.raw,
            tool_calls: self.tool_calls.resolve(),
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

/// Drive a raw chunk stream to completion through the same translator the
/// streaming path uses.
///
/// # Errors
///
/// Propagates the first backend error, and returns
/// [`GatewayError::StreamInterrupted`] if the stream ends without a `done`
/// chunk.
pub async fn collect<S>(mut chunks: S, markers: ReasoningMarkers) -> Result<GenerationResult, GatewayError>
where
    S: Stream<Item = Result<RawChunk, GatewayError>> + Unpin,
{
    let mut translator = StreamTranslator::new(markers);
    let mut aggregator = Aggregator::default();
    while let Some(item) = chunks.next().await {
        let chunk = item?;
        let done = chunk.done;
        let event = translator.translate(chunk);
        aggregator.fold(&event);
        if done {
            return Ok(aggregator.finish());
        }
    }
    Err(GatewayError::StreamInterrupted(
        "backend stream ended before completion".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::ToolCallFragment;
    use smallvec::smallvec;

    fn chunks(texts: &[&str]) -> Vec<Result<RawChunk, GatewayError>> {
        let mut out: Vec<_> = texts.iter().map(|t| Ok(RawChunk::text(*t))).collect();
        out.push(Ok(RawChunk {
            done: true,
            usage: Some(Usage {
                prompt_tokens: Some(4),
                completion_tokens: Some(9),
            }),
            ..RawChunk::default()
        }));
        out
    }

    #[tokio::test]
    async fn batch_equals_concatenated_stream_deltas() {
        let texts = ["Hi <thi", "nk>plan A", "</thi", "nk> there <think>", "plan B</think>!"];
        let markers = ReasoningMarkers::default();

        let mut translator = StreamTranslator::new(markers.clone());
        let mut visible = String::new();
        let mut reasoning = String::new();
        for item in chunks(&texts) {
            let event = translator.translate(item.unwrap());
            visible.push_str(&event.visible_delta);
            reasoning.push_str(&event.reasoning_delta);
        }

        let result = collect(futures_util::stream::iter(chunks(&texts)), markers)
            .await
            .unwrap();
        assert_eq!(result.content, visible);
        assert_eq!(result.reasoning.as_deref(), Some(reasoning.as_str()));
        assert_eq!(result.content, "Hi  there !");
        assert_eq!(result.reasoning.as_deref(), Some("plan Aplan B"));
        assert_eq!(result.raw, texts.concat());
        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert_eq!(result.usage.prompt_tokens, Some(4));
        assert_eq!(result.usage.completion_tokens, Some(9));
    }

    #[tokio::test]
    async fn reasoning_absent_when_none_streamed() {
        let result = collect(
            futures_util::stream::iter(chunks(&["plain ", "text"])),
            ReasoningMarkers::default(),
        )
        .await
        .unwrap();
        assert_eq!(result.content, "plain text");
        assert_eq!(result.reasoning, None);
    }

    #[tokio::test]
    async fn missing_done_chunk_is_interrupted() {
        let items = vec![Ok(RawChunk::text("partial"))];
        let err = collect(futures_util::stream::iter(items), ReasoningMarkers::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::StreamInterrupted(_)));
    }

    #[tokio::test]
    async fn backend_error_propagates() {
        let items = vec![
            Ok(RawChunk::text("partial")),
            Err(GatewayError::StreamInterrupted("reset".into())),
        ];
        let err = collect(futures_util::stream::iter(items), ReasoningMarkers::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::StreamInterrupted(_)));
    }

    #[tokio::test]
    async fn tool_call_result_resolved() {
        let items = vec![
            Ok(RawChunk {
                tool_calls: smallvec![ToolCallFragment {
                    index: 0,
                    id: None,
                    name: Some("get_weather".into()),
                    arguments: "{\"city\"".into(),
                }],
                ..RawChunk::default()
            }),
            Ok(RawChunk {
                tool_calls: smallvec![ToolCallFragment {
                    index: 0,
                    arguments: ":\"Paris\"}".into(),
                    ..ToolCallFragment::default()
                }],
                done: true,
                ..RawChunk::default()
            }),
        ];
        let result = collect(futures_util::stream::iter(items), ReasoningMarkers::default())
            .await
            .unwrap();
        assert_eq!(result.finish_reason, FinishReason::ToolCalls);
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].function.name, "get_weather");
        assert_eq!(result.tool_calls[0].function.arguments, "{\"city\":\"Paris\"}");
        assert!(result.tool_calls[0].id.starts_with("call_"));
    }
}
