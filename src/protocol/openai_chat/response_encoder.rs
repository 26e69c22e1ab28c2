use crate::protocol::canonical::GenerationResult;
use crate::util::unix_now_secs;

use super::{ChatChoice, ChatCompletionResponse, ChatResponseMessage, ChatUsage};

/// Encode a generation result into the chat completion wire format.
///
/// `content` is `null` when the turn resolved to tool calls; reasoning is
/// exposed as `reasoning_content` only when `think` was requested.
#[must_use]
pub fn encode_chat_response(
    result: &GenerationResult,
    id: &str,
    model: &str,
    think: bool,
) -> ChatCompletionResponse {
    let tool_calls = (!result.tool_calls.is_empty()).then(|| result.tool_calls.clone());
    let content = if tool_calls.is_some() {
        None
    } else {
        Some(result.content.clone())
    };
    let reasoning_content = if think {
        result.reasoning.clone()
    } else {
        None
    };

    let prompt_tokens = result.usage.prompt_tokens.unwrap_or(0);
    let completion_tokens = result.usage.completion_tokens.unwrap_or(0);

    ChatCompletionResponse {
        id: id.to_string(),
        object: "chat.completion".to_string(),
        created: unix_now_secs(),
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatResponseMessage {
                role: "assistant".to_string(),
                content,
                reasoning_content,
                tool_calls,
            },
            finish_reason: result.finish_reason.as_wire().map(str::to_string),
        }],
        usage: ChatUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{FinishReason, FunctionCall, ToolCall, Usage};

    #[test]
    fn test_encode_text_response() {
        let result = GenerationResult {
            content: "Hello world".into(),
            reasoning: Some("greet".into()),
            raw: "<think>greet</think>Hello world".into(),
            finish_reason: FinishReason::Stop,
            usage: Usage {
                prompt_tokens: Some(10),
                completion_tokens: Some(5),
            },
            ..GenerationResult::default()
        };
        let wire = encode_chat_response(&result, "chatcmpl-1", "llama3", true);
        assert_eq!(wire.object, "chat.completion");
        assert_eq!(wire.model, "llama3");
        assert_eq!(wire.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(wire.choices[0].message.content.as_deref(), Some("Hello world"));
        assert_eq!(
            wire.choices[0].message.reasoning_content.as_deref(),
            Some("greet")
        );
        assert_eq!(wire.usage.total_tokens, 15);

        let hidden = encode_chat_response(&result, "chatcmpl-1", "llama3", false);
        assert_eq!(hidden.choices[0].message.reasoning_content, None);
    }

    #[test]
    fn test_encode_tool_call_response() {
        let result = GenerationResult {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_xyz".into(),
                call_type: "function".into(),
                function: FunctionCall {
                    name: "get_weather".into(),
                    arguments: "{\"city\":\"LA\"}".into(),
                },
            }],
            finish_reason: FinishReason::ToolCalls,
            ..GenerationResult::default()
        };
        let wire = encode_chat_response(&result, "chatcmpl-2", "llama3", false);
        let json = serde_json::to_value(&wire).unwrap();
        assert!(json["choices"][0]["message"]["content"].is_null());
        assert_eq!(json["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(
            json["choices"][0]["message"]["tool_calls"][0]["function"]["name"],
            "get_weather"
        );
        assert_eq!(
            json["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"],
            "{\"city\":\"LA\"}"
        );
        assert_eq!(json["choices"][0]["message"]["tool_calls"][0]["type"], "function");
    }
}
