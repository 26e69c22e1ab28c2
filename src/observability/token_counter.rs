use crate::protocol::canonical::{GenerationRequest, Usage};
use std::time::Duration;
use tracing::info;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    u64::try_from(text.len()).unwrap_or(u64::MAX).div_ceil(4)
}

/// Estimate the prompt tokens for a normalized request.
#[must_use]
pub fn estimate_request_tokens(request: &GenerationRequest) -> u64 {
    let mut total: u64 = 0;
    for message in &request.messages {
        if let Some(content) = message.content.as_deref() {
            total += estimate_tokens(content);
        }
        for call in &message.tool_calls {
            total += estimate_tokens(&call.function.name);
            total += estimate_tokens(&call.function.arguments);
        }
    }
    for tool in &request.tools {
        if let Some(parameters) = tool.function.parameters.as_ref() {
            total += estimate_tokens(&parameters.to_string());
        }
        if let Some(description) = tool.function.description.as_deref() {
            total += estimate_tokens(description);
        }
        total += estimate_tokens(&tool.function.name);
    }
    total
}

/// Merge backend-reported usage with local estimates.
///
/// Non-zero backend values always win; missing or zero fields are filled with
/// the estimate.
#[must_use]
pub fn merge_usage(reported: &Usage, estimated_prompt: u64, estimated_completion: u64) -> Usage {
    Usage {
        prompt_tokens: match reported.prompt_tokens {
            Some(v) if v > 0 => Some(v),
            _ => Some(estimated_prompt),
        },
        completion_tokens: match reported.completion_tokens {
            Some(v) if v > 0 => Some(v),
            _ => Some(estimated_completion),
        },
    }
}

/// Log token usage for a completed request at INFO level.
pub fn log_request_usage(
    request_id: &uuid::Uuid,
    endpoint: &str,
    model: &str,
    usage: &Usage,
    duration: Duration,
) {
    info!(
        request_id = %request_id,
        endpoint = endpoint,
        model = model,
        prompt_tokens = usage.prompt_tokens.unwrap_or(0),
        completion_tokens = usage.completion_tokens.unwrap_or(0),
        total_tokens = usage.total_tokens().unwrap_or(0),
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}
