use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::api::common::{
    json_ok, parse_json_body, run_batch, stream_response, ExchangeContext, RequestMeta,
};
use crate::api::normalize::normalize_chat;
use crate::observability::token_counter::{estimate_request_tokens, estimate_tokens, merge_usage};
use crate::protocol::canonical::IngressApi;
use crate::protocol::openai_chat::response_encoder::encode_chat_response;
use crate::protocol::openai_chat::stream::ChatChunkEncoder;
use crate::protocol::openai_chat::ChatRequest;
use crate::state::AppState;
use crate::util::format_request_seq_hex;

const INGRESS: IngressApi = IngressApi::Chat;

/// `POST /api/v2/chat`: chat-completion request/response, optionally streamed
/// as `chat.completion.chunk` events.
pub async fn handler(state: Arc<AppState>, meta: RequestMeta, body: Bytes) -> Response {
    let ids = state.next_request_ids();
    let mut exchange = ExchangeContext::new(ids, INGRESS.as_str(), meta);

    let request = match parse_json_body::<ChatRequest>(&body)
        .and_then(|body| normalize_chat(body, &state.config.generation, ids.uuid))
    {
        Ok(request) => request,
        Err(err) => {
            exchange.failed(&state, &err);
            return err.into_response();
        }
    };
    exchange.set_request(request.identifying_text(), &request.model);
    let response_id = format_request_seq_hex("chatcmpl-", ids.seq);

    if request.stream {
        let encoder =
            ChatChunkEncoder::new(response_id, request.model.clone(), request.wants_reasoning())
                .holding_content(request.offers_tools());
        return stream_response(state, request, encoder, exchange);
    }

    match run_batch(&state, &request).await {
        Ok(mut result) => {
            let completion_text = result
                .tool_calls
                .iter()
                .fold(result.content.clone(), |mut text, call| {
                    text.push_str(&call.function.arguments);
                    text
                });
            result.usage = merge_usage(
                &result.usage,
                estimate_request_tokens(&request),
                estimate_tokens(&completion_text),
            );
            let response =
                encode_chat_response(&result, &response_id, &request.model, request.wants_reasoning());
            exchange.succeeded(&state, result.content, &result.usage);
            json_ok(&response)
        }
        Err(err) => {
            exchange.failed(&state, &err);
            err.into_response()
        }
    }
}
