use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::api::common::{
    json_ok, parse_json_body, run_batch, stream_response, ExchangeContext, RequestMeta,
};
use crate::api::normalize::normalize_legacy;
use crate::protocol::canonical::IngressApi;
use crate::protocol::legacy::{GenerateRequest, GenerateResponse, LegacyEventEncoder};
use crate::state::AppState;

const INGRESS: IngressApi = IngressApi::LegacyGenerate;

/// `POST /api/v1/generate`: flat prompt in, `{think, content, response}` out.
pub async fn handler(state: Arc<AppState>, meta: RequestMeta, body: Bytes) -> Response {
    let ids = state.next_request_ids();
    let mut exchange = ExchangeContext::new(ids, INGRESS.as_str(), meta);

    let request = match parse_json_body::<GenerateRequest>(&body)
        .and_then(|body| normalize_legacy(body, &state.config.generation, ids.uuid))
    {
        Ok(request) => request,
        Err(err) => {
            exchange.failed(&state, &err);
            return err.into_response();
        }
    };
    exchange.set_request(request.identifying_text(), &request.model);

    if request.stream {
        let encoder = LegacyEventEncoder::new(request.wants_reasoning());
        return stream_response(state, request, encoder, exchange);
    }

    match run_batch(&state, &request).await {
        Ok(result) => {
            let response = GenerateResponse::from_result(&result, request.wants_reasoning());
            exchange.succeeded(&state, result.content, &result.usage);
            json_ok(&response)
        }
        Err(err) => {
            exchange.failed(&state, &err);
            err.into_response()
        }
    }
}
