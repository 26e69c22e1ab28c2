//! Shared API helpers reused across ingress handlers.

mod exchange;
mod streaming;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::GatewayError;
use crate::protocol::canonical::{GenerationRequest, GenerationResult};
use crate::state::AppState;

pub use exchange::RequestMeta;
pub(crate) use exchange::ExchangeContext;
pub(crate) use streaming::{sse_ok_response, stream_response, FrameEncoder};

/// Parse a JSON request body. Unknown fields are ignored by the wire types.
pub(crate) fn parse_json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(GatewayError::Validation("Request body is empty".to_string()));
    }
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::Validation(format!("Invalid JSON body: {e}")))
}

/// Run a non-streaming generation while holding a backend permit.
pub(crate) async fn run_batch(
    state: &AppState,
    request: &GenerationRequest,
) -> Result<GenerationResult, GatewayError> {
    let _permit = state.acquire_backend_permit().await?;
    state.backend.generate_batch(request).await
}

pub(crate) fn json_ok<T: Serialize>(body: &T) -> Response {
    (StatusCode::OK, axum::Json(body)).into_response()
}
