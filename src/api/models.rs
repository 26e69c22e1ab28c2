use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::api::common::{json_ok, parse_json_body, sse_ok_response};
use crate::error::GatewayError;
use crate::state::AppState;
use crate::stream::sse::error_frame;

/// List the models the configured backend can serve as
/// `{"models":[{"name":...}]}`.
pub async fn handler(State(state): State<Arc<AppState>>) -> Response {
    match state.backend.list_models().await {
        Ok(models) => {
            let models: Vec<_> = models.into_iter().map(|name| json!({ "name": name })).collect();
            json_ok(&json!({ "models": models }))
        }
        Err(err) => {
            tracing::warn!(backend = state.backend.name(), error = %err, "model listing failed");
            err.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    #[serde(alias = "model")]
    name: String,
}

/// `POST /api/v1/models/pull`. With `stream` set, each progress object is
/// relayed as an SSE `data:` frame; otherwise the final status is returned.
pub async fn pull_handler(state: Arc<AppState>, body: Bytes, stream: bool) -> Response {
    let name = match parse_json_body::<PullRequest>(&body) {
        Ok(body) if !body.name.trim().is_empty() => body.name.trim().to_string(),
        Ok(_) => return GatewayError::Validation("name is required".to_string()).into_response(),
        Err(err) => return err.into_response(),
    };
    tracing::info!(model = %name, stream, "model pull requested");

    if !stream {
        return match state.backend.pull_model(&name).await {
            Ok(status) => json_ok(&status),
            Err(err) => {
                tracing::warn!(model = %name, error = %err, "model pull failed");
                err.into_response()
            }
        };
    }

    let progress = match state.backend.pull_model_stream(&name).await {
        Ok(progress) => progress,
        Err(err) => {
            tracing::warn!(model = %name, error = %err, "model pull failed");
            return err.into_response();
        }
    };
    let frames = progress
        .scan(false, move |failed, item| {
            if *failed {
                return futures_util::future::ready(None);
            }
            let frame = match item {
                Ok(value) => format!("data: {value}\n\n"),
                Err(err) => {
                    *failed = true;
                    tracing::warn!(model = %name, error = %err, "model pull interrupted");
                    error_frame(&err.public_message(), err.kind())
                }
            };
            futures_util::future::ready(Some(Ok::<_, Infallible>(Bytes::from(frame))))
        });
    sse_ok_response(Body::from_stream(frames))
}

/// `DELETE /api/v1/models/{name}`. The configured built-in model is refused.
pub async fn delete_handler(state: Arc<AppState>, name: &str) -> Response {
    if state.config.generation.built_in_model.as_deref() == Some(name) {
        return GatewayError::Validation(format!(
            "The built-in model '{name}' cannot be deleted."
        ))
        .into_response();
    }
    match state.backend.delete_model(name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            tracing::warn!(model = %name, error = %err, "model delete failed");
            err.into_response()
        }
    }
}
