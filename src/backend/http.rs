use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;

use super::{BackendClient, ChunkStream, ProgressStream};
use crate::error::GatewayError;
use crate::protocol::canonical::{GenerationRequest, GenerationResult};
use crate::protocol::ollama::{
    encode_chat_request, OllamaChatChunk, OllamaTagsResponse, ThinkingInliner,
};
use crate::stream::sse::ndjson_line_stream;
use crate::stream::{collect, ReasoningMarkers};

/// Client for an Ollama-compatible model service.
///
/// Transport failures surface as [`GatewayError::BackendUnavailable`],
/// non-success statuses as [`GatewayError::Backend`]. Nothing is retried.
pub struct HttpBackend {
    client: reqwest::Client,
    chat_url: url::Url,
    tags_url: url::Url,
    pull_url: url::Url,
    delete_url: url::Url,
    timeout: Duration,
    markers: ReasoningMarkers,
}

impl HttpBackend {
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when `base_url` is not a valid URL or
    /// the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        markers: ReasoningMarkers,
    ) -> Result<Self, GatewayError> {
        let mut base = url::Url::parse(base_url.trim())
            .map_err(|err| GatewayError::Config(format!("invalid backend base_url: {err}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = |path: &str| {
            base.join(path)
                .map_err(|err| GatewayError::Config(format!("invalid backend url for {path}: {err}")))
        };
        let chat_url = endpoint("api/chat")?;
        let tags_url = endpoint("api/tags")?;
        let pull_url = endpoint("api/pull")?;
        let delete_url = endpoint("api/delete")?;

        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|err| GatewayError::Config(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            chat_url,
            tags_url,
            pull_url,
            delete_url,
            timeout,
            markers,
        })
    }

    async fn post_chat(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, GatewayError> {
        let body = encode_chat_request(request, stream);
        let mut builder = self.client.post(self.chat_url.clone()).json(&body);
        if !stream {
            builder = builder.timeout(self.timeout);
        }
        let response = builder.send().await.map_err(|err| {
            tracing::warn!(
                request_id = %request.request_id,
                model = %request.model,
                error = %err,
                "backend request failed"
            );
            GatewayError::BackendUnavailable(err.to_string())
        })?;
        check_status(response).await
    }

    /// Pulls run as long as the download takes, so only the connect timeout applies.
    async fn post_pull(&self, model: &str, stream: bool) -> Result<reqwest::Response, GatewayError> {
        let body = serde_json::json!({ "model": model, "stream": stream });
        let response = self
            .client
            .post(self.pull_url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                tracing::warn!(%model, error = %err, "model pull request failed");
                GatewayError::BackendUnavailable(err.to_string())
            })?;
        check_status(response).await
    }
}

/// A progress record carrying `error` ends the pull with that message.
fn progress_record(line: &[u8]) -> Result<serde_json::Value, GatewayError> {
    let value: serde_json::Value = serde_json::from_slice(line).map_err(|err| {
        GatewayError::StreamInterrupted(format!("malformed pull progress record: {err}"))
    })?;
    if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
        return Err(GatewayError::StreamInterrupted(error.to_string()));
    }
    Ok(value)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    tracing::warn!(status = status.as_u16(), body = %text, "backend returned error status");
    Err(GatewayError::Backend {
        status: status.as_u16(),
        body: extract_error_message(&text),
    })
}

/// Pull `error` out of an Ollama JSON error body, falling back to the raw text.
fn extract_error_message(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|value| value.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| text.to_string())
}

struct LineState<S> {
    lines: std::pin::Pin<Box<S>>,
    inliner: ThinkingInliner,
    idle_timeout: Duration,
    finished: bool,
}

#[async_trait]
impl BackendClient for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    fn markers(&self) -> &ReasoningMarkers {
        &self.markers
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<ChunkStream, GatewayError> {
        let response = self.post_chat(request, true).await?;
        let lines = ndjson_line_stream(response.bytes_stream());
        let state = LineState {
            lines: Box::pin(lines),
            inliner: ThinkingInliner::new(self.markers.clone()),
            idle_timeout: self.timeout,
            finished: false,
        };

        let chunks = futures_util::stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }
            let next = match tokio::time::timeout(state.idle_timeout, state.lines.next()).await {
                Ok(next) => next,
                Err(_) => {
                    state.finished = true;
                    return Some((
                        Err(GatewayError::StreamInterrupted(
                            "backend stream idle timeout".to_string(),
                        )),
                        state,
                    ));
                }
            };

            let item = match next {
                None => {
                    state.finished = true;
                    Err(GatewayError::StreamInterrupted(
                        "backend closed stream before completion".to_string(),
                    ))
                }
                Some(Err(err)) => {
                    state.finished = true;
                    Err(GatewayError::StreamInterrupted(err.to_string()))
                }
                Some(Ok(line)) => match serde_json::from_slice::<OllamaChatChunk>(&line) {
                    Ok(chunk) => {
                        if let Some(error) = chunk.error {
                            state.finished = true;
                            Err(GatewayError::StreamInterrupted(error))
                        } else {
                            let raw = state.inliner.convert(chunk);
                            state.finished = raw.done;
                            Ok(raw)
                        }
                    }
                    Err(err) => {
                        state.finished = true;
                        Err(GatewayError::StreamInterrupted(format!(
                            "malformed backend record: {err}"
                        )))
                    }
                },
            };
            Some((item, state))
        });

        Ok(Box::pin(chunks))
    }

    async fn generate_batch(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, GatewayError> {
        let response = self.post_chat(request, false).await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|err| {
            GatewayError::StreamInterrupted(format!("failed to read backend response: {err}"))
        })?;
        let chunk: OllamaChatChunk =
            serde_json::from_slice(&bytes).map_err(|err| GatewayError::Backend {
                status,
                body: format!("malformed backend response: {err}"),
            })?;
        if let Some(error) = chunk.error {
            return Err(GatewayError::Backend { status, body: error });
        }

        let mut inliner = ThinkingInliner::new(self.markers.clone());
        let mut raw = inliner.convert(chunk);
        raw.done = true;
        collect(futures_util::stream::iter([Ok(raw)]), self.markers.clone()).await
    }

    async fn list_models(&self) -> Result<Vec<String>, GatewayError> {
        let response = self
            .client
            .get(self.tags_url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| GatewayError::BackendUnavailable(err.to_string()))?;
        let response = check_status(response).await?;
        let status = response.status().as_u16();
        let tags: OllamaTagsResponse =
            response.json().await.map_err(|err| GatewayError::Backend {
                status,
                body: format!("malformed model list: {err}"),
            })?;
        Ok(tags.models.into_iter().map(|tag| tag.name).collect())
    }

    async fn pull_model(&self, model: &str) -> Result<serde_json::Value, GatewayError> {
        let response = self.post_pull(model, false).await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|err| {
            GatewayError::StreamInterrupted(format!("failed to read pull response: {err}"))
        })?;
        progress_record(&bytes).map_err(|err| match err {
            GatewayError::StreamInterrupted(body) => GatewayError::Backend { status, body },
            other => other,
        })
    }

    async fn pull_model_stream(&self, model: &str) -> Result<ProgressStream, GatewayError> {
        let response = self.post_pull(model, true).await?;
        let lines = ndjson_line_stream(response.bytes_stream());
        let progress = futures_util::stream::unfold(
            (Box::pin(lines), false),
            |(mut lines, finished)| async move {
                if finished {
                    return None;
                }
                let item = match lines.next().await? {
                    Ok(line) => progress_record(&line),
                    Err(err) => Err(GatewayError::StreamInterrupted(err.to_string())),
                };
                let finished = item.is_err();
                Some((item, (lines, finished)))
            },
        );
        Ok(Box::pin(progress))
    }

    async fn delete_model(&self, model: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .delete(self.delete_url.clone())
            .json(&serde_json::json!({ "model": model }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| GatewayError::BackendUnavailable(err.to_string()))?;
        check_status(response).await?;
        tracing::info!(%model, "model deleted");
        Ok(())
    }
}
