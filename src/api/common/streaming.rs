use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::OwnedSemaphorePermit;

use super::ExchangeContext;
use crate::backend::ChunkStream;
use crate::error::GatewayError;
use crate::protocol::canonical::{GenerationRequest, GenerationResult, TranslatedEvent};
use crate::protocol::legacy::LegacyEventEncoder;
use crate::protocol::openai_chat::stream::ChatChunkEncoder;
use crate::state::AppState;
use crate::stream::sse::error_frame;
use crate::stream::{Aggregator, StreamTranslator};

/// Wire encoder driven by the streaming pipeline.
pub(crate) trait FrameEncoder: Send + 'static {
    fn encode_into(&mut self, event: &TranslatedEvent, out: &mut Vec<String>);
    fn is_finished(&self) -> bool;
}

impl FrameEncoder for LegacyEventEncoder {
    fn encode_into(&mut self, event: &TranslatedEvent, out: &mut Vec<String>) {
        LegacyEventEncoder::encode_into(self, event, out);
    }

    fn is_finished(&self) -> bool {
        LegacyEventEncoder::is_finished(self)
    }
}

impl FrameEncoder for ChatChunkEncoder {
    fn encode_into(&mut self, event: &TranslatedEvent, out: &mut Vec<String>) {
        ChatChunkEncoder::encode_into(self, event, out);
    }

    fn is_finished(&self) -> bool {
        ChatChunkEncoder::is_finished(self)
    }
}

#[inline]
pub(crate) fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}

/// One request's streaming pipeline: backend chunks -> translator -> encoder.
///
/// The backend call is opened lazily on the first poll of the body. A backend
/// that cannot be reached yields an empty stream; one that answers with an
/// error yields a single inline error frame. The permit and the backend
/// stream live exactly as long as the body; dropping the body (client
/// disconnect) drops both.
struct StreamPipeline<E: FrameEncoder> {
    state: Arc<AppState>,
    request: GenerationRequest,
    exchange: ExchangeContext,
    chunks: Option<ChunkStream>,
    permit: Option<OwnedSemaphorePermit>,
    translator: StreamTranslator,
    aggregator: Aggregator,
    encoder: E,
    pending: VecDeque<String>,
    frames: Vec<String>,
    finished: bool,
}

impl<E: FrameEncoder> StreamPipeline<E> {
    async fn advance(&mut self) {
        let Some(chunks) = self.chunks.as_mut() else {
            self.open().await;
            return;
        };

        match chunks.next().await {
            Some(Ok(chunk)) => {
                let event = self.translator.translate(chunk);
                self.aggregator.fold(&event);
                self.encoder.encode_into(&event, &mut self.frames);
                self.pending.extend(self.frames.drain(..));
                if self.encoder.is_finished() {
                    self.complete();
                }
            }
            Some(Err(err)) => self.interrupt(&err),
            None => self.interrupt(&GatewayError::StreamInterrupted(
                "backend stream ended before completion".to_string(),
            )),
        }
    }

    async fn open(&mut self) {
        let permit = match self.state.acquire_backend_permit().await {
            Ok(permit) => permit,
            Err(err) => {
                self.reject(&err);
                return;
            }
        };
        match self.state.backend.generate_stream(&self.request).await {
            Ok(chunks) => {
                self.chunks = Some(chunks);
                self.permit = Some(permit);
            }
            Err(err) => self.reject(&err),
        }
    }

    fn release(&mut self) -> GenerationResult {
        self.finished = true;
        self.chunks = None;
        self.permit = None;
        std::mem::take(&mut self.aggregator).finish()
    }

    fn complete(&mut self) {
        let result = self.release();
        self.exchange
            .succeeded(&self.state, result.content, &result.usage);
    }

    /// Backend call failed before producing anything. An unreachable backend
    /// ends the stream empty; any other failure is reported in one frame.
    fn reject(&mut self, err: &GatewayError) {
        if !matches!(err, GatewayError::BackendUnavailable(_)) {
            self.pending
                .push_back(error_frame(&err.public_message(), err.kind()));
        }
        self.release();
        self.exchange.failed(&self.state, err);
    }

    /// Backend failed mid-flight: signal inline, never fabricate completion.
    fn interrupt(&mut self, err: &GatewayError) {
        self.pending
            .push_back(error_frame(&err.public_message(), err.kind()));
        let result = self.release();
        self.exchange
            .interrupted(&self.state, result.content, err.to_string());
    }
}

impl<E: FrameEncoder> Drop for StreamPipeline<E> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::debug!(
            request_id = %self.exchange.ids.uuid,
            endpoint = self.exchange.endpoint,
            "client disconnected before stream completed"
        );
        let partial = self.release();
        self.exchange.interrupted(
            &self.state,
            partial.content,
            "client disconnected".to_string(),
        );
    }
}

/// Build a `text/event-stream` response driven by `encoder`.
pub(crate) fn stream_response<E: FrameEncoder>(
    state: Arc<AppState>,
    request: GenerationRequest,
    encoder: E,
    exchange: ExchangeContext,
) -> Response {
    let translator = StreamTranslator::new(state.backend.markers().clone());
    let pipeline = StreamPipeline {
        state,
        request,
        exchange,
        chunks: None,
        permit: None,
        translator,
        aggregator: Aggregator::default(),
        encoder,
        pending: VecDeque::new(),
        frames: Vec::with_capacity(4),
        finished: false,
    };

    let frames = futures_util::stream::unfold(pipeline, |mut pipeline| async move {
        loop {
            if let Some(frame) = pipeline.pending.pop_front() {
                return Some((Ok::<_, Infallible>(Bytes::from(frame)), pipeline));
            }
            if pipeline.finished {
                return None;
            }
            pipeline.advance().await;
        }
    });

    sse_ok_response(Body::from_stream(frames))
}
