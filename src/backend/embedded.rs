use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use smallvec::smallvec;
use tokio::sync::mpsc;

use super::{BackendClient, ChunkStream};
use crate::error::GatewayError;
use crate::protocol::canonical::{GenerationRequest, RawChunk, ToolCallFragment, Usage};
use crate::stream::ReasoningMarkers;

const CHANNEL_CAPACITY: usize = 32;

/// One unit of output from an in-process runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeToken {
    /// Generated text, with any reasoning markers inline.
    Text(String),
    /// A complete function call.
    ToolCall { name: String, arguments: String },
}

/// How a runtime generation ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeOutcome {
    pub done_reason: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime unavailable: {0}")]
    Unavailable(String),
    #[error("runtime failed with status {status}: {message}")]
    Failed { status: u16, message: String },
}

impl From<RuntimeError> for GatewayError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Unavailable(message) => GatewayError::BackendUnavailable(message),
            RuntimeError::Failed { status, message } => GatewayError::Backend {
                status,
                body: message,
            },
        }
    }
}

/// Blocking token generator running inside the gateway process.
///
/// `emit` returns `ControlFlow::Break` once the consumer has gone away; the
/// runtime should stop generating at that point.
pub trait ModelRuntime: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns [`RuntimeError`] when the runtime cannot serve the request.
    fn generate(
        &self,
        request: &GenerationRequest,
        emit: &mut dyn FnMut(RuntimeToken) -> ControlFlow<()>,
    ) -> Result<RuntimeOutcome, RuntimeError>;
}

/// Backend that calls a [`ModelRuntime`] on the blocking pool and forwards
/// its tokens over a bounded channel.
pub struct EmbeddedBackend {
    runtime: Arc<dyn ModelRuntime>,
    name: String,
    markers: ReasoningMarkers,
}

impl EmbeddedBackend {
    #[must_use]
    pub fn new(runtime: Arc<dyn ModelRuntime>, markers: ReasoningMarkers) -> Self {
        let name = format!("embedded:{}", runtime.name());
        Self {
            runtime,
            name,
            markers,
        }
    }
}

fn run_runtime(
    runtime: &dyn ModelRuntime,
    request: &GenerationRequest,
    tx: &mpsc::Sender<Result<RawChunk, GatewayError>>,
) {
    let mut next_tool_index = 0usize;
    let mut emit = |token: RuntimeToken| {
        let chunk = match token {
            RuntimeToken::Text(text) => RawChunk::text(text),
            RuntimeToken::ToolCall { name, arguments } => {
                let index = next_tool_index;
                next_tool_index += 1;
                RawChunk {
                    tool_calls: smallvec![ToolCallFragment {
                        index,
                        id: None,
                        name: Some(name),
                        arguments,
                    }],
                    ..RawChunk::default()
                }
            }
        };
        match tx.blocking_send(Ok(chunk)) {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        }
    };

    let last = match runtime.generate(request, &mut emit) {
        Ok(outcome) => Ok(RawChunk {
            done: true,
            done_reason: outcome.done_reason,
            usage: Some(outcome.usage),
            ..RawChunk::default()
        }),
        Err(err) => {
            tracing::warn!(request_id = %request.request_id, error = %err, "embedded runtime failed");
            Err(GatewayError::from(err))
        }
    };
    if tx.blocking_send(last).is_err() {
        tracing::debug!(request_id = %request.request_id, "embedded stream consumer dropped");
    }
}

#[async_trait]
impl BackendClient for EmbeddedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn markers(&self) -> &ReasoningMarkers {
        &self.markers
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<ChunkStream, GatewayError> {
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let runtime = Arc::clone(&self.runtime);
        let owned_request = request.clone();
        tokio::task::spawn_blocking(move || run_runtime(runtime.as_ref(), &owned_request, &tx));

        // Errors raised before the first token keep the same shape as a
        // failed HTTP call: no stream at all.
        let first = rx.recv().await.ok_or_else(|| {
            GatewayError::Internal("embedded runtime exited without output".to_string())
        })??;

        let rest = futures_util::stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        });
        let first_done = first.done;
        let head = futures_util::stream::iter([Ok(first)]);
        if first_done {
            return Ok(Box::pin(head));
        }
        Ok(Box::pin(futures_util::StreamExt::chain(head, rest)))
    }

    async fn list_models(&self) -> Result<Vec<String>, GatewayError> {
        Ok(vec![self.runtime.name().to_string()])
    }
}
