//! Backend clients: one trait, three interchangeable implementations.

pub mod embedded;
pub mod http;
pub mod mock;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;

use crate::config::{AppConfig, BackendKind};
use crate::error::GatewayError;
use crate::protocol::canonical::{GenerationRequest, GenerationResult, RawChunk};
use crate::stream::{collect, ReasoningMarkers};

pub use self::embedded::{EmbeddedBackend, ModelRuntime, RuntimeError, RuntimeOutcome, RuntimeToken};
pub use self::http::HttpBackend;
pub use self::mock::{MockBackend, MockReply};

/// Single-pass, finite stream of backend increments terminated by a chunk
/// with `done = true`.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<RawChunk, GatewayError>> + Send>>;

/// Progress objects reported while a model is pulled.
pub type ProgressStream =
    Pin<Box<dyn Stream<Item = Result<serde_json::Value, GatewayError>> + Send>>;

fn unmanaged(backend: &str) -> GatewayError {
    GatewayError::Backend {
        status: 501,
        body: format!("{backend} backend does not manage models"),
    }
}

/// Uniform contract over the real, embedded, and mock backends.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Short name used in logs and `/health`.
    fn name(&self) -> &str;

    /// Markers this backend uses to delimit inline reasoning.
    fn markers(&self) -> &ReasoningMarkers;

    /// Start a streaming generation. Errors returned here happen before any
    /// chunk was produced; later failures arrive as stream items.
    async fn generate_stream(&self, request: &GenerationRequest)
        -> Result<ChunkStream, GatewayError>;

    /// Run a generation to completion.
    async fn generate_batch(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, GatewayError> {
        let chunks = self.generate_stream(request).await?;
        collect(chunks, self.markers().clone()).await
    }

    /// Model names this backend can serve.
    async fn list_models(&self) -> Result<Vec<String>, GatewayError>;

    /// Download `model` and return the final status object.
    async fn pull_model(&self, model: &str) -> Result<serde_json::Value, GatewayError> {
        let _ = model;
        Err(unmanaged(self.name()))
    }

    /// Download `model`, reporting each progress object as it arrives.
    async fn pull_model_stream(&self, model: &str) -> Result<ProgressStream, GatewayError> {
        let _ = model;
        Err(unmanaged(self.name()))
    }

    /// Remove `model` from the backend's local store.
    async fn delete_model(&self, model: &str) -> Result<(), GatewayError> {
        let _ = model;
        Err(unmanaged(self.name()))
    }
}

/// Build the backend selected by configuration.
///
/// # Errors
///
/// Returns [`GatewayError::Config`] when the HTTP client cannot be built.
pub fn build_backend(config: &AppConfig) -> Result<Arc<dyn BackendClient>, GatewayError> {
    let markers = ReasoningMarkers::new(
        &config.generation.reasoning_open_marker,
        &config.generation.reasoning_close_marker,
    );
    match config.backend.kind {
        BackendKind::Http => Ok(Arc::new(HttpBackend::new(
            &config.backend.base_url,
            Duration::from_secs(config.server.timeout),
            markers,
        )?)),
        BackendKind::Mock => Ok(Arc::new(MockBackend::from_config(
            &config.backend.mock,
            markers,
        ))),
    }
}
