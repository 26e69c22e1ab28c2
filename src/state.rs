mod request_id;

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::backend::{build_backend, BackendClient};
use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::observability::ExchangeLog;

use request_id::RequestIdGenerator;
pub use request_id::RequestIds;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub backend: Arc<dyn BackendClient>,
    limits: LimitState,
    infra: InfraState,
}

struct LimitState {
    backend_permits: Arc<Semaphore>,
}

struct InfraState {
    request_ids: RequestIdGenerator,
    exchange_log: ExchangeLog,
}

impl AppState {
    /// Build state with the backend selected by `config.backend.kind`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the backend cannot be constructed.
    pub fn new(config: AppConfig) -> Result<Self, GatewayError> {
        let backend = build_backend(&config)?;
        Ok(Self::with_backend(config, backend))
    }

    /// Build state around an already constructed backend (embedded runtimes,
    /// tests).
    #[must_use]
    pub fn with_backend(config: AppConfig, backend: Arc<dyn BackendClient>) -> Self {
        let exchange_log = if config.features.exchange_log {
            ExchangeLog::spawn()
        } else {
            ExchangeLog::disabled()
        };
        Self::with_parts(config, backend, exchange_log)
    }

    #[must_use]
    pub fn with_parts(
        config: AppConfig,
        backend: Arc<dyn BackendClient>,
        exchange_log: ExchangeLog,
    ) -> Self {
        let permits = config.server.concurrent_request_limit.max(1);
        Self {
            config,
            backend,
            limits: LimitState {
                backend_permits: Arc::new(Semaphore::new(permits)),
            },
            infra: InfraState {
                request_ids: RequestIdGenerator::new(),
                exchange_log,
            },
        }
    }

    pub fn next_request_ids(&self) -> RequestIds {
        self.infra.request_ids.next()
    }

    #[must_use]
    pub fn exchange_log(&self) -> &ExchangeLog {
        &self.infra.exchange_log
    }

    /// Wait for a backend slot. The permit must be held for the whole
    /// backend call, including the lifetime of a response stream.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the semaphore was closed.
    pub async fn acquire_backend_permit(&self) -> Result<OwnedSemaphorePermit, GatewayError> {
        Arc::clone(&self.limits.backend_permits)
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::Internal("backend limiter closed".to_string()))
    }

    #[must_use]
    pub fn available_backend_permits(&self) -> usize {
        self.limits.backend_permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;

    #[tokio::test]
    async fn permits_follow_concurrency_limit() {
        let mut config = AppConfig::default();
        config.backend.kind = BackendKind::Mock;
        config.server.concurrent_request_limit = 2;
        let state = AppState::new(config).unwrap();
        assert_eq!(state.available_backend_permits(), 2);

        let first = state.acquire_backend_permit().await.unwrap();
        let _second = state.acquire_backend_permit().await.unwrap();
        assert_eq!(state.available_backend_permits(), 0);
        drop(first);
        assert_eq!(state.available_backend_permits(), 1);
    }

    #[test]
    fn mock_backend_selected_from_config() {
        let mut config = AppConfig::default();
        config.backend.kind = BackendKind::Mock;
        config.features.exchange_log = false;
        let state = AppState::new(config).unwrap();
        assert_eq!(state.backend.name(), "mock");
        assert!(!state.exchange_log().is_enabled());
    }
}
