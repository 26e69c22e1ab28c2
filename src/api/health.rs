use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "ok",
        "config": {
            "backend": state.backend.name(),
            "backend_kind": config.backend.kind.to_string(),
            "default_model": config.generation.default_model,
            "concurrent_request_limit": config.server.concurrent_request_limit,
            "available_permits": state.available_backend_permits(),
            "exchange_log": state.exchange_log().is_enabled(),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, BackendKind};

    #[test]
    fn health_reports_backend_and_limits() {
        let mut config = AppConfig::default();
        config.backend.kind = BackendKind::Mock;
        config.generation.default_model = Some("llama3".into());
        config.features.exchange_log = false;
        let state = Arc::new(AppState::new(config).unwrap());

        let Json(body) = health_handler(State(state));
        assert_eq!(body["status"], "ok");
        assert_eq!(body["config"]["backend"], "mock");
        assert_eq!(body["config"]["backend_kind"], "mock");
        assert_eq!(body["config"]["default_model"], "llama3");
        assert_eq!(body["config"]["concurrent_request_limit"], 2);
        assert_eq!(body["config"]["available_permits"], 2);
    }
}
