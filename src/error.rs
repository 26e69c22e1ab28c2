use axum::response::IntoResponse;
use serde_json::json;

/// Error type shared by the backend clients, the translation core, and the
/// HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Backend error: status={status}, body={body}")]
    Backend { status: u16, body: String },
    #[error("Backend stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Short machine-readable tag used in error bodies and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation_error",
            GatewayError::BackendUnavailable(_) => "backend_unavailable",
            GatewayError::Backend { .. } => "backend_error",
            GatewayError::StreamInterrupted(_) => "stream_interrupted",
            GatewayError::Internal(_) | GatewayError::Config(_) => "internal_error",
        }
    }

    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            GatewayError::Validation(_) => http::StatusCode::BAD_REQUEST,
            GatewayError::BackendUnavailable(_) => http::StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Backend { .. } | GatewayError::StreamInterrupted(_) => {
                http::StatusCode::BAD_GATEWAY
            }
            GatewayError::Internal(_) | GatewayError::Config(_) => {
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message exposed to clients. Internal faults are not echoed verbatim.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::Internal(_) | GatewayError::Config(_) => {
                "Internal server error".to_string()
            }
            GatewayError::BackendUnavailable(_) => "Unable to connect to backend".to_string(),
            GatewayError::Backend { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = json!({
            "detail": self.public_message(),
            "type": self.kind(),
        });
        if let GatewayError::Backend { status, .. } = self {
            body["upstream_status"] = json!(status);
        }
        body
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), axum::Json(self.to_json())).into_response()
    }
}
