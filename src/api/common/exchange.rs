use std::time::Instant;

use crate::error::GatewayError;
use crate::observability::{log_request_complete, ExchangeRecord};
use crate::protocol::canonical::Usage;
use crate::state::{AppState, RequestIds};

/// Connection-level facts about an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub client_host: Option<String>,
    pub method: String,
    pub path: String,
}

/// Everything needed to log and record one exchange once it completes.
#[derive(Debug, Clone)]
pub(crate) struct ExchangeContext {
    pub(crate) ids: RequestIds,
    pub(crate) endpoint: &'static str,
    meta: RequestMeta,
    started: Instant,
    prompt: String,
    model: String,
}

impl ExchangeContext {
    pub(crate) fn new(ids: RequestIds, endpoint: &'static str, meta: RequestMeta) -> Self {
        Self {
            ids,
            endpoint,
            meta,
            started: Instant::now(),
            prompt: String::new(),
            model: String::new(),
        }
    }

    /// Attach the normalized prompt and model once the body has been parsed.
    pub(crate) fn set_request(&mut self, prompt: &str, model: &str) {
        prompt.clone_into(&mut self.prompt);
        model.clone_into(&mut self.model);
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn record(&self, state: &AppState, status: u16, response: Option<String>, error: Option<String>) {
        state.exchange_log().record(ExchangeRecord {
            request_id: self.ids.uuid,
            client_host: self.meta.client_host.clone(),
            method: self.meta.method.clone(),
            path: self.meta.path.clone(),
            status,
            prompt: self.prompt.clone(),
            generated_response: response,
            error_details: error,
            elapsed_ms: self.elapsed_ms(),
        });
    }

    pub(crate) fn succeeded(&self, state: &AppState, response: String, usage: &Usage) {
        log_request_complete(&self.ids.uuid, self.endpoint, &self.model, usage, self.started);
        self.record(state, 200, Some(response), None);
    }

    pub(crate) fn failed(&self, state: &AppState, err: &GatewayError) {
        let status = err.status_code().as_u16();
        if status >= 500 {
            tracing::warn!(
                request_id = %self.ids.uuid,
                endpoint = self.endpoint,
                model = %self.model,
                status = status,
                error = %err,
                "request failed"
            );
        } else {
            tracing::debug!(
                request_id = %self.ids.uuid,
                endpoint = self.endpoint,
                status = status,
                error = %err,
                "request rejected"
            );
        }
        self.record(state, status, None, Some(err.to_string()));
    }

    /// Failure after a streaming response already went out with 200.
    pub(crate) fn interrupted(&self, state: &AppState, partial: String, details: String) {
        tracing::warn!(
            request_id = %self.ids.uuid,
            endpoint = self.endpoint,
            model = %self.model,
            error = %details,
            "stream ended early"
        );
        self.record(state, 200, Some(partial), Some(details));
    }
}
