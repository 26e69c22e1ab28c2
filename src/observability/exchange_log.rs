use tokio::sync::mpsc;

const DEFAULT_CAPACITY: usize = 1024;

/// One request/response pair handed to the persistence boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRecord {
    pub request_id: uuid::Uuid,
    pub client_host: Option<String>,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub prompt: String,
    pub generated_response: Option<String>,
    pub error_details: Option<String>,
    pub elapsed_ms: u64,
}

/// Non-blocking sink for [`ExchangeRecord`]s.
///
/// Records are queued with `try_send`; a full queue drops the record rather
/// than stalling a response.
#[derive(Debug, Clone, Default)]
pub struct ExchangeLog {
    tx: Option<mpsc::Sender<ExchangeRecord>>,
}

impl ExchangeLog {
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Start a background task that emits records through `tracing`.
    /// Returns a disabled log when called outside a tokio runtime.
    #[must_use]
    pub fn spawn() -> Self {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return Self::disabled();
        };
        let (log, rx) = Self::channel(DEFAULT_CAPACITY);
        handle.spawn(drain(rx));
        log
    }

    /// A log whose records are delivered to the returned receiver.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ExchangeRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    pub fn record(&self, record: ExchangeRecord) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        if let Err(err) = tx.try_send(record) {
            tracing::debug!(error = %err, "exchange log record dropped");
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }
}

async fn drain(mut rx: mpsc::Receiver<ExchangeRecord>) {
    while let Some(record) = rx.recv().await {
        tracing::info!(
            target: "olm_gateway::exchange",
            request_id = %record.request_id,
            client_host = record.client_host.as_deref().unwrap_or("-"),
            method = %record.method,
            path = %record.path,
            status = record.status,
            elapsed_ms = record.elapsed_ms,
            prompt_len = record.prompt.len(),
            response_len = record.generated_response.as_ref().map_or(0, String::len),
            error = record.error_details.as_deref().unwrap_or(""),
            "exchange recorded"
        );
    }
}
