use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use smallvec::smallvec;

use super::{BackendClient, ChunkStream, ProgressStream};
use crate::config::{MockConfig, MockEntryConfig};
use crate::error::GatewayError;
use crate::protocol::canonical::{GenerationRequest, RawChunk, ToolCallFragment, Usage};
use crate::stream::ReasoningMarkers;

/// Scripted reply for one table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    Text(String),
    ToolCall { name: String, arguments: String },
}

impl From<&MockEntryConfig> for MockReply {
    fn from(entry: &MockEntryConfig) -> Self {
        match (&entry.tool_call, &entry.reply) {
            (Some(call), _) => MockReply::ToolCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
            (None, reply) => MockReply::Text(reply.clone().unwrap_or_default()),
        }
    }
}

/// Deterministic test double.
///
/// Lookup order for the request's identifying text: exact key match, then the
/// first key (in insertion order) contained in the text, then the default
/// cycle. The N-th fallback returns `defaults[N % defaults.len()]`.
pub struct MockBackend {
    entries: Vec<(String, MockReply)>,
    defaults: Vec<String>,
    cursor: AtomicUsize,
    token_delay: Duration,
    reasoning: Option<String>,
    markers: ReasoningMarkers,
    models: Mutex<Vec<String>>,
    received: Mutex<Vec<String>>,
}

impl MockBackend {
    #[must_use]
    pub fn new(defaults: Vec<String>, markers: ReasoningMarkers) -> Self {
        let defaults = if defaults.is_empty() {
            crate::config::default_mock_responses()
        } else {
            defaults
        };
        Self {
            entries: Vec::new(),
            defaults,
            cursor: AtomicUsize::new(0),
            token_delay: Duration::ZERO,
            reasoning: None,
            markers,
            models: Mutex::new(vec!["mock-model".to_string()]),
            received: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn from_config(config: &MockConfig, markers: ReasoningMarkers) -> Self {
        let mut backend = Self::new(config.responses.clone(), markers)
            .with_token_delay(Duration::from_millis(config.token_delay_ms))
            .with_models(config.models.clone());
        if let Some(reasoning) = config.reasoning.clone() {
            backend = backend.with_reasoning(reasoning);
        }
        for entry in &config.table {
            backend = backend.with_entry(entry.key.clone(), MockReply::from(entry));
        }
        backend
    }

    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, reply: MockReply) -> Self {
        self.entries.push((key.into(), reply));
        self
    }

    #[must_use]
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    /// Reasoning text prefixed (wrapped in markers) when a request sets `think`.
    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    #[must_use]
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        if !models.is_empty() {
            self.models = Mutex::new(models);
        }
        self
    }

    /// Identifying texts of every request seen so far.
    #[must_use]
    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    #[must_use]
    pub fn resolve(&self, text: &str) -> MockReply {
        if let Some((_, reply)) = self.entries.iter().find(|(key, _)| key == text) {
            return reply.clone();
        }
        if let Some((_, reply)) = self
            .entries
            .iter()
            .find(|(key, _)| !key.is_empty() && text.contains(key.as_str()))
        {
            return reply.clone();
        }
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        MockReply::Text(self.defaults[n % self.defaults.len()].clone())
    }

    fn script(&self, request: &GenerationRequest) -> Vec<RawChunk> {
        let text = request.identifying_text();
        self.received.lock().push(text.to_string());
        let reply = self.resolve(text);

        let mut chunks = Vec::new();
        if request.wants_reasoning() {
            if let Some(reasoning) = self.reasoning.as_deref() {
                let wrapped = self.markers.wrap(reasoning);
                chunks.extend(tokenize(&wrapped).into_iter().map(RawChunk::text));
            }
        }
        match reply {
            MockReply::Text(reply) => {
                chunks.extend(tokenize(&reply).into_iter().map(RawChunk::text));
            }
            MockReply::ToolCall { name, arguments } => {
                let mut name = Some(name);
                for piece in split_fragments(&arguments, 3) {
                    chunks.push(RawChunk {
                        tool_calls: smallvec![ToolCallFragment {
                            index: 0,
                            id: None,
                            name: name.take(),
                            arguments: piece.to_string(),
                        }],
                        ..RawChunk::default()
                    });
                }
            }
        }

        let completion_tokens = u64::try_from(chunks.len()).unwrap_or(u64::MAX);
        chunks.push(RawChunk {
            done: true,
            done_reason: Some("stop".to_string()),
            usage: Some(Usage {
                prompt_tokens: u64::try_from(text.split_whitespace().count()).ok(),
                completion_tokens: Some(completion_tokens),
            }),
            ..RawChunk::default()
        });
        chunks
    }
}

/// Split text the way a tokenizer delivers it: whitespace runs and word runs
/// stay whole, every other character is its own chunk.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    #[derive(PartialEq, Eq, Clone, Copy)]
    enum Class {
        Space,
        Word,
        Punct,
    }
    fn class_of(ch: char) -> Class {
        if ch.is_whitespace() {
            Class::Space
        } else if ch.is_alphanumeric() || ch == '_' || ch == '\'' {
            Class::Word
        } else {
            Class::Punct
        }
    }

    let mut out = Vec::new();
    let mut start = 0usize;
    let mut current: Option<Class> = None;
    for (idx, ch) in text.char_indices() {
        let class = class_of(ch);
        let boundary = match current {
            None => false,
            Some(Class::Punct) => true,
            Some(prev) => prev != class,
        };
        if boundary {
            out.push(text[start..idx].to_string());
            start = idx;
        }
        current = Some(class);
    }
    if start < text.len() {
        out.push(text[start..].to_string());
    }
    out
}

/// Split `text` into at most `parts` non-empty pieces on char boundaries.
fn split_fragments(text: &str, parts: usize) -> Vec<&str> {
    if text.is_empty() {
        return vec![""];
    }
    let step = text.len().div_ceil(parts.max(1)).max(1);
    let mut pieces = Vec::with_capacity(parts);
    let mut start = 0usize;
    while start < text.len() {
        let mut end = (start + step).min(text.len());
        while !text.is_char_boundary(end) {
            end += 1;
        }
        pieces.push(&text[start..end]);
        start = end;
    }
    pieces
}

#[async_trait]
impl BackendClient for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn markers(&self) -> &ReasoningMarkers {
        &self.markers
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<ChunkStream, GatewayError> {
        let chunks = self.script(request);
        let delay = self.token_delay;
        let stream = futures_util::stream::unfold(chunks.into_iter(), move |mut chunks| async move {
            let chunk = chunks.next()?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Some((Ok(chunk), chunks))
        });
        Ok(Box::pin(stream))
    }

    async fn list_models(&self) -> Result<Vec<String>, GatewayError> {
        Ok(self.models.lock().clone())
    }

    async fn pull_model(&self, model: &str) -> Result<serde_json::Value, GatewayError> {
        let mut models = self.models.lock();
        if !models.iter().any(|known| known == model) {
            models.push(model.to_string());
        }
        Ok(serde_json::json!({ "status": "success" }))
    }

    async fn pull_model_stream(&self, model: &str) -> Result<ProgressStream, GatewayError> {
        let done = self.pull_model(model).await?;
        let steps = vec![
            Ok(serde_json::json!({ "status": "pulling manifest" })),
            Ok(done),
        ];
        Ok(Box::pin(futures_util::stream::iter(steps)))
    }

    async fn delete_model(&self, model: &str) -> Result<(), GatewayError> {
        let mut models = self.models.lock();
        let Some(pos) = models.iter().position(|known| known == model) else {
            return Err(GatewayError::Backend {
                status: 404,
                body: format!("model '{model}' not found"),
            });
        };
        models.remove(pos);
        Ok(())
    }
}
