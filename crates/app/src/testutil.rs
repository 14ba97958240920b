//! Test doubles: an in-memory persister and a scripted model backend.

use async_trait::async_trait;
use parking_lot::Mutex;
use providers::{BackendError, GenerateRequest, ModelBackend, StreamEvent};
use serde_json::Value;
use shared::{AppState, PersistenceError};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::persistence::StatePersister;

/// In-memory persister recording every write-through save.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    initial: Mutex<Option<AppState>>,
    saved: Mutex<Vec<AppState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial(state: AppState) -> Self {
        let store = Self::default();
        *store.inner.initial.lock() = Some(state);
        store
    }

    pub fn save_count(&self) -> usize {
        self.inner.saved.lock().len()
    }

    pub fn last_saved(&self) -> Option<AppState> {
        self.inner.saved.lock().last().cloned()
    }
}

impl StatePersister for MemoryStore {
    fn load(&self) -> Option<AppState> {
        self.inner.initial.lock().clone()
    }

    fn save(&self, state: &AppState) -> Result<(), PersistenceError> {
        self.inner.saved.lock().push(state.clone());
        Ok(())
    }
}

/// Scripted backend: queued replies are handed out in order. An exhausted
/// queue yields an error (for one-shot calls) or an immediately-closed
/// stream, which keeps unrelated tests from hanging.
#[derive(Default)]
pub struct MockBackend {
    streams: Mutex<VecDeque<Vec<Result<StreamEvent, BackendError>>>>,
    text_replies: Mutex<VecDeque<Result<String, BackendError>>>,
    structured_replies: Mutex<VecDeque<Result<Value, BackendError>>>,
    pub requests: Mutex<Vec<GenerateRequest>>,
    pub text_prompts: Mutex<Vec<String>>,
    pub structured_prompts: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_stream(&self, events: Vec<Result<StreamEvent, BackendError>>) {
        self.streams.lock().push_back(events);
    }

    pub fn push_text(&self, reply: Result<String, BackendError>) {
        self.text_replies.lock().push_back(reply);
    }

    pub fn push_structured(&self, reply: Result<Value, BackendError>) {
        self.structured_replies.lock().push_back(reply);
    }

    /// Convenience: a stream of plain text deltas that completes normally.
    pub fn push_text_stream(&self, deltas: &[&str]) {
        self.push_stream(
            deltas
                .iter()
                .map(|d| Ok(StreamEvent::TextDelta(d.to_string())))
                .collect(),
        );
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn open_stream(
        &self,
        request: GenerateRequest,
    ) -> Result<mpsc::Receiver<Result<StreamEvent, BackendError>>, BackendError> {
        self.requests.lock().push(request);
        let events = self.streams.lock().pop_front().unwrap_or_default();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn generate_text(&self, prompt: &str) -> Result<String, BackendError> {
        self.text_prompts.lock().push(prompt.to_string());
        self.text_replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Stream("no scripted text reply".to_string())))
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        _schema: Value,
    ) -> Result<Value, BackendError> {
        self.structured_prompts.lock().push(prompt.to_string());
        self.structured_replies.lock().pop_front().unwrap_or_else(|| {
            Err(BackendError::StructuredDecode(
                "no scripted structured reply".to_string(),
            ))
        })
    }
}
