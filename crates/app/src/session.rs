//! Chat controller: binds model sessions to the active conversation and
//! reconciles streamed replies into the domain store.
//!
//! Session affinity is per-conversation: switching conversations rebuilds
//! the binding, so one conversation's context never leaks into another's
//! reply. The user entry is committed before the network call, the reply
//! is buffered transiently while streaming, and exactly one final entry is
//! committed per send: the full reply, or an error marker.

use parking_lot::Mutex;
use providers::{GenerateRequest, ModelBackend, StreamEvent, ToolConfig};
use shared::{GroundingChunk, HistoryEntry, StoreError, StoreResult};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::enrich::{self, TaskSuggestion};
use crate::store::DomainStore;

/// Events emitted while a reply is in flight. Transient: the view renders
/// them, but only `Completed`/`Failed` correspond to committed state.
#[derive(Debug, Clone)]
pub enum ReplyEvent {
    /// A text increment to concatenate onto the in-progress reply.
    Delta(String),
    /// The cumulative citation set; replaces any earlier set.
    Grounding(Vec<GroundingChunk>),
    /// The finalized entry, already committed to the store.
    Completed(HistoryEntry),
    /// The stream failed; partial output was discarded and an error marker
    /// committed instead.
    Failed(String),
    /// Ephemeral follow-up task suggestion for this reply. Never persisted;
    /// dropping the receiver is the dismissal.
    Suggestion(TaskSuggestion),
}

#[derive(Clone)]
struct SessionBinding {
    conversation_id: String,
    system_instruction: Option<String>,
}

pub struct ChatController {
    store: DomainStore,
    backend: Arc<dyn ModelBackend>,
    session: Mutex<Option<SessionBinding>>,
}

impl ChatController {
    pub fn new(store: DomainStore, backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            store,
            backend,
            session: Mutex::new(None),
        }
    }

    /// Idempotent: rebuilds the binding only when the conversation changed.
    /// The binding snapshots the conversation's custom instructions; history
    /// is replayed fresh on every send.
    pub fn ensure_session(&self, conversation_id: &str) -> StoreResult<()> {
        {
            let session = self.session.lock();
            if session
                .as_ref()
                .map(|b| b.conversation_id.as_str())
                == Some(conversation_id)
            {
                return Ok(());
            }
        }
        let convo = self
            .store
            .with_state(|s| s.conversation_anywhere(conversation_id).cloned())
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        let system_instruction = if convo.custom_instructions.trim().is_empty() {
            None
        } else {
            Some(convo.custom_instructions.clone())
        };
        *self.session.lock() = Some(SessionBinding {
            conversation_id: conversation_id.to_string(),
            system_instruction,
        });
        Ok(())
    }

    /// Send a user message and stream the reply.
    ///
    /// The user entry is appended (and persisted) before the request goes
    /// out, so a crash mid-request cannot lose the user's input. The
    /// returned receiver may be dropped at any point; the final commit
    /// happens regardless.
    pub fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
        tools: ToolConfig,
    ) -> StoreResult<mpsc::UnboundedReceiver<ReplyEvent>> {
        if text.trim().is_empty() {
            return Err(StoreError::Validation(
                "message must not be empty".to_string(),
            ));
        }
        self.ensure_session(conversation_id)?;

        self.store
            .append_message(conversation_id, HistoryEntry::user(text))?;

        let history = self
            .store
            .with_state(|s| {
                s.conversation_anywhere(conversation_id)
                    .map(|c| c.history.clone())
            })
            .unwrap_or_default();
        let system_instruction = self
            .session
            .lock()
            .as_ref()
            .and_then(|b| b.system_instruction.clone());
        let request = GenerateRequest {
            history,
            system_instruction,
            tools,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let store = self.store.clone();
        let backend = self.backend.clone();
        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move {
            run_reply(store, backend, conversation_id, request, tx).await;
        });
        Ok(rx)
    }
}

async fn run_reply(
    store: DomainStore,
    backend: Arc<dyn ModelBackend>,
    conversation_id: String,
    request: GenerateRequest,
    tx: mpsc::UnboundedSender<ReplyEvent>,
) {
    let mut events = match backend.open_stream(request).await {
        Ok(rx) => rx,
        Err(e) => {
            commit_failure(&store, &conversation_id, &tx, &e.to_string());
            return;
        }
    };

    let mut buffer = String::new();
    let mut grounding: Vec<GroundingChunk> = Vec::new();
    while let Some(event) = events.recv().await {
        match event {
            Ok(StreamEvent::TextDelta(delta)) => {
                buffer.push_str(&delta);
                let _ = tx.send(ReplyEvent::Delta(delta));
            }
            Ok(StreamEvent::Grounding(chunks)) => {
                // The backend resends the cumulative set; last non-empty wins.
                if !chunks.is_empty() {
                    grounding = chunks.clone();
                    let _ = tx.send(ReplyEvent::Grounding(chunks));
                }
            }
            Err(e) => {
                commit_failure(&store, &conversation_id, &tx, &e.to_string());
                return;
            }
        }
    }

    let entry = HistoryEntry::model(buffer, grounding);
    if let Err(e) = store.append_message(&conversation_id, entry.clone()) {
        tracing::warn!(error = %e, "completed reply could not be committed");
        return;
    }
    let _ = tx.send(ReplyEvent::Completed(entry));

    // Best-effort enrichment; neither call can fail the primary flow.
    enrich::generate_title_if_needed(&store, backend.as_ref(), &conversation_id).await;
    if let Some(suggestion) =
        enrich::suggest_task(&store, backend.as_ref(), &conversation_id).await
    {
        let _ = tx.send(ReplyEvent::Suggestion(suggestion));
    }
}

/// Discard the partial buffer and leave a single error marker in history;
/// the visible history must never end in a silently truncated reply.
fn commit_failure(
    store: &DomainStore,
    conversation_id: &str,
    tx: &mpsc::UnboundedSender<ReplyEvent>,
    message: &str,
) {
    if let Err(e) = store.append_message(conversation_id, HistoryEntry::error(message)) {
        tracing::warn!(error = %e, "error marker could not be committed");
    }
    let _ = tx.send(ReplyEvent::Failed(message.to_string()));
}
