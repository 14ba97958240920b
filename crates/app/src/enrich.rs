//! Best-effort background enrichment workflows.
//!
//! Three independent workflows call the model off the primary chat path:
//! conversation titling, follow-up task suggestion, and on-demand subtask
//! or title generation for tasks. Failures are logged and swallowed, never
//! surfaced. Results are applied by re-fetching the entity by id through
//! the store, so a user edit made while the call was in flight wins over
//! the stale snapshot the call was built from.

use providers::{BackendError, ModelBackend};
use serde::Deserialize;
use shared::{Role, StoreError, StoreResult, Task, TaskPatch, PLACEHOLDER_TITLE};

use crate::prompts;
use crate::store::DomainStore;

/// Longest title the deterministic fallback produces.
const FALLBACK_TITLE_CHARS: usize = 60;
const TITLE_CHARS: usize = 80;

/// An ephemeral follow-up task suggestion attached to one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSuggestion {
    pub title: String,
    pub notes: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuggestionWire {
    task_suggested: bool,
    #[serde(default)]
    task_title: String,
    #[serde(default)]
    task_notes: String,
}

/// Replace the placeholder title once the first exchange has completed.
/// Cosmetic: failure leaves the placeholder and is silent by design.
pub async fn generate_title_if_needed(
    store: &DomainStore,
    backend: &dyn ModelBackend,
    conversation_id: &str,
) {
    let exchange = store.with_state(|s| {
        let convo = s.conversation_anywhere(conversation_id)?;
        if convo.title != PLACEHOLDER_TITLE || convo.completed_replies() != 1 {
            return None;
        }
        let user = convo.history.iter().find(|e| e.role == Role::User)?;
        let model = convo
            .history
            .iter()
            .find(|e| e.role == Role::Model && !e.is_error)?;
        Some((user.text.clone(), model.text.clone()))
    });
    let Some((user_text, model_text)) = exchange else {
        return;
    };

    match backend
        .generate_text(&prompts::conversation_title(&user_text, &model_text))
        .await
    {
        Ok(raw) => {
            let title = clean_single_line(&raw, TITLE_CHARS);
            if title.is_empty() {
                return;
            }
            if let Err(e) = store.set_conversation_title(conversation_id, &title) {
                tracing::debug!(error = %e, "generated title could not be applied");
            }
        }
        Err(e) => tracing::debug!(error = %e, "title synthesis failed"),
    }
}

/// Classify the last exchange for an actionable follow-up. Malformed
/// structured output means "no suggestion", never an error.
pub async fn suggest_task(
    store: &DomainStore,
    backend: &dyn ModelBackend,
    conversation_id: &str,
) -> Option<TaskSuggestion> {
    let (user_text, model_text) = store.with_state(|s| {
        let convo = s.conversation_anywhere(conversation_id)?;
        let model = convo
            .history
            .iter()
            .rev()
            .find(|e| e.role == Role::Model && !e.is_error)?;
        let user = convo.history.iter().rev().find(|e| e.role == Role::User)?;
        Some((user.text.clone(), model.text.clone()))
    })?;

    let value = match backend
        .generate_structured(
            &prompts::task_suggestion(&user_text, &model_text),
            prompts::task_suggestion_schema(),
        )
        .await
    {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "task suggestion call failed");
            return None;
        }
    };
    let wire: SuggestionWire = match serde_json::from_value(value) {
        Ok(w) => w,
        Err(e) => {
            tracing::debug!(error = %e, "task suggestion output did not match schema");
            return None;
        }
    };
    if !wire.task_suggested || wire.task_title.trim().is_empty() {
        return None;
    }
    Some(TaskSuggestion {
        title: wire.task_title,
        notes: wire.task_notes,
    })
}

/// Expand a task into a generated checklist appended to its notes.
/// User-triggered; on failure the notes are left unchanged.
pub async fn expand_subtasks(
    store: &DomainStore,
    backend: &dyn ModelBackend,
    task_id: &str,
) -> StoreResult<Task> {
    let task = fetch_task(store, task_id)?;

    let items = backend
        .generate_structured(
            &prompts::subtask_expansion(&task.title, &task.notes),
            prompts::subtask_list_schema(),
        )
        .await
        .and_then(|v| {
            serde_json::from_value::<Vec<String>>(v)
                .map_err(|e| BackendError::StructuredDecode(e.to_string()))
        });

    match items {
        Ok(items) => {
            let items: Vec<String> = items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if items.is_empty() {
                tracing::debug!("subtask generation returned nothing usable");
                return fetch_task(store, task_id);
            }
            store.append_checklist(task_id, &items)
        }
        Err(e) => {
            tracing::debug!(error = %e, "subtask generation failed, leaving notes unchanged");
            fetch_task(store, task_id)
        }
    }
}

/// Derive a short title from a task's free text. User-triggered; on failure
/// falls back to truncating the first line of the source text.
pub async fn synthesize_task_title(
    store: &DomainStore,
    backend: &dyn ModelBackend,
    task_id: &str,
) -> StoreResult<Task> {
    let task = fetch_task(store, task_id)?;
    let source = if task.notes.trim().is_empty() {
        task.title.clone()
    } else {
        task.notes.clone()
    };

    let title = match backend.generate_text(&prompts::task_title(&source)).await {
        Ok(raw) => clean_single_line(&raw, TITLE_CHARS),
        Err(e) => {
            tracing::debug!(error = %e, "task title synthesis failed, using local fallback");
            fallback_title(&source)
        }
    };
    if title.is_empty() {
        return fetch_task(store, task_id);
    }
    store.update_task(
        task_id,
        TaskPatch {
            title: Some(title),
            ..Default::default()
        },
    )
}

fn fetch_task(store: &DomainStore, task_id: &str) -> StoreResult<Task> {
    store
        .with_state(|s| s.task(task_id).cloned())
        .ok_or_else(|| StoreError::NotFound(format!("task {task_id}")))
}

/// Deterministic local heuristic: first non-empty line, truncated.
pub fn fallback_title(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if line.chars().count() <= FALLBACK_TITLE_CHARS {
        return line.to_string();
    }
    let cut: String = line.chars().take(FALLBACK_TITLE_CHARS).collect();
    format!("{}...", cut.trim_end())
}

/// Model output cleanup: first non-empty line, quotes stripped, length cap.
fn clean_single_line(raw: &str, max_chars: usize) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .trim_matches(|c| c == '"' || c == '\'')
        .trim();
    line.chars().take(max_chars).collect()
}
