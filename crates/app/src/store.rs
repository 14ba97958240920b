//! The domain store: single writer of application truth.
//!
//! Every mutation validates its input, updates the in-memory `AppState`,
//! persists the snapshot write-through, and then notifies subscribers.
//! Critical sections are synchronous and never span an await point;
//! background workflows commit through the same operations, re-fetching
//! entities by id, so interleaving with user edits is safe.

use parking_lot::Mutex;
use shared::checklist;
use shared::{
    AppState, Conversation, HistoryEntry, NewTask, Settings, StoreError, StoreResult, Task,
    TaskPatch,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::persistence::StatePersister;

/// What part of the state a committed mutation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Conversations,
    ActiveConversation,
    Tasks,
    Settings,
}

/// A conversation-search match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub conversation_id: String,
    pub title: String,
    pub snippet: String,
    pub archived: bool,
}

#[derive(Clone)]
pub struct DomainStore {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<AppState>,
    persister: Box<dyn StatePersister>,
    events: broadcast::Sender<StateChange>,
}

impl DomainStore {
    /// Load the persisted snapshot or start from defaults.
    pub fn new(persister: Box<dyn StatePersister>) -> Self {
        let state = persister.load().unwrap_or_default();
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                persister,
                events,
            }),
        }
    }

    /// View boundary: one event per committed mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.inner.events.subscribe()
    }

    /// Read access to the current state.
    pub fn with_state<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        f(&self.inner.state.lock())
    }

    fn commit(&self, state: &AppState, change: StateChange) {
        if let Err(e) = self.inner.persister.save(state) {
            tracing::warn!(error = %e, "state snapshot write failed");
        }
        let _ = self.inner.events.send(change);
    }

    // Conversations

    pub fn create_conversation(&self) -> Conversation {
        let mut state = self.inner.state.lock();
        let convo = Conversation::new(state.settings.custom_instructions.clone());
        state.conversations.insert(0, convo.clone());
        state.active_conversation_id = Some(convo.id.clone());
        self.commit(&state, StateChange::Conversations);
        convo
    }

    /// `None` clears the selection; `Some` must name an active conversation.
    pub fn select_conversation(&self, id: Option<&str>) -> StoreResult<()> {
        let mut state = self.inner.state.lock();
        match id {
            None => state.active_conversation_id = None,
            Some(id) => {
                if state.conversation(id).is_none() {
                    return Err(StoreError::NotFound(format!("conversation {id}")));
                }
                state.active_conversation_id = Some(id.to_string());
            }
        }
        self.commit(&state, StateChange::ActiveConversation);
        Ok(())
    }

    pub fn delete_conversation(&self, id: &str, from_archive: bool) -> StoreResult<()> {
        let mut state = self.inner.state.lock();
        let partition = if from_archive {
            &mut state.archived_conversations
        } else {
            &mut state.conversations
        };
        let pos = partition
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))?;
        partition.remove(pos);
        Self::fix_active_selection(&mut state, id);
        self.commit(&state, StateChange::Conversations);
        Ok(())
    }

    /// Move a conversation between the active and archived partitions.
    /// An id lives in exactly one partition at any time.
    pub fn archive_toggle(&self, id: &str) -> StoreResult<()> {
        let mut state = self.inner.state.lock();
        if let Some(pos) = state.conversations.iter().position(|c| c.id == id) {
            let convo = state.conversations.remove(pos);
            state.archived_conversations.insert(0, convo);
            Self::fix_active_selection(&mut state, id);
        } else if let Some(pos) = state
            .archived_conversations
            .iter()
            .position(|c| c.id == id)
        {
            let convo = state.archived_conversations.remove(pos);
            state.conversations.insert(0, convo);
        } else {
            return Err(StoreError::NotFound(format!("conversation {id}")));
        }
        self.commit(&state, StateChange::Conversations);
        Ok(())
    }

    /// Append a committed history entry. Searches both partitions: a stream
    /// that completes after the user archived the conversation still lands.
    pub fn append_message(&self, conversation_id: &str, entry: HistoryEntry) -> StoreResult<()> {
        let mut state = self.inner.state.lock();
        let convo = state
            .conversation_anywhere_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        convo.history.push(entry);
        self.commit(&state, StateChange::Conversations);
        Ok(())
    }

    pub fn set_conversation_title(&self, id: &str, title: &str) -> StoreResult<()> {
        let mut state = self.inner.state.lock();
        let convo = state
            .conversation_anywhere_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))?;
        convo.title = title.to_string();
        self.commit(&state, StateChange::Conversations);
        Ok(())
    }

    pub fn set_custom_instructions(&self, id: &str, instructions: &str) -> StoreResult<()> {
        let mut state = self.inner.state.lock();
        let convo = state
            .conversation_anywhere_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))?;
        convo.custom_instructions = instructions.to_string();
        self.commit(&state, StateChange::Conversations);
        Ok(())
    }

    /// Keyword search over conversation content. The archived partition is
    /// scanned only when `settings.search_archived` is on.
    pub fn search_conversations(&self, query: &str) -> Vec<SearchHit> {
        let state = self.inner.state.lock();
        let needle = query.to_lowercase();
        let mut hits = Vec::new();
        let mut scan = |convos: &[Conversation], archived: bool, hits: &mut Vec<SearchHit>| {
            for convo in convos {
                let matched = convo
                    .history
                    .iter()
                    .find(|e| e.text.to_lowercase().contains(&needle));
                if let Some(entry) = matched {
                    hits.push(SearchHit {
                        conversation_id: convo.id.clone(),
                        title: convo.title.clone(),
                        snippet: extract_snippet(&entry.text, &needle),
                        archived,
                    });
                }
            }
        };
        scan(&state.conversations, false, &mut hits);
        if state.settings.search_archived {
            scan(&state.archived_conversations, true, &mut hits);
        }
        hits
    }

    // Tasks

    pub fn create_task(&self, new: NewTask) -> StoreResult<Task> {
        if new.title.trim().is_empty() {
            return Err(StoreError::Validation(
                "task title must not be empty".to_string(),
            ));
        }
        let mut state = self.inner.state.lock();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            title: new.title,
            notes: new.notes,
            status: Default::default(),
            priority: new.priority,
            due_date: new.due_date,
            created_at: chrono::Utc::now(),
            source_conversation_id: new.source_conversation_id,
            source_message_text: new.source_message_text,
        };
        state.tasks.push(task.clone());
        self.commit(&state, StateChange::Tasks);
        Ok(task)
    }

    pub fn update_task(&self, id: &str, patch: TaskPatch) -> StoreResult<Task> {
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(StoreError::Validation(
                    "task title must not be empty".to_string(),
                ));
            }
        }
        let mut state = self.inner.state.lock();
        let task = state
            .task_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        if let Some(title) = patch.title {
            task.title = title;
        }
        if let Some(notes) = patch.notes {
            task.notes = notes;
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(due_date) = patch.due_date {
            task.due_date = due_date;
        }
        let task = task.clone();
        self.commit(&state, StateChange::Tasks);
        Ok(task)
    }

    pub fn delete_task(&self, id: &str) -> StoreResult<()> {
        let mut state = self.inner.state.lock();
        let pos = state
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        state.tasks.remove(pos);
        self.commit(&state, StateChange::Tasks);
        Ok(())
    }

    /// Flip checklist item `index` inside the task's notes (positional
    /// addressing over checklist lines only).
    pub fn toggle_subtask(&self, task_id: &str, index: usize) -> StoreResult<Task> {
        let mut state = self.inner.state.lock();
        let task = state
            .task_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(format!("task {task_id}")))?;
        let toggled = checklist::toggle(&task.notes, index).ok_or_else(|| {
            StoreError::Validation(format!("no checklist item at index {index}"))
        })?;
        task.notes = toggled;
        let task = task.clone();
        self.commit(&state, StateChange::Tasks);
        Ok(task)
    }

    /// Append freshly generated subtasks to a task's notes, separated from
    /// existing notes by a blank line. Runs atomically under the lock so a
    /// concurrent user edit cannot be lost.
    pub fn append_checklist(&self, task_id: &str, items: &[String]) -> StoreResult<Task> {
        if items.is_empty() {
            return Err(StoreError::Validation(
                "checklist items must not be empty".to_string(),
            ));
        }
        let mut state = self.inner.state.lock();
        let task = state
            .task_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(format!("task {task_id}")))?;
        let block = checklist::encode_unchecked(items);
        if task.notes.is_empty() {
            task.notes = block;
        } else {
            task.notes = format!("{}\n\n{}", task.notes, block);
        }
        let task = task.clone();
        self.commit(&state, StateChange::Tasks);
        Ok(task)
    }

    // Settings

    pub fn update_settings(&self, settings: Settings) {
        let mut state = self.inner.state.lock();
        state.settings = settings;
        self.commit(&state, StateChange::Settings);
    }

    /// After removing `deleted_id` from the active partition, point the
    /// selection at the first remaining active conversation, or clear it.
    fn fix_active_selection(state: &mut AppState, deleted_id: &str) {
        if state.active_conversation_id.as_deref() == Some(deleted_id) {
            state.active_conversation_id = state.conversations.first().map(|c| c.id.clone());
        }
    }
}

fn extract_snippet(content: &str, needle: &str) -> String {
    let lower = content.to_lowercase();
    let Some(pos) = lower.find(needle) else {
        return content.chars().take(60).collect();
    };
    // Lowercasing can shift byte offsets, so clamp and widen to boundaries.
    let pos = pos.min(content.len());
    let mut start = pos.saturating_sub(30);
    while !content.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (pos + needle.len() + 30).min(content.len());
    while !content.is_char_boundary(end) {
        end += 1;
    }
    let mut snippet = content[start..end].to_string();
    if start > 0 {
        snippet = format!("...{snippet}");
    }
    if end < content.len() {
        snippet = format!("{snippet}...");
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryStore;
    use shared::TaskStatus;

    fn store() -> (DomainStore, MemoryStore) {
        let mem = MemoryStore::new();
        (DomainStore::new(Box::new(mem.clone())), mem)
    }

    #[test]
    fn create_conversation_selects_it_and_persists() {
        let (store, mem) = store();
        let convo = store.create_conversation();
        store.with_state(|s| {
            assert_eq!(s.active_conversation_id.as_deref(), Some(convo.id.as_str()));
            assert_eq!(s.conversations.len(), 1);
        });
        assert_eq!(mem.save_count(), 1);
        assert_eq!(mem.last_saved().unwrap().conversations.len(), 1);
    }

    #[test]
    fn new_conversation_inherits_default_instructions() {
        let (store, _) = store();
        store.update_settings(Settings {
            custom_instructions: "be brief".to_string(),
            ..Settings::default()
        });
        let convo = store.create_conversation();
        assert_eq!(convo.custom_instructions, "be brief");
    }

    #[test]
    fn selecting_a_missing_conversation_is_not_found() {
        let (store, _) = store();
        assert!(matches!(
            store.select_conversation(Some("nope")),
            Err(StoreError::NotFound(_))
        ));
        // Clearing is always valid.
        store.select_conversation(None).unwrap();
        store.with_state(|s| assert!(s.active_conversation_id.is_none()));
    }

    #[test]
    fn archive_toggle_parity_and_exclusivity() {
        let (store, _) = store();
        let convo = store.create_conversation();
        for round in 0..4 {
            store.archive_toggle(&convo.id).unwrap();
            store.with_state(|s| {
                let active = s.conversation(&convo.id).is_some();
                let archived = s.archived(&convo.id).is_some();
                assert!(active != archived, "id must live in exactly one partition");
                // Odd number of toggles so far means archived.
                assert_eq!(archived, round % 2 == 0);
            });
        }
    }

    #[test]
    fn archiving_the_active_conversation_reselects() {
        let (store, _) = store();
        let older = store.create_conversation();
        let newer = store.create_conversation();
        store.archive_toggle(&newer.id).unwrap();
        store.with_state(|s| {
            assert_eq!(s.active_conversation_id.as_deref(), Some(older.id.as_str()));
        });
    }

    #[test]
    fn deleting_the_active_conversation_selects_another_or_none() {
        let (store, _) = store();
        let a = store.create_conversation();
        let b = store.create_conversation();
        let c = store.create_conversation();

        store.delete_conversation(&c.id, false).unwrap();
        store.with_state(|s| {
            assert_eq!(s.active_conversation_id.as_deref(), Some(b.id.as_str()));
        });
        store.delete_conversation(&b.id, false).unwrap();
        store.with_state(|s| {
            assert_eq!(s.active_conversation_id.as_deref(), Some(a.id.as_str()));
        });
        store.delete_conversation(&a.id, false).unwrap();
        store.with_state(|s| assert!(s.active_conversation_id.is_none()));
    }

    #[test]
    fn delete_honors_the_partition_flag() {
        let (store, _) = store();
        let convo = store.create_conversation();
        store.archive_toggle(&convo.id).unwrap();
        assert!(matches!(
            store.delete_conversation(&convo.id, false),
            Err(StoreError::NotFound(_))
        ));
        store.delete_conversation(&convo.id, true).unwrap();
        store.with_state(|s| assert!(s.archived_conversations.is_empty()));
    }

    #[test]
    fn append_message_reaches_archived_conversations() {
        let (store, _) = store();
        let convo = store.create_conversation();
        store.archive_toggle(&convo.id).unwrap();
        store
            .append_message(&convo.id, HistoryEntry::model("late reply", Vec::new()))
            .unwrap();
        store.with_state(|s| {
            assert_eq!(s.archived(&convo.id).unwrap().history.len(), 1);
        });
    }

    #[test]
    fn task_title_is_required() {
        let (store, _) = store();
        assert!(matches!(
            store.create_task(NewTask::default()),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.create_task(NewTask {
                title: "   ".to_string(),
                ..NewTask::default()
            }),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn update_task_applies_a_partial_patch() {
        let (store, _) = store();
        let task = store
            .create_task(NewTask {
                title: "plan offsite".to_string(),
                due_date: Some(chrono::NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()),
                ..NewTask::default()
            })
            .unwrap();

        let updated = store
            .update_task(
                &task.id,
                TaskPatch {
                    status: Some(TaskStatus::InProgress),
                    due_date: Some(None),
                    ..TaskPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.title, "plan offsite");
        assert_eq!(updated.status, TaskStatus::InProgress);
        assert!(updated.due_date.is_none());

        assert!(matches!(
            store.update_task(
                &task.id,
                TaskPatch {
                    title: Some(String::new()),
                    ..TaskPatch::default()
                }
            ),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn toggle_subtask_flips_exactly_one_marker() {
        let (store, _) = store();
        let task = store
            .create_task(NewTask {
                title: "mixed".to_string(),
                notes: "- [ ] a\n- [x] b\nfree text\n- [ ] c".to_string(),
                ..NewTask::default()
            })
            .unwrap();

        let toggled = store.toggle_subtask(&task.id, 2).unwrap();
        assert_eq!(toggled.notes, "- [ ] a\n- [x] b\nfree text\n- [x] c");
        assert_eq!(checklist::counts(&toggled.notes), (2, 3));

        assert!(matches!(
            store.toggle_subtask(&task.id, 3),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn append_checklist_separates_with_a_blank_line() {
        let (store, _) = store();
        let bare = store
            .create_task(NewTask {
                title: "bare".to_string(),
                ..NewTask::default()
            })
            .unwrap();
        let appended = store
            .append_checklist(&bare.id, &["one".to_string()])
            .unwrap();
        assert_eq!(appended.notes, "- [ ] one");

        let noted = store
            .create_task(NewTask {
                title: "noted".to_string(),
                notes: "context".to_string(),
                ..NewTask::default()
            })
            .unwrap();
        let appended = store
            .append_checklist(&noted.id, &["one".to_string(), "two".to_string()])
            .unwrap();
        assert_eq!(appended.notes, "context\n\n- [ ] one\n- [ ] two");
    }

    #[test]
    fn search_scans_archives_only_when_enabled() {
        let (store, _) = store();
        let convo = store.create_conversation();
        store
            .append_message(&convo.id, HistoryEntry::user("the needle is here"))
            .unwrap();
        store.archive_toggle(&convo.id).unwrap();

        assert!(store.search_conversations("needle").is_empty());

        store.update_settings(Settings {
            search_archived: true,
            ..Settings::default()
        });
        let hits = store.search_conversations("needle");
        assert_eq!(hits.len(), 1);
        assert!(hits[0].archived);
        assert!(hits[0].snippet.contains("needle"));
    }

    #[test]
    fn every_mutation_is_written_through() {
        let (store, mem) = store();
        let convo = store.create_conversation();
        store
            .append_message(&convo.id, HistoryEntry::user("hi"))
            .unwrap();
        store.update_settings(Settings::default());
        assert_eq!(mem.save_count(), 3);
    }

    #[test]
    fn persisted_snapshot_is_loaded_on_startup() {
        let (store, mem) = store();
        store.create_conversation();
        let reloaded = DomainStore::new(Box::new(MemoryStore::with_initial(
            mem.last_saved().unwrap(),
        )));
        reloaded.with_state(|s| assert_eq!(s.conversations.len(), 1));
    }

    #[test]
    fn subscribers_are_notified_per_commit() {
        let (store, _) = store();
        let mut events = store.subscribe();
        store.create_conversation();
        store.update_settings(Settings::default());
        assert_eq!(events.try_recv().unwrap(), StateChange::Conversations);
        assert_eq!(events.try_recv().unwrap(), StateChange::Settings);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn snippet_is_windowed_around_the_match() {
        let text = format!("{}needle{}", "a".repeat(100), "b".repeat(100));
        let snippet = extract_snippet(&text, "needle");
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        assert!(snippet.contains("needle"));
    }
}
