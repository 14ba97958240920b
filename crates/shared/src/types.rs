//! Core domain types for the Companion app
//!
//! Conversations, tasks and the aggregate `AppState` snapshot that the
//! domain store owns and the persistence layer serializes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title given to a conversation before auto-titling has run.
pub const PLACEHOLDER_TITLE: &str = "New Chat";

/// Who authored a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A source citation attached to a model reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A single committed message in a conversation.
///
/// Immutable once appended; the in-progress model reply lives outside the
/// store until it is finalized or replaced by an error marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grounding_chunks: Vec<GroundingChunk>,
    /// Marks the synthetic entry appended when a stream fails mid-reply.
    #[serde(default)]
    pub is_error: bool,
}

impl HistoryEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            grounding_chunks: Vec::new(),
            is_error: false,
        }
    }

    pub fn model(text: impl Into<String>, grounding_chunks: Vec<GroundingChunk>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
            grounding_chunks,
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
            grounding_chunks: Vec::new(),
            is_error: true,
        }
    }
}

/// A saved conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub custom_instructions: String,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(custom_instructions: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: PLACEHOLDER_TITLE.to_string(),
            history: Vec::new(),
            custom_instructions,
            created_at: Utc::now(),
        }
    }

    /// Number of completed (non-error) model replies.
    pub fn completed_replies(&self) -> usize {
        self.history
            .iter()
            .filter(|e| e.role == Role::Model && !e.is_error)
            .count()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

/// A task item. `notes` may embed a checklist, see [`crate::checklist`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    /// Weak back-reference: the conversation may have been deleted since.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_message_text: Option<String>,
}

/// Fields accepted when creating a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub notes: String,
    pub priority: TaskPriority,
    pub due_date: Option<NaiveDate>,
    pub source_conversation_id: Option<String>,
    pub source_message_text: Option<String>,
}

/// Partial update for a task; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub notes: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    /// `Some(None)` clears the due date.
    pub due_date: Option<Option<NaiveDate>>,
}

/// The aggregate application snapshot.
///
/// Every field is serde-defaulted so a partially-shaped persisted snapshot
/// from an older version loads cleanly, with missing pieces defaulted.
/// Conversations are ordered newest-first; that order makes "select another
/// conversation after deleting the active one" deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppState {
    pub conversations: Vec<Conversation>,
    pub archived_conversations: Vec<Conversation>,
    pub active_conversation_id: Option<String>,
    pub tasks: Vec<Task>,
    pub settings: crate::settings::Settings,
}

impl AppState {
    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    pub fn archived(&self, id: &str) -> Option<&Conversation> {
        self.archived_conversations.iter().find(|c| c.id == id)
    }

    /// Look a conversation up in either partition. Used by late stream
    /// commits, which must land even if the user archived the conversation
    /// while the reply was in flight.
    pub fn conversation_anywhere_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        if self.conversations.iter().any(|c| c.id == id) {
            return self.conversation_mut(id);
        }
        self.archived_conversations.iter_mut().find(|c| c.id == id)
    }

    pub fn conversation_anywhere(&self, id: &str) -> Option<&Conversation> {
        self.conversation(id).or_else(|| self.archived(id))
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }
}
