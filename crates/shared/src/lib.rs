pub mod checklist;
pub mod error;
pub mod settings;
pub mod types;

pub use error::{PersistenceError, StoreError, StoreResult};
pub use settings::Settings;
pub use types::{
    AppState, Conversation, GroundingChunk, HistoryEntry, NewTask, Role, Task, TaskPatch,
    TaskPriority, TaskStatus, PLACEHOLDER_TITLE,
};
