//! Snapshot persistence for application state.
//!
//! The whole `AppState` is written as pretty-printed JSON on every committed
//! mutation (write-through). Loading is tolerant: a missing, corrupt or
//! partially-shaped file never prevents startup.

use directories::ProjectDirs;
use shared::{AppState, PersistenceError};
use std::fs;
use std::path::PathBuf;

/// Seam between the domain store and durable storage.
pub trait StatePersister: Send + Sync {
    /// `None` when no usable snapshot exists. Partial snapshots are merged
    /// with defaults by the serde layer, not rejected.
    fn load(&self) -> Option<AppState>;
    fn save(&self, state: &AppState) -> Result<(), PersistenceError>;
}

/// File-backed persister storing a single `state.json`.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default location under the platform config directory.
    pub fn at_default_location() -> Self {
        let path = ProjectDirs::from("com.local", "Companion", "Companion")
            .map(|p| p.config_dir().join("state.json"))
            .unwrap_or_else(|| PathBuf::from("./state.json"));
        Self { path }
    }
}

impl StatePersister for FileStore {
    fn load(&self) -> Option<AppState> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "discarding unreadable state snapshot");
                None
            }
        }
    }

    fn save(&self, state: &AppState) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Conversation;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state.json"));
        assert!(store.load().is_none());
    }

    #[test]
    fn garbage_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        assert!(FileStore::new(path).load().is_none());
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested").join("state.json"));

        let mut state = AppState::default();
        state.conversations.push(Conversation::new(String::new()));
        state.active_conversation_id = Some(state.conversations[0].id.clone());

        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);
    }

    #[test]
    fn partial_snapshot_is_merged_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"settings": {"nickname": "Sam"}}"#).unwrap();

        let state = FileStore::new(path).load().unwrap();
        assert_eq!(state.settings.nickname, "Sam");
        assert_eq!(state.settings.agent_name, "Companion");
        assert!(state.conversations.is_empty());
    }
}
