//! User settings with forward-compatible defaults.
//!
//! Persisted snapshots from older builds may miss fields; `#[serde(default)]`
//! merges them over the canonical defaults on load.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How the agent addresses the user.
    pub nickname: String,
    /// Default system instructions inherited by new conversations.
    pub custom_instructions: String,
    pub agent_name: String,
    pub agent_avatar_url: String,
    /// Whether conversation search also scans the archived partition.
    pub search_archived: bool,
    pub is_sidebar_pinned: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            nickname: String::new(),
            custom_instructions: String::new(),
            agent_name: "Companion".to_string(),
            agent_avatar_url: String::new(),
            search_archived: false,
            is_sidebar_pinned: true,
        }
    }
}
