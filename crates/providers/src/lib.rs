//! Hosted-model backends.
//!
//! The narrow contract the rest of the app depends on: stream a reply as
//! text deltas with optional grounding metadata, or return a single JSON
//! value conforming to a declared schema. [`gemini::GeminiClient`] is the
//! production implementation; tests substitute their own.

pub mod gemini;
pub mod sse;

use async_trait::async_trait;
use shared::{GroundingChunk, HistoryEntry};
use thiserror::Error;
use tokio::sync::mpsc;

/// Independently toggleable capabilities for a request. Session-scoped UI
/// state, not persisted per-message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolConfig {
    pub web_search: bool,
}

/// One streamed reply request. `history` is the full conversation replay,
/// ending with the user message being answered.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub history: Vec<HistoryEntry>,
    pub system_instruction: Option<String>,
    pub tools: ToolConfig,
}

/// An increment of a streamed reply.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    /// The cumulative citation set so far. The backend resends the whole
    /// set each time, so later events replace earlier ones.
    Grounding(Vec<GroundingChunk>),
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend session could not be established (missing credentials,
    /// misconfiguration). Reported to the user, never retried automatically.
    #[error("backend session could not be established: {0}")]
    SessionInit(String),
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Mid-stream failure; whatever partial reply existed is discarded.
    #[error("reply stream failed: {0}")]
    Stream(String),
    /// Structured output did not match the declared schema.
    #[error("structured output could not be decoded: {0}")]
    StructuredDecode(String),
}

/// The model backend seam.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Open a streamed reply. Events arrive on the returned channel; an
    /// `Err` item terminates the stream.
    async fn open_stream(
        &self,
        request: GenerateRequest,
    ) -> Result<mpsc::Receiver<Result<StreamEvent, BackendError>>, BackendError>;

    /// One-shot plain-text generation (used by enrichment prompts).
    async fn generate_text(&self, prompt: &str) -> Result<String, BackendError>;

    /// One-shot generation constrained to a JSON schema.
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: serde_json::Value,
    ) -> Result<serde_json::Value, BackendError>;
}
