//! Companion core: the conversation-and-task state machine.
//!
//! The [`store::DomainStore`] is the single writer of truth; the
//! [`session::ChatController`] reconciles streamed model replies into it;
//! [`enrich`] runs the best-effort background workflows. Rendering is a
//! subscriber at the [`store::StateChange`] boundary, nothing more.

pub mod enrich;
pub mod persistence;
pub mod prompts;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;
