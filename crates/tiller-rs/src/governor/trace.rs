//! Per-agent message trace in the shared store.
//!
//! After each post-turn the governor publishes the agent's conversation
//! under `<name>_<id>_messages`, so a parent agent can inspect what its
//! sub-agents did.

use crate::Message;
use crate::store::{AgentIdentity, SharedStore, StoreError, keys};
use tracing::trace;

/// Replace the stored trace for `agent` with `messages`.
pub async fn record(
    store: &SharedStore,
    agent: &AgentIdentity,
    messages: Vec<Message>,
) -> Result<(), StoreError> {
    let key = keys::messages(agent);
    let mut guard = store.lock(&key).await;
    trace!("Recording {} message(s) under {}", messages.len(), key.name());
    guard.set(&messages)
}

/// Read the stored trace for `agent`, if any.
pub fn load(
    store: &SharedStore,
    agent: &AgentIdentity,
) -> Result<Option<Vec<Message>>, StoreError> {
    store.get(&keys::messages(agent))
}
