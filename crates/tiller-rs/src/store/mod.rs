//! Process-wide keyed state shared by cooperating agents.
//!
//! A main research agent and its sub-agents all hold an
//! `Arc<`[`SharedStore`]`>`. Values are addressed by typed [`Key`]s, so a
//! key declared as `Key<Vec<Message>>` can only ever be read or written as a
//! message list.
//!
//! Every read-modify-write sequence must run under the key's lock:
//!
//! ```ignore
//! let mut guard = store.lock(&keys::resources()).await;
//! let mut resources = guard.get()?.unwrap_or_default();
//! // ... allocate ids, mutate ...
//! guard.set(&resources)?;
//! // lock released when `guard` drops, on every exit path
//! ```
//!
//! Lock-free [`SharedStore::get`] / [`SharedStore::set`] are fine for single
//! reads and blind writes of keys nobody else mutates.

pub mod citations;
pub mod resources;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;
use tracing::trace;

// ── Errors ─────────────────────────────────────────────────────────

/// Failure to move a typed value in or out of the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to encode value for key '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("value stored under key '{key}' has an unexpected shape: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

// ── Keys ───────────────────────────────────────────────────────────

/// A store key bound to the type of value it holds.
pub struct Key<T> {
    name: String,
    _value: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _value: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Key").field(&self.name).finish()
    }
}

/// Name and instance id of an agent, used to namespace its keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
pub struct AgentIdentity {
    pub name: String,
    pub id: String,
}

impl AgentIdentity {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

impl Default for AgentIdentity {
    fn default() -> Self {
        Self::new("agent", "0")
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.name, self.id)
    }
}

/// Well-known keys shared between agents.
pub mod keys {
    use super::{AgentIdentity, Key};
    use crate::Message;
    use crate::context::archive::CompressionRecord;
    use crate::store::resources::ResourceMap;
    use std::path::PathBuf;

    /// Search resources seen by any agent, keyed by URL.
    pub fn resources() -> Key<ResourceMap> {
        Key::new("resources")
    }

    /// Workspace directory for on-disk artifacts.
    pub fn workspace() -> Key<PathBuf> {
        Key::new("workspace")
    }

    /// Latest conversation snapshot of one agent.
    pub fn messages(agent: &AgentIdentity) -> Key<Vec<Message>> {
        Key::new(format!("{agent}_messages"))
    }

    /// Archived original of a compressed message.
    pub fn compressed_message(archive_id: &str) -> Key<CompressionRecord> {
        Key::new(archive_id)
    }
}

// ── Store ──────────────────────────────────────────────────────────

/// Shared key/value store with per-key async locks.
///
/// Values are held as JSON so heterogeneous types can live side by side;
/// [`Key<T>`] restores the static type at the boundary.
#[derive(Default)]
pub struct SharedStore {
    entries: Mutex<HashMap<String, Value>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedStore")
            .field("keys", &self.entries().len())
            .finish()
    }
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks().entry(name.to_string()).or_default())
    }

    /// Drop the lock entry for `name` once only the map and the releasing
    /// guard reference it. New acquirers clone under the same map mutex, so
    /// nobody can be waiting on an entry that gets removed.
    fn release_key_lock(&self, name: &str, held: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks();
        let idle = Arc::strong_count(held) == 2
            && locks.get(name).is_some_and(|l| Arc::ptr_eq(l, held));
        if idle {
            locks.remove(name);
        }
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks().len()
    }

    /// Acquire exclusive access to `key` until the returned guard drops.
    pub async fn lock<T>(&self, key: &Key<T>) -> KeyGuard<'_, T> {
        let permit = self.key_lock(key.name()).lock_owned().await;
        trace!("store lock acquired: {}", key.name());
        KeyGuard {
            store: self,
            key: key.clone(),
            permit,
        }
    }

    /// Read the current value of `key`, if any.
    pub fn get<T: DeserializeOwned>(&self, key: &Key<T>) -> Result<Option<T>, StoreError> {
        let raw = self.entries().get(key.name()).cloned();
        raw.map(|v| {
            serde_json::from_value(v).map_err(|source| StoreError::Decode {
                key: key.name().to_string(),
                source,
            })
        })
        .transpose()
    }

    /// Overwrite the value of `key`.
    pub fn set<T: Serialize>(&self, key: &Key<T>, value: &T) -> Result<(), StoreError> {
        let v = serde_json::to_value(value).map_err(|source| StoreError::Encode {
            key: key.name().to_string(),
            source,
        })?;
        self.entries().insert(key.name().to_string(), v);
        Ok(())
    }

    /// Whether any value is stored under `key`.
    pub fn contains<T>(&self, key: &Key<T>) -> bool {
        self.entries().contains_key(key.name())
    }

    /// Names of all keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Scoped exclusive access to one key. The lock is released on drop.
pub struct KeyGuard<'a, T> {
    store: &'a SharedStore,
    key: Key<T>,
    permit: OwnedMutexGuard<()>,
}

impl<T: Serialize + DeserializeOwned> KeyGuard<'_, T> {
    pub fn key(&self) -> &Key<T> {
        &self.key
    }

    pub fn get(&self) -> Result<Option<T>, StoreError> {
        self.store.get(&self.key)
    }

    pub fn set(&mut self, value: &T) -> Result<(), StoreError> {
        self.store.set(&self.key, value)
    }

    /// Read (or default), mutate, and write back in one step.
    pub fn update<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> Result<R, StoreError>
    where
        T: Default,
    {
        let mut value = self.get()?.unwrap_or_default();
        let out = f(&mut value);
        self.set(&value)?;
        Ok(out)
    }
}

impl<T> Drop for KeyGuard<'_, T> {
    fn drop(&mut self) {
        self.store.release_key_lock(self.key.name(), OwnedMutexGuard::mutex(&self.permit));
        trace!("store lock released: {}", self.key.name());
    }
}
