//! Durable archive of messages replaced by the budget guard.
//!
//! Each compressed message gets one immutable [`CompressionRecord`] in the
//! shared store, and optionally a JSON file under
//! `<dir>/compressed_messages/`. The placeholder left in the conversation
//! points at the record via its [`ArchiveRef`].

use crate::store::{AgentIdentity, SharedStore, StoreError, keys};
use crate::{ArchiveRef, Message};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Subdirectory created under the archive root.
pub const ARCHIVE_SUBDIR: &str = "compressed_messages";

/// Prefix of every archive id.
pub const ARCHIVE_ID_PREFIX: &str = "compressed_message";

/// The original of a compressed message. Written once, never mutated.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CompressionRecord {
    pub archive_id: String,
    pub agent: AgentIdentity,
    pub original: Message,
    pub original_tokens: usize,
    /// Index of the message in the conversation when it was compressed.
    pub source_index: usize,
    pub archived_at: DateTime<Utc>,
}

/// Why a message could not be archived.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to write archive file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode archive record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Writes [`CompressionRecord`]s for one agent.
#[derive(Debug, Clone)]
pub struct MessageArchive {
    store: Arc<SharedStore>,
    agent: AgentIdentity,
    dir: Option<PathBuf>,
}

impl MessageArchive {
    /// `dir` is the archive root; when `None` the store's workspace key is
    /// consulted at archive time, and if that is unset too, records live only
    /// in the store.
    pub fn new(store: Arc<SharedStore>, agent: AgentIdentity, dir: Option<PathBuf>) -> Self {
        Self { store, agent, dir }
    }

    pub fn store(&self) -> &Arc<SharedStore> {
        &self.store
    }

    fn new_archive_id(&self) -> String {
        format!(
            "{ARCHIVE_ID_PREFIX}_{}_{}_{}",
            self.agent.name,
            self.agent.id,
            uuid::Uuid::new_v4()
        )
    }

    fn archive_root(&self) -> Result<Option<PathBuf>, StoreError> {
        match &self.dir {
            Some(dir) => Ok(Some(dir.clone())),
            None => self.store.get(&keys::workspace()),
        }
    }

    /// Archive `original` and return a reference to it.
    pub async fn archive(
        &self,
        original: &Message,
        original_tokens: usize,
        source_index: usize,
    ) -> Result<ArchiveRef, ArchiveError> {
        let archive_id = self.new_archive_id();
        let record = CompressionRecord {
            archive_id: archive_id.clone(),
            agent: self.agent.clone(),
            original: original.clone(),
            original_tokens,
            source_index,
            archived_at: Utc::now(),
        };

        let locator = match self.archive_root()? {
            Some(root) => {
                let dir = root.join(ARCHIVE_SUBDIR);
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|source| ArchiveError::Io {
                        path: dir.clone(),
                        source,
                    })?;
                let path = dir.join(format!("{archive_id}.json"));
                let json = serde_json::to_string_pretty(&record)?;
                tokio::fs::write(&path, json)
                    .await
                    .map_err(|source| ArchiveError::Io {
                        path: path.clone(),
                        source,
                    })?;
                debug!("Saved original message to {}", path.display());
                path.display().to_string()
            }
            None => format!("store:{archive_id}"),
        };

        // Fresh id: nobody else writes this key.
        self.store.set(&keys::compressed_message(&archive_id), &record)?;

        info!(
            "Archived message {source_index} ({original_tokens} tokens) as {archive_id}"
        );
        Ok(ArchiveRef {
            id: archive_id,
            locator,
        })
    }
}

/// Fetch the archived original behind `archive`.
pub fn lookup(
    store: &SharedStore,
    archive: &ArchiveRef,
) -> Result<Option<CompressionRecord>, StoreError> {
    store.get(&keys::compressed_message(&archive.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive_without_dir() -> MessageArchive {
        MessageArchive::new(
            Arc::new(SharedStore::new()),
            AgentIdentity::new("researcher", "a1"),
            None,
        )
    }

    #[tokio::test]
    async fn store_only_archive_round_trips() {
        let archive = archive_without_dir();
        let original = Message::tool_result("c1", "full search output");
        let reference = archive.archive(&original, 123, 4).await.unwrap();

        assert!(reference.id.starts_with("compressed_message_researcher_a1_"));
        assert_eq!(reference.locator, format!("store:{}", reference.id));

        let record = lookup(archive.store(), &reference).unwrap().unwrap();
        assert_eq!(record.original, original);
        assert_eq!(record.original_tokens, 123);
        assert_eq!(record.source_index, 4);
    }

    #[tokio::test]
    async fn archive_ids_are_unique() {
        let archive = archive_without_dir();
        let msg = Message::user("x");
        let a = archive.archive(&msg, 1, 1).await.unwrap();
        let b = archive.archive(&msg, 1, 1).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn writes_json_file_under_archive_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = MessageArchive::new(
            Arc::new(SharedStore::new()),
            AgentIdentity::new("researcher", "a1"),
            Some(tmp.path().to_path_buf()),
        );
        let reference = archive
            .archive(&Message::user("keep me"), 10, 2)
            .await
            .unwrap();

        let path = PathBuf::from(&reference.locator);
        assert!(path.starts_with(tmp.path().join(ARCHIVE_SUBDIR)));
        let on_disk: CompressionRecord =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(on_disk.original.text(), "keep me");
    }

    #[tokio::test]
    async fn falls_back_to_workspace_key() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = archive_without_dir();
        archive
            .store()
            .set(&keys::workspace(), &tmp.path().to_path_buf())
            .unwrap();
        let reference = archive.archive(&Message::user("x"), 1, 1).await.unwrap();
        assert!(reference.locator.ends_with(".json"));
    }

    #[tokio::test]
    async fn unwritable_dir_is_an_io_error_and_stores_nothing() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let archive = MessageArchive::new(
            Arc::new(SharedStore::new()),
            AgentIdentity::default(),
            Some(tmp.path().to_path_buf()),
        );
        let err = archive.archive(&Message::user("x"), 1, 1).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
        assert!(archive.store().keys_with_prefix(ARCHIVE_ID_PREFIX).is_empty());
    }
}
