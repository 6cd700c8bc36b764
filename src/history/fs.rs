use async_trait::async_trait;
use log::{ error, warn };
use std::path::{ Path, PathBuf };
use tokio::fs;

use crate::cli::Args;
use crate::history::{
    derive_metadata,
    sort_newest_first,
    upsert_index_entry,
    ConversationStore,
    StorageError,
};
use crate::models::chat::{ ChatMessage, ConversationMetadata };

const INDEX_FILE: &str = "index.json";

/// Filesystem-backed store: one `index.json` plus one `data_<id>.json` blob
/// per conversation under the data directory.
pub struct FsConversationStore {
    data_dir: PathBuf,
    max_blob_bytes: usize,
}

impl FsConversationStore {
    pub fn new(args: &Args) -> Result<Self, StorageError> {
        let data_dir = match &args.data_dir {
            Some(dir) => PathBuf::from(dir),
            None =>
                dirs
                    ::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("mathlens"),
        };
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            max_blob_bytes: args.storage_max_bytes,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILE)
    }

    fn data_path(&self, id: &str) -> PathBuf {
        self.data_dir.join(format!("data_{}.json", id))
    }

    /// Index in on-disk (insertion) order. A missing or unreadable index is
    /// treated as empty rather than failing the caller.
    async fn read_index_raw(&self) -> Vec<ConversationMetadata> {
        let raw = match fs::read_to_string(self.index_path()).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Vec::new();
            }
            Err(e) => {
                error!("Failed to read conversation index: {}", e);
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(index) => index,
            Err(e) => {
                error!("Failed to parse conversation index: {}", e);
                Vec::new()
            }
        }
    }

    async fn write_index(&self, index: &[ConversationMetadata]) -> Result<(), StorageError> {
        let raw = serde_json::to_string(index)?;
        fs::write(self.index_path(), raw).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for FsConversationStore {
    async fn list_index(&self) -> Result<Vec<ConversationMetadata>, StorageError> {
        let mut index = self.read_index_raw().await;
        sort_newest_first(&mut index);
        Ok(index)
    }

    async fn load(&self, id: &str) -> Result<Vec<ChatMessage>, StorageError> {
        let raw = match fs::read_to_string(self.data_path(id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e.into());
            }
        };
        match serde_json::from_str(&raw) {
            Ok(messages) => Ok(messages),
            Err(e) => {
                error!("Failed to parse conversation {}: {}", id, e);
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, id: &str, messages: &[ChatMessage]) -> Result<(), StorageError> {
        if messages.is_empty() {
            return Ok(());
        }

        // Blob first; the index must never point at a write that was refused.
        let blob = serde_json::to_string(messages)?;
        if blob.len() > self.max_blob_bytes {
            warn!("Storage quota exceeded for conversation {}. History not saved.", id);
            return Err(StorageError::QuotaExceeded {
                bytes: blob.len(),
                limit: self.max_blob_bytes,
            });
        }
        fs::write(self.data_path(id), blob).await?;

        let mut index = self.read_index_raw().await;
        upsert_index_entry(&mut index, derive_metadata(id, messages));
        self.write_index(&index).await
    }

    async fn delete(&self, id: &str) -> Result<Vec<ConversationMetadata>, StorageError> {
        match fs::remove_file(self.data_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e.into());
            }
        }

        let mut index = self.read_index_raw().await;
        index.retain(|m| m.id != id);
        self.write_index(&index).await?;
        sort_newest_first(&mut index);
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::CAPTURE_PROMPT;

    fn test_args(dir: &Path, max_bytes: usize) -> Args {
        Args {
            data_dir: Some(dir.to_string_lossy().into_owned()),
            storage_max_bytes: max_bytes,
            ..Args::for_tests()
        }
    }

    fn temp_store(tag: &str, max_bytes: usize) -> FsConversationStore {
        let dir = std::env
            ::temp_dir()
            .join(format!("mathlens-test-{}-{}", tag, uuid::Uuid::new_v4().simple()));
        FsConversationStore::new(&test_args(&dir, max_bytes)).unwrap()
    }

    fn sample_messages() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("m1".into(), CAPTURE_PROMPT, Some("data:image/jpeg;base64,Zm9v".into())),
            ChatMessage {
                id: "m2".into(),
                role: crate::models::chat::Role::Model,
                text: "Step 1: factor the expression.".into(),
                image: None,
                is_loading: false,
            }
        ]
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let store = temp_store("roundtrip", 5 * 1024 * 1024);
        let messages = sample_messages();
        store.save("c1", &messages).await.unwrap();
        assert_eq!(store.load("c1").await.unwrap(), messages);
    }

    #[tokio::test]
    async fn load_of_unknown_id_is_empty() {
        let store = temp_store("unknown", 5 * 1024 * 1024);
        assert!(store.load("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_save_is_refused_and_leaves_no_trace() {
        let store = temp_store("empty", 5 * 1024 * 1024);
        store.save("c1", &[]).await.unwrap();
        assert!(store.list_index().await.unwrap().is_empty());
        assert!(store.load("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn index_has_one_entry_per_id_sorted_newest_first() {
        let store = temp_store("index", 5 * 1024 * 1024);
        store.save("old", &sample_messages()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.save("new", &sample_messages()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        // Re-saving must replace the entry, not duplicate it.
        store.save("old", &sample_messages()).await.unwrap();

        let index = store.list_index().await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index[0].id, "old");
        assert_eq!(index[1].id, "new");
        assert!(index[0].timestamp >= index[1].timestamp);
    }

    #[tokio::test]
    async fn delete_removes_blob_and_index_entry() {
        let store = temp_store("delete", 5 * 1024 * 1024);
        store.save("c1", &sample_messages()).await.unwrap();
        store.save("c2", &sample_messages()).await.unwrap();

        let remaining = store.delete("c1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "c2");
        assert!(store.load("c1").await.unwrap().is_empty());
        assert!(store.list_index().await.unwrap().iter().all(|m| m.id != "c1"));
    }

    #[tokio::test]
    async fn oversized_blob_aborts_without_touching_the_index() {
        let store = temp_store("quota", 64);
        let result = store.save("big", &sample_messages()).await;
        assert!(matches!(result, Err(StorageError::QuotaExceeded { .. })));
        assert!(store.list_index().await.unwrap().is_empty());
        assert!(store.load("big").await.unwrap().is_empty());
    }
}
