use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::history::{
    derive_metadata,
    sort_newest_first,
    upsert_index_entry,
    ConversationStore,
    StorageError,
};
use crate::models::chat::{ ChatMessage, ConversationMetadata };

/// In-memory store for ephemeral runs and tests. Same index/blob semantics
/// as the filesystem backend, nothing survives the process.
#[derive(Default)]
pub struct InMemoryConversationStore {
    blobs: RwLock<HashMap<String, Vec<ChatMessage>>>,
    index: RwLock<Vec<ConversationMetadata>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn list_index(&self) -> Result<Vec<ConversationMetadata>, StorageError> {
        let mut index = self.index.read().await.clone();
        sort_newest_first(&mut index);
        Ok(index)
    }

    async fn load(&self, id: &str) -> Result<Vec<ChatMessage>, StorageError> {
        Ok(self.blobs.read().await.get(id).cloned().unwrap_or_default())
    }

    async fn save(&self, id: &str, messages: &[ChatMessage]) -> Result<(), StorageError> {
        if messages.is_empty() {
            return Ok(());
        }
        self.blobs.write().await.insert(id.to_string(), messages.to_vec());
        let mut index = self.index.write().await;
        upsert_index_entry(&mut index, derive_metadata(id, messages));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<Vec<ConversationMetadata>, StorageError> {
        self.blobs.write().await.remove(id);
        let mut index = self.index.write().await;
        index.retain(|m| m.id != id);
        let mut updated = index.clone();
        drop(index);
        sort_newest_first(&mut updated);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;

    fn message(id: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            role: Role::User,
            text: text.into(),
            image: None,
            is_loading: false,
        }
    }

    #[tokio::test]
    async fn roundtrip_and_single_index_entry() {
        let store = InMemoryConversationStore::new();
        let messages = vec![message("m1", "solve 2x = 4")];
        store.save("c1", &messages).await.unwrap();
        store.save("c1", &messages).await.unwrap();

        assert_eq!(store.load("c1").await.unwrap(), messages);
        let index = store.list_index().await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].title, "solve 2x = 4");
    }

    #[tokio::test]
    async fn delete_then_load_is_empty() {
        let store = InMemoryConversationStore::new();
        store.save("c1", &[message("m1", "hi")]).await.unwrap();
        let index = store.delete("c1").await.unwrap();
        assert!(index.is_empty());
        assert!(store.load("c1").await.unwrap().is_empty());
    }
}
