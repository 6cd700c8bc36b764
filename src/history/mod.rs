mod fs;
mod memory;

use async_trait::async_trait;
use chrono::Utc;
use log::info;
use std::sync::Arc;
use uuid::Uuid;

use crate::cli::Args;
use crate::models::chat::{ ChatMessage, ConversationMetadata, Role, CAPTURE_PROMPT };

pub use fs::FsConversationStore;
pub use memory::InMemoryConversationStore;

const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A message blob exceeded the configured capacity; the index was left
    /// untouched.
    #[error("conversation blob is {bytes} bytes, over the {limit} byte limit")]
    QuotaExceeded {
        bytes: usize,
        limit: usize,
    },
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable home for conversation transcripts, split into a lightweight index
/// and one message blob per conversation so listing never loads image
/// payloads.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// All known conversation metadata, newest first.
    async fn list_index(&self) -> Result<Vec<ConversationMetadata>, StorageError>;

    /// Messages for `id`; an unknown id yields an empty list.
    async fn load(&self, id: &str) -> Result<Vec<ChatMessage>, StorageError>;

    /// Persists `messages` under `id` and refreshes the index entry. Empty
    /// lists are never persisted.
    async fn save(&self, id: &str, messages: &[ChatMessage]) -> Result<(), StorageError>;

    /// Removes blob and index entry unconditionally; returns the updated
    /// index, newest first.
    async fn delete(&self, id: &str) -> Result<Vec<ConversationMetadata>, StorageError>;
}

pub fn create_conversation_store(
    args: &Args
) -> Result<Arc<dyn ConversationStore>, StorageError> {
    match args.storage_type.to_lowercase().as_str() {
        "fs" => {
            let store = FsConversationStore::new(args)?;
            info!("Conversation history stored in: {}", store.data_dir().display());
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(InMemoryConversationStore::new())),
        other =>
            Err(
                StorageError::Io(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported storage type: {}", other)
                    )
                )
            ),
    }
}

/// Opaque conversation id: millisecond timestamp in base 36 plus a random
/// suffix, unique with overwhelming probability.
pub fn new_conversation_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u128;
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}", to_base36(millis), &suffix[..10])
}

fn to_base36(mut n: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Regenerates the index entry for a conversation from its messages. Title
/// and preview come from the first user message; a snapshot-only opener gets
/// the fixed labels.
pub fn derive_metadata(id: &str, messages: &[ChatMessage]) -> ConversationMetadata {
    let mut title = "New Calculation".to_string();
    let mut preview = "No messages yet".to_string();

    if let Some(first_user) = messages.iter().find(|m| m.role == Role::User) {
        if !first_user.text.is_empty() && first_user.text != CAPTURE_PROMPT {
            title = truncate_title(&first_user.text);
        } else if first_user.image.is_some() {
            title = "Math Problem Snapshot".to_string();
        }
        preview = if first_user.text.is_empty() {
            "Image".to_string()
        } else {
            first_user.text.clone()
        };
    }

    ConversationMetadata {
        id: id.to_string(),
        title,
        timestamp: Utc::now().timestamp_millis(),
        preview,
    }
}

fn truncate_title(text: &str) -> String {
    let truncated: String = text.chars().take(TITLE_MAX_CHARS).collect();
    if text.chars().count() > TITLE_MAX_CHARS {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// Upserts `entry` into an insertion-ordered index: an existing entry with
/// the same id is replaced in place, otherwise the entry is prepended.
pub(crate) fn upsert_index_entry(
    index: &mut Vec<ConversationMetadata>,
    entry: ConversationMetadata
) {
    match index.iter().position(|m| m.id == entry.id) {
        Some(pos) => index[pos] = entry,
        None => index.insert(0, entry),
    }
}

pub(crate) fn sort_newest_first(index: &mut [ConversationMetadata]) {
    index.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}
