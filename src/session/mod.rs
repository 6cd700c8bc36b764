use chrono::Utc;
use log::{ error, info, warn };
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::history::{ new_conversation_id, ConversationStore, StorageError };
use crate::models::chat::{ ChatMessage, ConversationMetadata, CAPTURE_PROMPT };
use crate::tutor::TutorClient;

/// Owns the active conversation and drives the request/reply cycle:
/// append user message → append loading placeholder → install the reply in
/// place. Every mutation of the message list is saved under the active id.
///
/// Only one exchange may be in flight at a time; submissions while busy are
/// silent no-ops. Switching or deleting the conversation bumps an epoch, and
/// a reply resolving against a stale epoch is discarded rather than written
/// into a conversation the user has moved away from.
pub struct ChatSession {
    store: Arc<dyn ConversationStore>,
    tutor: Arc<dyn TutorClient>,
    state: Mutex<SessionState>,
}

/// Lifecycle of the at-most-one in-flight exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ExchangePhase {
    Idle,
    InFlight {
        placeholder_id: String,
        epoch: u64,
    },
}

struct SessionState {
    conversation_id: String,
    messages: Vec<ChatMessage>,
    phase: ExchangePhase,
    epoch: u64,
    message_seq: u64,
}

impl SessionState {
    fn next_message_id(&mut self) -> String {
        self.message_seq += 1;
        format!("{}-{}", Utc::now().timestamp_millis(), self.message_seq)
    }
}

impl ChatSession {
    pub fn new(store: Arc<dyn ConversationStore>, tutor: Arc<dyn TutorClient>) -> Self {
        Self {
            store,
            tutor,
            state: Mutex::new(SessionState {
                conversation_id: new_conversation_id(),
                messages: Vec::new(),
                phase: ExchangePhase::Idle,
                epoch: 0,
                message_seq: 0,
            }),
        }
    }

    pub async fn conversation_id(&self) -> String {
        self.state.lock().await.conversation_id.clone()
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.state.lock().await.messages.clone()
    }

    pub async fn is_processing(&self) -> bool {
        self.state.lock().await.phase != ExchangePhase::Idle
    }

    /// Submits a captured still with the fixed snapshot prompt.
    pub async fn submit_image(&self, image: String) {
        self.submit(CAPTURE_PROMPT.to_string(), Some(image)).await;
    }

    /// Submits a typed follow-up. Whitespace-only input is a no-op.
    pub async fn submit_text(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.submit(text.to_string(), None).await;
    }

    async fn submit(&self, text: String, image: Option<String>) {
        let history = {
            let mut state = self.state.lock().await;
            if state.phase != ExchangePhase::Idle {
                return;
            }

            // The tutor receives the transcript as it stood before this
            // exchange.
            let history = state.messages.clone();

            let user_id = state.next_message_id();
            state.messages.push(ChatMessage::user(user_id, text.clone(), image.clone()));
            let placeholder_id = state.next_message_id();
            state.messages.push(ChatMessage::loading_placeholder(placeholder_id.clone()));
            state.phase = ExchangePhase::InFlight {
                placeholder_id,
                epoch: state.epoch,
            };
            self.persist(&state).await;

            history
        };

        let reply = self.tutor.send(&history, &text, image.as_deref()).await;

        let mut state = self.state.lock().await;
        let (placeholder_id, epoch) = match std::mem::replace(
            &mut state.phase,
            ExchangePhase::Idle
        ) {
            ExchangePhase::InFlight { placeholder_id, epoch } => (placeholder_id, epoch),
            // Unreachable: only the in-flight exchange clears its own phase.
            ExchangePhase::Idle => {
                return;
            }
        };
        if state.epoch != epoch {
            warn!("Discarding reply that resolved after the conversation changed");
            return;
        }
        if let Some(placeholder) = state.messages.iter_mut().find(|m| m.id == placeholder_id) {
            placeholder.text = reply;
            placeholder.is_loading = false;
        }
        self.persist(&state).await;
    }

    /// Allocates a fresh conversation id and clears the transcript. Any
    /// in-flight exchange keeps running but its reply will be discarded.
    pub async fn start_new(&self) -> String {
        let mut state = self.state.lock().await;
        state.epoch += 1;
        state.conversation_id = new_conversation_id();
        state.messages.clear();
        info!("Started conversation {}", state.conversation_id);
        state.conversation_id.clone()
    }

    /// Replaces the active id and transcript wholesale with the persisted
    /// conversation (an unknown id yields an empty transcript).
    pub async fn select_conversation(&self, id: &str) -> Result<(), StorageError> {
        let messages = self.store.load(id).await?;
        let mut state = self.state.lock().await;
        state.epoch += 1;
        state.conversation_id = id.to_string();
        state.messages = messages;
        Ok(())
    }

    /// Removes the conversation from storage; deleting the active one
    /// immediately starts a fresh conversation.
    pub async fn delete_conversation(
        &self,
        id: &str
    ) -> Result<Vec<ConversationMetadata>, StorageError> {
        let index = self.store.delete(id).await?;
        let mut state = self.state.lock().await;
        if state.conversation_id == id {
            state.epoch += 1;
            state.conversation_id = new_conversation_id();
            state.messages.clear();
            info!("Deleted active conversation, started {}", state.conversation_id);
        }
        Ok(index)
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationMetadata>, StorageError> {
        self.store.list_index().await
    }

    /// Saves the transcript under the active id. The empty initial state is
    /// never persisted. Storage failures (quota) are surfaced in the log and
    /// otherwise dropped; the in-memory transcript stays authoritative.
    async fn persist(&self, state: &SessionState) {
        if state.messages.is_empty() {
            return;
        }
        if let Err(e) = self.store.save(&state.conversation_id, &state.messages).await {
            error!("Failed to save conversation {}: {}", state.conversation_id, e);
        }
    }
}
