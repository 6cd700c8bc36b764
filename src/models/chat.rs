use serde::{ Serialize, Deserialize };

/// Fixed text attached to every snapshot submission.
pub const CAPTURE_PROMPT: &str = "Can you help me solve this math problem?";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
    /// Base64 JPEG data URI captured from the viewfinder, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(rename = "isLoading", default)]
    pub is_loading: bool,
}

impl ChatMessage {
    pub fn user(id: String, text: impl Into<String>, image: Option<String>) -> Self {
        Self {
            id,
            role: Role::User,
            text: text.into(),
            image,
            is_loading: false,
        }
    }

    /// Model-side placeholder appended while a reply is pending. The reply is
    /// later installed in place, keyed by `id`.
    pub fn loading_placeholder(id: String) -> Self {
        Self {
            id,
            role: Role::Model,
            text: String::new(),
            image: None,
            is_loading: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub id: String,
    pub title: String,
    /// Last-save time, milliseconds since the epoch.
    pub timestamp: i64,
    pub preview: String,
}
