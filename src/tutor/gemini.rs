use async_trait::async_trait;
use log::{ error, info, warn };
use reqwest::Client;
use serde::{ Deserialize, Serialize };

use crate::models::chat::{ ChatMessage, Role };
use super::{
    TutorClient,
    EMPTY_RESPONSE_FALLBACK,
    INVALID_INPUT_FALLBACK,
    NO_CONTENT_FALLBACK,
    SYSTEM_INSTRUCTION,
    TRANSPORT_FALLBACK,
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction")]
    system_instruction: SystemInstruction,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Content {
    pub role: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InlineData {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Base64 payload, data-URI prefix already stripped.
    pub data: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Converts the local transcript plus the new user turn into the wire
/// `contents` list. A message contributes a text part only when its text has
/// non-whitespace characters and an inline-data part only when it carries an
/// image; messages left with zero parts are dropped so every turn sent
/// upstream has at least one part.
pub fn format_contents(
    history: &[ChatMessage],
    new_text: &str,
    new_image: Option<&str>
) -> Vec<Content> {
    let new_message = ChatMessage::user(
        "outgoing".to_string(),
        new_text,
        new_image.map(str::to_string)
    );

    history
        .iter()
        .chain(std::iter::once(&new_message))
        .filter_map(|msg| {
            let mut parts = Vec::new();
            if !msg.text.trim().is_empty() {
                parts.push(Part::Text { text: msg.text.clone() });
            }
            if let Some(image) = &msg.image {
                if let Some(data) = strip_data_uri(image) {
                    parts.push(Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/jpeg".to_string(),
                            data,
                        },
                    });
                }
            }
            if parts.is_empty() {
                return None;
            }
            Some(Content {
                role: match msg.role {
                    Role::User => "user".to_string(),
                    Role::Model => "model".to_string(),
                },
                parts,
            })
        })
        .collect()
}

/// Drops any `data:image/jpeg;base64,` style prefix, splitting at the first
/// comma. Empty payloads yield `None`.
fn strip_data_uri(image: &str) -> Option<String> {
    let data = match image.split_once(',') {
        Some((_, rest)) => rest,
        None => image,
    };
    if data.is_empty() {
        None
    } else {
        Some(data.to_string())
    }
}

pub struct GeminiTutorClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiTutorClient {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: model.unwrap_or_else(|| super::DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn extract_text(response: GenerateContentResponse) -> Option<String> {
        response.candidates
            .first()?
            .content.as_ref()?
            .parts.iter()
            .find_map(|p| p.text.clone())
            .filter(|t| !t.is_empty())
    }
}

#[async_trait]
impl TutorClient for GeminiTutorClient {
    async fn send(
        &self,
        history: &[ChatMessage],
        new_text: &str,
        new_image: Option<&str>
    ) -> String {
        let contents = format_contents(history, new_text, new_image);
        if contents.is_empty() {
            warn!("No sendable content in outgoing exchange");
            return NO_CONTENT_FALLBACK.to_string();
        }

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        );
        let payload = GenerateContentRequest {
            contents,
            system_instruction: SystemInstruction {
                parts: vec![Part::Text { text: SYSTEM_INSTRUCTION.to_string() }],
            },
        };

        info!("TutorClient::send() → model={}", self.model);
        let response = match self.client.post(&url).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Tutor transport error: {}", e);
                return TRANSPORT_FALLBACK.to_string();
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Tutor API error ({}): {}", status, body);
            if status == reqwest::StatusCode::BAD_REQUEST || body.contains("INVALID_ARGUMENT") {
                return INVALID_INPUT_FALLBACK.to_string();
            }
            return TRANSPORT_FALLBACK.to_string();
        }

        let parsed: GenerateContentResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("Failed to decode tutor response: {}", e);
                return TRANSPORT_FALLBACK.to_string();
            }
        };

        Self::extract_text(parsed).unwrap_or_else(|| EMPTY_RESPONSE_FALLBACK.to_string())
    }
}
