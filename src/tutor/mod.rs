pub mod gemini;

use async_trait::async_trait;
use std::error::Error as StdError;
use std::sync::Arc;

use crate::cli::Args;
use crate::models::chat::ChatMessage;
use self::gemini::GeminiTutorClient;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

pub const SYSTEM_INSTRUCTION: &str = r#"
You are MathLens, a friendly, encouraging, and highly capable interactive AR math tutor.
Your goal is to help students understand math problems by looking at their handwritten or printed equations/diagrams.

Guidelines:
1. **Be Step-by-Step**: Break down every problem into clear, logical steps. Number your steps.
2. **Be Encouraging**: Use a supportive tone (e.g., "Great question!", "Let's tackle this together").
3. **Simple Language**: Explain complex concepts in simple terms suitable for a student.
4. **Format nicely**:
   - Use **LaTeX** for ALL math expressions.
   - Wrap inline math in single dollar signs (e.g., $x^2 + y^2 = z^2$).
   - Wrap block/standalone math in double dollar signs (e.g., $$ \int x dx $$).
   - Use standard Markdown for text formatting (bold, lists, etc.).
5. **Visuals**: If the user shows a diagram, refer to parts of it.

If the user sends an image, analyze it carefully. If it's a math problem, solve it. If it's not clear, ask them to try again or clarify.
"#;

/// Substituted replies; the tutor boundary never fails outward.
pub const NO_CONTENT_FALLBACK: &str =
    "I couldn't send that message. Please try adding some text or an image.";
pub const EMPTY_RESPONSE_FALLBACK: &str =
    "I analyzed the problem but couldn't generate a text explanation. Please try asking a specific question about it.";
pub const INVALID_INPUT_FALLBACK: &str =
    "I had trouble understanding that input. Please try retaking the photo or rephrasing your question.";
pub const TRANSPORT_FALLBACK: &str =
    "Sorry, I had trouble connecting to my brain. Please check your internet connection or try again.";

/// Sends one exchange to the hosted model: the transcript so far plus the new
/// user turn. Always resolves to reply text; failures come back as one of
/// the fixed fallback strings.
#[async_trait]
pub trait TutorClient: Send + Sync {
    async fn send(
        &self,
        history: &[ChatMessage],
        new_text: &str,
        new_image: Option<&str>
    ) -> String;
}

pub fn new_client(args: &Args) -> Result<Arc<dyn TutorClient>, Box<dyn StdError + Send + Sync>> {
    if args.gemini_api_key.is_empty() {
        return Err("Gemini API key is required (set GEMINI_API_KEY)".into());
    }
    let client = GeminiTutorClient::new(
        args.gemini_api_key.clone(),
        args.chat_model.clone(),
        args.chat_base_url.clone()
    );
    Ok(Arc::new(client))
}
