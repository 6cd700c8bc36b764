pub mod camera;
pub mod cli;
pub mod console;
pub mod history;
pub mod models;
pub mod session;
pub mod tutor;

use cli::Args;
use console::Console;
use log::info;
use session::ChatSession;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Storage Type: {}", args.storage_type);
    info!("Storage Max Bytes: {}", args.storage_max_bytes);
    info!("Chat Model: {}", args.chat_model.as_deref().unwrap_or(tutor::DEFAULT_MODEL));
    info!("Camera Source: {}", args.camera_source.as_deref().unwrap_or("(unset)"));
    info!("-------------------------");

    let store = history::create_conversation_store(&args)?;
    let tutor_client = tutor::new_client(&args)?;
    let session = Arc::new(ChatSession::new(store, tutor_client));

    let mut console = Console::new(session);
    console.run(args.camera_source.clone()).await
}
