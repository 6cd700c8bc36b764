use log::info;
use std::error::Error;
use std::sync::Arc;
use tokio::io::{ AsyncBufReadExt, AsyncWriteExt, BufReader };

use crate::camera::{ FileMediaDevices, Viewfinder };
use crate::models::chat::Role;
use crate::session::ChatSession;

const HELP: &str = "\
Commands:
  camera <path>   point the viewfinder at an image file
  retry           re-run camera negotiation from the top
  snap            capture the current frame and ask the tutor
  ask <text>      send a typed question
  new             start a new conversation
  list            list saved conversations
  open <id>       switch to a saved conversation
  delete <id>     delete a conversation
  help            show this help
  quit            exit";

/// Interactive stand-in for the overlay UI: drives the viewfinder and the
/// chat session from stdin.
pub struct Console {
    session: Arc<ChatSession>,
    viewfinder: Option<Viewfinder>,
}

impl Console {
    pub fn new(session: Arc<ChatSession>) -> Self {
        Self { session, viewfinder: None }
    }

    pub async fn run(
        &mut self,
        initial_source: Option<String>
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        println!("MathLens: point the camera at a math problem.");
        println!("{}", HELP);

        if let Some(source) = initial_source {
            self.switch_camera(&source).await;
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;

            let line = match lines.next_line().await? {
                Some(line) => line,
                None => break,
            };
            if !self.handle(line.trim()).await? {
                break;
            }
        }

        if let Some(viewfinder) = &mut self.viewfinder {
            viewfinder.stop();
        }
        Ok(())
    }

    async fn handle(&mut self, line: &str) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "" => {}
            "help" => println!("{}", HELP),
            "camera" if !rest.is_empty() => self.switch_camera(rest).await,
            "camera" => println!("Usage: camera <path>"),
            "retry" => self.retry_camera().await,
            "snap" => self.snap().await,
            "ask" if !rest.is_empty() => {
                self.session.submit_text(rest).await;
                self.print_reply().await;
            }
            "ask" => println!("Usage: ask <text>"),
            "new" => {
                let id = self.session.start_new().await;
                println!("Started conversation {}", id);
            }
            "list" => {
                match self.session.list_conversations().await {
                    Ok(index) if index.is_empty() => println!("No saved conversations."),
                    Ok(index) => {
                        for meta in index {
                            println!("{}  {}  ({})", meta.id, meta.title, meta.preview);
                        }
                    }
                    Err(e) => println!("Could not list conversations: {}", e),
                }
            }
            "open" if !rest.is_empty() => {
                match self.session.select_conversation(rest).await {
                    Ok(()) => self.print_transcript().await,
                    Err(e) => println!("Could not open conversation: {}", e),
                }
            }
            "delete" if !rest.is_empty() => {
                match self.session.delete_conversation(rest).await {
                    Ok(_) => println!("Deleted {}", rest),
                    Err(e) => println!("Could not delete conversation: {}", e),
                }
            }
            "quit" | "exit" => {
                return Ok(false);
            }
            other => println!("Unknown command '{}'. Try 'help'.", other),
        }
        Ok(true)
    }

    async fn switch_camera(&mut self, source: &str) {
        info!("Switching camera source to {}", source);
        let mut viewfinder = Viewfinder::new(Arc::new(FileMediaDevices::new(source)));
        match viewfinder.start().await {
            Ok(()) => {
                println!("Camera ready.");
                self.viewfinder = Some(viewfinder);
            }
            Err(e) => {
                println!("Camera issue: {} Use 'retry' to try again.", e);
                self.viewfinder = Some(viewfinder);
            }
        }
    }

    async fn retry_camera(&mut self) {
        match &mut self.viewfinder {
            Some(viewfinder) =>
                match viewfinder.start().await {
                    Ok(()) => println!("Camera ready."),
                    Err(e) => println!("Camera issue: {}", e),
                }
            None => println!("No camera source set. Use 'camera <path>' first."),
        }
    }

    async fn snap(&mut self) {
        let busy = self.session.is_processing().await;
        let capture = self.viewfinder.as_ref().and_then(|v| v.capture_jpeg(busy));
        match capture {
            Some(image) => {
                println!("Thinking...");
                self.session.submit_image(image).await;
                self.print_reply().await;
            }
            None if busy => println!("Still working on the last problem."),
            None => println!("Viewfinder is not ready. Use 'camera <path>' or 'retry'."),
        }
    }

    async fn print_reply(&self) {
        if let Some(reply) = self.session.messages().await.iter().rev().find(|m| m.role == Role::Model) {
            println!("{}", reply.text);
        }
    }

    async fn print_transcript(&self) {
        for message in self.session.messages().await {
            let speaker = match message.role {
                Role::User => "You",
                Role::Model => "MathLens",
            };
            let attachment = if message.image.is_some() { " [photo]" } else { "" };
            println!("{}{}: {}", speaker, attachment, message.text);
        }
    }
}
