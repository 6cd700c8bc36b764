use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Conversation Store Args ---
    /// Conversation store backend (fs, memory)
    #[arg(long, env = "STORAGE_TYPE", default_value = "fs")]
    pub storage_type: String,

    /// Directory for the conversation index and message blobs. Defaults to the
    /// platform-local data directory.
    #[arg(long, env = "MATHLENS_DATA_DIR")]
    pub data_dir: Option<String>,

    /// Capacity in bytes for a single conversation blob; oversized saves are
    /// refused without touching the index.
    #[arg(long, env = "STORAGE_MAX_BYTES", default_value = "5242880")]
    pub storage_max_bytes: usize,

    // --- Tutor LLM Args ---
    /// API key for the hosted Gemini API
    #[arg(long, env = "GEMINI_API_KEY", default_value = "")]
    pub gemini_api_key: String,

    /// Model name for tutor replies (e.g., gemini-2.5-flash)
    #[arg(long, env = "CHAT_MODEL")] // No default, adapter picks the flash model
    pub chat_model: Option<String>,

    /// Base URL for the Gemini API
    #[arg(long, env = "CHAT_BASE_URL")]
    pub chat_base_url: Option<String>,

    // --- Camera Args ---
    /// Image file acting as the camera source; `camera <path>` in the console
    /// switches sources at runtime.
    #[arg(long, env = "CAMERA_SOURCE")]
    pub camera_source: Option<String>,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}

#[cfg(test)]
impl Args {
    /// Baseline arguments for unit tests; fields under test are overridden
    /// with struct update syntax.
    pub fn for_tests() -> Self {
        Args::parse_from(["mathlens"])
    }
}
