use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Session History Args ---
    /// Durable storage backend for chat sessions (file, redis, memory)
    #[arg(long, env = "HISTORY_TYPE", default_value = "file")]
    pub history_type: String,

    /// Redis endpoint used when HISTORY_TYPE=redis (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = "redis://127.0.0.1:6379")]
    pub history_host: String,

    /// JSON file used when HISTORY_TYPE=file.
    #[arg(long, env = "HISTORY_PATH", default_value = "data/sessions.json")]
    pub history_path: String,

    /// Key under which the whole session collection is stored.
    #[arg(long, env = "HISTORY_KEY", default_value = "cortex_sessions")]
    pub history_key: String,

    // --- Chat LLM Provider Args ---
    /// API Key for the Gemini API
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Base URL for the Gemini API, without the model path.
    #[arg(
        long,
        env = "CHAT_BASE_URL",
        default_value = "https://generativelanguage.googleapis.com/v1beta"
    )]
    pub chat_base_url: String,

    /// Model selected for new connections (flash, reasoning, research)
    #[arg(long, env = "DEFAULT_MODEL", default_value = "flash")]
    pub default_model: String,

    /// Optional JSON file overriding the system instruction, greeting and default attachment instruction.
    #[arg(long, env = "PROMPTS_PATH")]
    pub prompts_path: Option<String>,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Host address and port for the WebSocket server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Port for the read-only HTTP API (sessions, models). Disabled when not set.
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_select_file_history_and_flash() {
        let args = Args::try_parse_from(["cortex-chat"]).unwrap();
        assert_eq!(args.history_type, "file");
        assert_eq!(args.history_key, "cortex_sessions");
        assert_eq!(args.default_model, "flash");
        assert!(args.http_port.is_none());
    }
}
