pub mod attachment;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod error;
pub mod history;
pub mod llm;
pub mod models;
pub mod server;

use cli::Args;
use conversation::TurnOrchestrator;
use history::{ create_kv_store, SessionLibrary, SessionStore };
use llm::ModelId;
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("HTTP Port: {}", args.http_port.map_or("disabled".to_string(), |p| p.to_string()));
    info!("History Store Type: {}", args.history_type);
    info!("History Store Host: {}", args.history_host);
    info!("History Store Path: {}", args.history_path);
    info!("History Key: {}", args.history_key);
    info!("Chat Base URL: {}", args.chat_base_url);
    info!("Default Model: {}", args.default_model);
    info!("Prompts Path: {}", args.prompts_path.as_deref().unwrap_or("(built-in)"));
    info!("-------------------------");

    let default_model: ModelId = args.default_model.parse()?;
    let prompts = config::prompt::load_prompts(args.prompts_path.as_deref())?;

    let store = SessionStore::new(create_kv_store(&args)?, args.history_key.clone());
    let library = Arc::new(SessionLibrary::open(store).await);
    let service = llm::chat::new_service(&args, &prompts.system_instruction)?;
    let orchestrator = Arc::new(TurnOrchestrator::new(service, library, prompts));

    info!("Starting server on: {}", args.server_addr);
    let server = Server::new(args.server_addr.clone(), args.http_port, orchestrator, default_model);
    server.run().await?;

    Ok(())
}
