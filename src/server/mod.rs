pub mod api;
pub mod websocket;

use crate::conversation::TurnOrchestrator;
use crate::llm::ModelId;
use std::error::Error;
use std::sync::Arc;

pub struct Server {
    addr: String,
    http_port: Option<u16>,
    orchestrator: Arc<TurnOrchestrator>,
    default_model: ModelId,
}

impl Server {
    pub fn new(
        addr: String,
        http_port: Option<u16>,
        orchestrator: Arc<TurnOrchestrator>,
        default_model: ModelId
    ) -> Self {
        Self {
            addr,
            http_port,
            orchestrator,
            default_model,
        }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(http_port) = self.http_port {
            api::start_http_server(http_port, self.orchestrator.library().clone()).await?;
        }

        websocket::start_ws_server(&self.addr, self.orchestrator.clone(), self.default_model).await
    }
}
