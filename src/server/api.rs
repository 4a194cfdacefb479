use crate::history::SessionLibrary;
use crate::llm::{ ModelConfig, MODELS };
use crate::models::chat::{ ChatSession, SessionSummary };
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    routing::get,
    Router,
    Json,
    extract::{ State, Path },
    http::StatusCode,
};
use serde::Serialize;
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error };

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

#[derive(Clone)]
struct AppState {
    library: Arc<SessionLibrary>,
}

fn router(library: Arc<SessionLibrary>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/models", get(list_models_handler))
        .route("/api/sessions", get(list_sessions_handler))
        .route("/api/sessions/{id}", get(get_session_handler))
        .layer(cors)
        .with_state(AppState { library })
}

pub async fn start_http_server(
    http_port: u16,
    library: Arc<SessionLibrary>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", http_port).parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);

    let app = router(library);
    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    error!("HTTP server error: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
            }
        }
    });

    info!("HTTP server started");
    Ok(())
}

async fn list_models_handler() -> Json<&'static [ModelConfig]> {
    Json(&MODELS[..])
}

async fn list_sessions_handler(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.library.list().await)
}

async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>
) -> Result<Json<ChatSession>, (StatusCode, Json<ErrorResponse>)> {
    state.library
        .get(&id).await
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    success: false,
                    message: format!("Session '{}' not found", id),
                }),
            )
        })
}
