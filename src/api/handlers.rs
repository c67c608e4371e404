//! HTTP request handlers

use super::gateway::serve_connection;
use super::types::{ErrorResponse, VersionResponse};
use super::AppState;
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/chat/:chat_id", get(accept_connection))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Chat WebSocket
// ============================================================

async fn accept_connection(
    Path(chat_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    let chat_id = Uuid::parse_str(&chat_id)
        .map_err(|_| AppError::BadRequest(format!("Invalid chat id: {chat_id}")))?
        .to_string();

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::warn!(chat_id = %chat_id, error = %rejection, "WebSocket upgrade rejected");
            return Ok(rejection.into_response());
        }
    };

    let identity = state.identity.user_id(&headers).await;
    tracing::info!(chat_id = %chat_id, authenticated = identity.is_some(), "Accepting chat connection");

    let failed_chat_id = chat_id.clone();
    Ok(upgrade
        .on_failed_upgrade(move |e| {
            tracing::error!(chat_id = %failed_chat_id, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| serve_connection(socket, chat_id, identity, state)))
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
