//! Shared application state and the Axum router.

use std::sync::Arc;

use axum::{Json, Router, response::IntoResponse, routing::get};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use crate::mail::{MailSender, MailService};
use crate::store::TodoStore;
use crate::todos::TodoEvent;
use crate::todos::routes::todo_routes;
use crate::todos::ws::ws_routes;

/// Capacity of the todo event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub todos: Arc<dyn TodoStore>,
    /// Fan-out of todo mutations to WebSocket clients.
    pub events: broadcast::Sender<TodoEvent>,
    pub mail: MailService,
    pub sender: Arc<dyn MailSender>,
}

impl AppState {
    pub fn new(todos: Arc<dyn TodoStore>, mail: MailService, sender: Arc<dyn MailSender>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            todos,
            events,
            mail,
            sender,
        }
    }
}

/// Build the full router: todo REST, email REST, `/ws` and `/health`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(todo_routes())
        .merge(crate::mail::routes::email_routes())
        .merge(ws_routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "taskmail"
    }))
}
