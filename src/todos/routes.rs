//! REST endpoints for todos. Every mutation is broadcast to WebSocket clients.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde_json::{Value, json};
use tracing::{error, info};
use uuid::Uuid;

use super::model::{NewTodo, TodoEvent, TodoUpdate};
use crate::error::DatabaseError;
use crate::server::AppState;

pub fn todo_routes() -> Router<AppState> {
    Router::new()
        .route("/api/todos", get(list_todos).post(create_todo))
        .route(
            "/api/todos/{id}",
            get(get_todo).put(update_todo).delete(delete_todo),
        )
}

fn message(status: StatusCode, text: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "message": text.into() })))
}

fn parse_id(id: &str) -> Result<Uuid, (StatusCode, Json<Value>)> {
    Uuid::parse_str(id).map_err(|_| message(StatusCode::BAD_REQUEST, "Invalid todo ID"))
}

fn not_found() -> (StatusCode, Json<Value>) {
    message(StatusCode::NOT_FOUND, "Todo not found")
}

fn server_error(e: DatabaseError) -> (StatusCode, Json<Value>) {
    error!(error = %e, "Todo store error");
    message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

async fn list_todos(State(state): State<AppState>) -> impl IntoResponse {
    match state.todos.list_todos().await {
        Ok(todos) => (StatusCode::OK, Json(json!(todos))),
        Err(e) => server_error(e),
    }
}

async fn get_todo(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.todos.get_todo(id).await {
        Ok(Some(todo)) => (StatusCode::OK, Json(json!(todo))),
        Ok(None) => not_found(),
        Err(e) => server_error(e),
    }
}

async fn create_todo(State(state): State<AppState>, Json(body): Json<NewTodo>) -> impl IntoResponse {
    let Some(todo) = body.into_todo() else {
        return message(StatusCode::BAD_REQUEST, "Title is required");
    };
    match state.todos.create_todo(&todo).await {
        Ok(()) => {
            info!(id = %todo.id, title = %todo.title, "Todo created");
            let _ = state.events.send(TodoEvent::TodoCreated { todo: todo.clone() });
            (StatusCode::CREATED, Json(json!(todo)))
        }
        Err(e) => server_error(e),
    }
}

async fn update_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TodoUpdate>,
) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let mut todo = match state.todos.get_todo(id).await {
        Ok(Some(todo)) => todo,
        Ok(None) => return not_found(),
        Err(e) => return server_error(e),
    };

    body.apply(&mut todo);
    match state.todos.update_todo(&todo).await {
        Ok(()) => {
            info!(id = %id, "Todo updated");
            let _ = state.events.send(TodoEvent::TodoUpdated { todo: todo.clone() });
            (StatusCode::OK, Json(json!(todo)))
        }
        Err(DatabaseError::NotFound { .. }) => not_found(),
        Err(e) => server_error(e),
    }
}

async fn delete_todo(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.todos.delete_todo(id).await {
        Ok(true) => {
            info!(id = %id, "Todo deleted");
            let _ = state.events.send(TodoEvent::TodoDeleted { id });
            message(StatusCode::OK, "Todo deleted")
        }
        Ok(false) => not_found(),
        Err(e) => server_error(e),
    }
}
