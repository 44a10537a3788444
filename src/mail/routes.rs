//! HTTP endpoints for sending and fetching email.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::smtp::{OutgoingEmail, SendOutcome, send_email, task_email};
use crate::server::AppState;

/// Limit used when the query has none, or an unusable one.
pub const DEFAULT_FETCH_LIMIT: u32 = 10;

pub fn email_routes() -> Router<AppState> {
    Router::new()
        .route("/api/email/send-task", post(send_task))
        .route("/api/email/send", post(send))
        .route("/api/email/imap", get(fetch_imap))
        .route("/api/email/pop3", get(fetch_pop3))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendTaskRequest {
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    email_to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    html: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    limit: Option<String>,
}

impl LimitQuery {
    /// Positive integer limit, else the default.
    pub fn limit(&self) -> u32 {
        self.limit
            .as_deref()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_FETCH_LIMIT)
    }
}

fn message(status: StatusCode, text: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "message": text })))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn send_response(outcome: SendOutcome) -> (StatusCode, Json<Value>) {
    if outcome.success {
        (
            StatusCode::OK,
            Json(json!({
                "message": "Email sent successfully",
                "messageId": outcome.message_id,
            })),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "message": "Failed to send email",
                "error": outcome.error,
            })),
        )
    }
}

async fn send_task(
    State(state): State<AppState>,
    Json(body): Json<SendTaskRequest>,
) -> impl IntoResponse {
    let (Some(task_id), Some(email_to)) = (non_empty(body.task_id), non_empty(body.email_to))
    else {
        return message(
            StatusCode::BAD_REQUEST,
            "Task ID and recipient email are required",
        );
    };

    let Ok(id) = Uuid::parse_str(&task_id) else {
        return message(StatusCode::NOT_FOUND, "Task not found");
    };
    let todo = match state.todos.get_todo(id).await {
        Ok(Some(todo)) => todo,
        Ok(None) => return message(StatusCode::NOT_FOUND, "Task not found"),
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": e.to_string() })),
            );
        }
    };

    let outcome = send_email(state.sender.as_ref(), task_email(email_to, &todo)).await;
    send_response(outcome)
}

async fn send(State(state): State<AppState>, Json(body): Json<SendRequest>) -> impl IntoResponse {
    let (Some(to), Some(subject)) = (non_empty(body.to), non_empty(body.subject)) else {
        return message(
            StatusCode::BAD_REQUEST,
            "Recipient email and subject are required",
        );
    };

    let email = OutgoingEmail {
        to,
        subject,
        text: body.text.unwrap_or_default(),
        html: non_empty(body.html),
    };
    send_response(send_email(state.sender.as_ref(), email).await)
}

async fn fetch_imap(State(state): State<AppState>, Query(query): Query<LimitQuery>) -> impl IntoResponse {
    Json(state.mail.fetch_imap(query.limit()).await)
}

async fn fetch_pop3(State(state): State<AppState>, Query(query): Query<LimitQuery>) -> impl IntoResponse {
    Json(state.mail.fetch_pop3(query.limit()).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(limit: Option<&str>) -> LimitQuery {
        LimitQuery {
            limit: limit.map(str::to_string),
        }
    }

    #[test]
    fn limit_defaults() {
        assert_eq!(query(None).limit(), 10);
        assert_eq!(query(Some("0")).limit(), 10);
        assert_eq!(query(Some("abc")).limit(), 10);
        assert_eq!(query(Some("-3")).limit(), 10);
        assert_eq!(query(Some("5")).limit(), 5);
        assert_eq!(query(Some("100")).limit(), 100);
    }
}
