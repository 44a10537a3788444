//! REST surface: todos CRUD, email send and fetch endpoints.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use taskmail::config::{MailConfig, Pop3Strategy};
use taskmail::error::MailError;
use taskmail::mail::{MailSender, MailService, OutgoingEmail};
use taskmail::server::{AppState, router};
use taskmail::store::LibSqlTodoStore;

/// Records outgoing mail; fails every send when `fail` is set.
#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<OutgoingEmail>>,
    fail: bool,
}

#[async_trait]
impl MailSender for RecordingSender {
    async fn send(&self, email: OutgoingEmail) -> Result<String, MailError> {
        if self.fail {
            return Err(MailError::Send("535 Authentication rejected".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(email);
        Ok(format!("<test-{}@example.com>", sent.len()))
    }
}

struct TestApp {
    state: AppState,
    sender: Arc<RecordingSender>,
}

async fn app_with(sender: RecordingSender, strategy: Pop3Strategy) -> TestApp {
    let store = LibSqlTodoStore::new_memory().await.unwrap();
    // No credentials: live fetches answer with setup placeholders, never the network.
    let mut config = MailConfig::from_lookup(&|_: &str| -> Option<String> { None }).unwrap();
    config.pop3_strategy = strategy;
    config.mock_delay = Duration::ZERO;

    let sender = Arc::new(sender);
    let state = AppState::new(Arc::new(store), MailService::new(config), sender.clone());
    TestApp { state, sender }
}

async fn app() -> TestApp {
    app_with(RecordingSender::default(), Pop3Strategy::Live).await
}

impl TestApp {
    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = router(self.state.clone())
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(&self, body: Value) -> Value {
        let (status, todo) = self.call(Method::POST, "/api/todos", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        todo
    }
}

// ── Todos ───────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_ok() {
    let app = app().await;
    let (status, body) = app.call(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_and_fetch_todo() {
    let app = app().await;
    let todo = app
        .create(json!({ "title": "Buy milk", "description": "2 litres" }))
        .await;
    assert_eq!(todo["title"], "Buy milk");
    assert_eq!(todo["description"], "2 litres");
    assert_eq!(todo["completed"], false);
    assert!(todo["createdAt"].is_string());

    let id = todo["id"].as_str().unwrap();
    let (status, fetched) = app.call(Method::GET, &format!("/api/todos/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, todo);
}

#[tokio::test]
async fn blank_title_is_rejected() {
    let app = app().await;
    let (status, body) = app
        .call(Method::POST, "/api/todos", Some(json!({ "title": "   " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Title is required");

    let (status, _) = app
        .call(Method::POST, "/api/todos", Some(json!({ "description": "no title" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_is_newest_first() {
    let app = app().await;
    app.create(json!({ "title": "first" })).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    app.create(json!({ "title": "second" })).await;

    let (status, body) = app.call(Method::GET, "/api/todos", None).await;
    assert_eq!(status, StatusCode::OK);
    let titles: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["second", "first"]);
}

#[tokio::test]
async fn update_changes_only_given_fields() {
    let app = app().await;
    let todo = app
        .create(json!({ "title": "Write report", "description": "Q3" }))
        .await;
    let uri = format!("/api/todos/{}", todo["id"].as_str().unwrap());

    let (status, updated) = app
        .call(Method::PUT, &uri, Some(json!({ "completed": true })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["completed"], true);
    assert_eq!(updated["title"], "Write report");
    assert_eq!(updated["description"], "Q3");
    assert_eq!(updated["createdAt"], todo["createdAt"]);
}

#[tokio::test]
async fn delete_then_missing() {
    let app = app().await;
    let todo = app.create(json!({ "title": "Temporary" })).await;
    let uri = format!("/api/todos/{}", todo["id"].as_str().unwrap());

    let (status, body) = app.call(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Todo deleted");

    let (status, body) = app.call(Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Todo not found");

    let (status, _) = app.call(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_id_is_bad_request() {
    let app = app().await;
    let (status, body) = app.call(Method::GET, "/api/todos/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid todo ID");
}

#[tokio::test]
async fn mutations_are_broadcast() {
    let app = app().await;
    let mut events = app.state.events.subscribe();

    let todo = app.create(json!({ "title": "Broadcast me" })).await;
    let event = serde_json::to_value(events.recv().await.unwrap()).unwrap();
    assert_eq!(event["type"], "todo_created");
    assert_eq!(event["todo"]["id"], todo["id"]);

    let uri = format!("/api/todos/{}", todo["id"].as_str().unwrap());
    app.call(Method::DELETE, &uri, None).await;
    let event = serde_json::to_value(events.recv().await.unwrap()).unwrap();
    assert_eq!(event["type"], "todo_deleted");
    assert_eq!(event["id"], todo["id"]);
}

// ── Email send ──────────────────────────────────────────────────────

#[tokio::test]
async fn send_task_emails_the_todo() {
    let app = app().await;
    let todo = app
        .create(json!({ "title": "Review <PR>", "description": "" }))
        .await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/email/send-task",
            Some(json!({ "taskId": todo["id"], "emailTo": "friend@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Email sent successfully");
    assert_eq!(body["messageId"], "<test-1@example.com>");

    let sent = app.sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "friend@example.com");
    assert_eq!(sent[0].subject, "Task: Review <PR>");
    assert!(sent[0].text.contains("No description"));
    assert!(sent[0].html.as_deref().unwrap().contains("Review &lt;PR&gt;"));
}

#[tokio::test]
async fn send_task_requires_both_fields() {
    let app = app().await;
    let (status, body) = app
        .call(
            Method::POST,
            "/api/email/send-task",
            Some(json!({ "emailTo": "friend@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Task ID and recipient email are required");
}

#[tokio::test]
async fn send_task_unknown_task() {
    let app = app().await;
    for task_id in ["00000000-0000-4000-8000-000000000000", "42"] {
        let (status, body) = app
            .call(
                Method::POST,
                "/api/email/send-task",
                Some(json!({ "taskId": task_id, "emailTo": "friend@example.com" })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Task not found");
    }
    assert!(app.sender.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn send_failure_is_server_error() {
    let app = app_with(
        RecordingSender {
            fail: true,
            ..Default::default()
        },
        Pop3Strategy::Live,
    )
    .await;
    let (status, body) = app
        .call(
            Method::POST,
            "/api/email/send",
            Some(json!({ "to": "a@example.com", "subject": "Hello", "text": "hi" })),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Failed to send email");
    assert!(body["error"].as_str().unwrap().contains("535"));
}

#[tokio::test]
async fn send_requires_recipient_and_subject() {
    let app = app().await;
    let (status, body) = app
        .call(Method::POST, "/api/email/send", Some(json!({ "to": "a@example.com" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Recipient email and subject are required");
}

#[tokio::test]
async fn send_passes_custom_message_through() {
    let app = app().await;
    let (status, _) = app
        .call(
            Method::POST,
            "/api/email/send",
            Some(json!({
                "to": "a@example.com",
                "subject": "Hello",
                "text": "plain",
                "html": "<b>rich</b>",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let sent = app.sender.sent.lock().unwrap();
    assert_eq!(sent[0].subject, "Hello");
    assert_eq!(sent[0].html.as_deref(), Some("<b>rich</b>"));
}

// ── Email fetch ─────────────────────────────────────────────────────

#[tokio::test]
async fn imap_without_credentials_returns_setup_hint() {
    let app = app().await;
    let (status, body) = app.call(Method::GET, "/api/email/imap?limit=abc", None).await;
    assert_eq!(status, StatusCode::OK);
    let emails = body.as_array().unwrap();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0]["id"], "imap-missing-credentials");
    assert_eq!(emails[0]["subject"], "IMAP Error: Missing Credentials");
    assert_eq!(emails[0]["from"], "system@example.com");
}

#[tokio::test]
async fn pop3_without_credentials_returns_setup_hint() {
    let app = app().await;
    let (status, body) = app.call(Method::GET, "/api/email/pop3", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["subject"], "POP3 Error: Missing Credentials");
}

#[tokio::test]
async fn pop3_mock_strategy_returns_canned_messages() {
    let app = app_with(RecordingSender::default(), Pop3Strategy::Mock).await;
    let (status, body) = app.call(Method::GET, "/api/email/pop3?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let emails = body.as_array().unwrap();
    assert_eq!(emails.len(), 3);
    assert_eq!(emails[0]["id"], 1);
    assert_eq!(emails[0]["subject"], "Welcome to Todo App");
}
