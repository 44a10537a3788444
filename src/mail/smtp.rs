//! Outbound email via SMTP (lettre).

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::{error, info};

use super::model::escape_html;
use crate::config::SmtpConfig;
use crate::error::MailError;
use crate::todos::model::Todo;

/// Display name on every outgoing `From` header.
const FROM_NAME: &str = "Todo App";

/// A message to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    /// Sent as an alternative part next to `text` when present.
    pub html: Option<String>,
}

/// Result of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Delivers outgoing mail. Returns the message id on success.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<String, MailError>;
}

/// Send and fold the result into a [`SendOutcome`].
pub async fn send_email(sender: &dyn MailSender, email: OutgoingEmail) -> SendOutcome {
    let to = email.to.clone();
    match sender.send(email).await {
        Ok(message_id) => {
            info!(to = %to, message_id = %message_id, "Email sent");
            SendOutcome {
                success: true,
                message_id: Some(message_id),
                error: None,
            }
        }
        Err(e) => {
            error!(to = %to, error = %e, "Email send failed");
            SendOutcome {
                success: false,
                message_id: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// The "share task" email for a todo.
pub fn task_email(to: impl Into<String>, todo: &Todo) -> OutgoingEmail {
    let description = if todo.description.trim().is_empty() {
        "No description"
    } else {
        todo.description.as_str()
    };
    let created = todo.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let status_text = if todo.completed { "Completed" } else { "Not completed" };
    let status_html = if todo.completed {
        "Completed ✅"
    } else {
        "Not completed ❌"
    };

    let text = format!(
        "Task: {}\nDescription: {description}\nStatus: {status_text}\nCreated: {created}\n",
        todo.title
    );
    let html = format!(
        "<h2>Task: {}</h2>\n\
         <p><strong>Description:</strong> {}</p>\n\
         <p><strong>Status:</strong> {status_html}</p>\n\
         <p><strong>Created:</strong> {created}</p>\n",
        escape_html(&todo.title),
        escape_html(description),
    );

    OutgoingEmail {
        to: to.into(),
        subject: format!("Task: {}", todo.title),
        text,
        html: Some(html),
    }
}

/// lettre-backed sender. The transport is blocking, so each send runs on
/// the blocking pool.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    config: Arc<SmtpConfig>,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<String, MailError> {
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || send_blocking(&config, email))
            .await
            .map_err(|e| MailError::Send(format!("send task failed: {e}")))?
    }
}

/// Build the lettre message. Returns it with its generated message id.
fn build_message(from: &str, email: &OutgoingEmail) -> Result<(Message, String), MailError> {
    let from_address: Address = from
        .parse()
        .map_err(|e| MailError::Send(format!("Invalid from address: {e}")))?;
    let to: Mailbox = email
        .to
        .parse()
        .map_err(|e| MailError::Send(format!("Invalid to address: {e}")))?;

    let message_id = format!("<{}@{}>", uuid::Uuid::new_v4(), from_address.domain());
    let builder = Message::builder()
        .from(Mailbox::new(Some(FROM_NAME.to_string()), from_address))
        .to(to)
        .subject(email.subject.clone())
        .message_id(Some(message_id.clone()));

    let message = match &email.html {
        Some(html) => builder.multipart(MultiPart::alternative_plain_html(
            email.text.clone(),
            html.clone(),
        )),
        None => builder.body(email.text.clone()),
    }
    .map_err(|e| MailError::Send(format!("Failed to build email: {e}")))?;

    Ok((message, message_id))
}

fn send_blocking(config: &SmtpConfig, email: OutgoingEmail) -> Result<String, MailError> {
    let credentials = config
        .credentials
        .as_ref()
        .ok_or_else(|| MailError::Send("EMAIL_USER and EMAIL_PASS are not set".into()))?;

    let (message, message_id) = build_message(&credentials.user, &email)?;

    let builder = if config.secure {
        SmtpTransport::relay(&config.host)
    } else {
        SmtpTransport::starttls_relay(&config.host)
    }
    .map_err(|e| MailError::Send(format!("SMTP relay error: {e}")))?;

    let transport = builder
        .port(config.port)
        .credentials(SmtpCredentials::new(
            credentials.user.clone(),
            credentials.password.expose_secret().to_string(),
        ))
        .build();

    transport
        .send(&message)
        .map_err(|e| MailError::Send(format!("SMTP send failed: {e}")))?;
    Ok(message_id)
}
