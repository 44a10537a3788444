//! Normalized email record shared by the IMAP, POP3 and mock fetch paths.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Subject used when a message has none.
pub const NO_SUBJECT: &str = "No Subject";
/// Sender used when a message has no `From` header.
pub const UNKNOWN_SENDER: &str = "Unknown Sender";
/// Sender of every placeholder record.
pub const SYSTEM_SENDER: &str = "system@example.com";

/// Identifier of a record within one fetch response.
///
/// IMAP records carry `"msg-<seqno>"`, POP3 records the message number,
/// placeholders a stable per-failure string. Not stable across fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmailId {
    Number(u32),
    Text(String),
}

impl fmt::Display for EmailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmailId::Number(n) => write!(f, "{n}"),
            EmailId::Text(s) => f.write_str(s),
        }
    }
}

impl From<u32> for EmailId {
    fn from(n: u32) -> Self {
        EmailId::Number(n)
    }
}

impl From<&str> for EmailId {
    fn from(s: &str) -> Self {
        EmailId::Text(s.to_string())
    }
}

impl From<String> for EmailId {
    fn from(s: String) -> Self {
        EmailId::Text(s)
    }
}

/// The two shapes a sender arrives in: a plain string or a `{ "text": ... }` wrapper.
///
/// Collapsed to a single string by [`NormalizedEmail`] so consumers only ever
/// see one shape.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Sender {
    Plain(String),
    Wrapped { text: String },
}

impl Sender {
    pub fn into_text(self) -> String {
        match self {
            Sender::Plain(s) | Sender::Wrapped { text: s } => s,
        }
    }
}

fn deserialize_sender<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Sender::deserialize(deserializer).map(Sender::into_text)
}

/// A single email-shaped record returned by every fetch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEmail {
    pub id: EmailId,
    pub subject: String,
    #[serde(deserialize_with = "deserialize_sender")]
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub text: String,
    pub html: String,
}

impl NormalizedEmail {
    /// Build a record, filling the defaults for any missing field.
    ///
    /// `html` falls back to the escaped text wrapped in a paragraph.
    pub fn new(
        id: impl Into<EmailId>,
        subject: Option<String>,
        from: Option<String>,
        date: Option<DateTime<Utc>>,
        text: Option<String>,
        html: Option<String>,
    ) -> Self {
        let text = text.unwrap_or_default();
        let html = html
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| paragraph(&text));
        Self {
            id: id.into(),
            subject: subject
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| NO_SUBJECT.to_string()),
            from: from
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
            to: None,
            date: date.unwrap_or_else(Utc::now),
            text,
            html,
        }
    }

    /// Builder: set the `To` line.
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        let to = to.into();
        if !to.is_empty() {
            self.to = Some(to);
        }
        self
    }

    /// Whether this record is a synthetic placeholder rather than real mail.
    pub fn is_placeholder(&self) -> bool {
        self.from == SYSTEM_SENDER
    }
}

/// Wrap plain text in a `<p>` element, escaping markup.
pub fn paragraph(text: &str) -> String {
    if text.trim().is_empty() {
        return "<p>No content</p>".to_string();
    }
    format!("<p>{}</p>", escape_html(text))
}

/// Minimal HTML escaping for text placed inside generated markup.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
