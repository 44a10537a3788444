//! MIME body parsing capability.
//!
//! POP3 retrieval hands each raw message to a [`MimeParser`]. The default
//! implementation uses `mail-parser`; tests swap in parsers that fail on
//! chosen messages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, PartType};

use super::header::{format_address, to_utc};
use crate::error::MailError;

/// Fields extracted from a full message. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub text: Option<String>,
    /// Present only when the message carries a real `text/html` part.
    pub html: Option<String>,
}

/// Parse raw RFC 5322 bytes into structured fields. May fail per message.
#[async_trait]
pub trait MimeParser: Send + Sync {
    async fn parse(&self, raw: &[u8]) -> Result<ParsedMessage, MailError>;
}

/// `mail-parser` backed implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct MailParserMime;

impl MailParserMime {
    /// Synchronous core, shared with the async trait method.
    pub fn parse_bytes(raw: &[u8]) -> Result<ParsedMessage, MailError> {
        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(MailError::Parse("empty message".into()));
        }

        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| MailError::Parse("not an RFC 5322 message".into()))?;

        let html = message
            .html_body
            .iter()
            .filter_map(|id| message.parts.get(*id as usize))
            .find_map(|part| match &part.body {
                PartType::Html(html) => Some(html.to_string()),
                _ => None,
            });

        let text = message
            .body_text(0)
            .map(|t| t.to_string())
            .filter(|t| !t.is_empty());

        Ok(ParsedMessage {
            subject: message.subject().map(str::to_string),
            from: message.from().map(format_address).filter(|s| !s.is_empty()),
            date: message.date().and_then(to_utc),
            text,
            html,
        })
    }
}

#[async_trait]
impl MimeParser for MailParserMime {
    async fn parse(&self, raw: &[u8]) -> Result<ParsedMessage, MailError> {
        Self::parse_bytes(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_plain_message() {
        let raw = b"From: Eve <eve@example.com>\r\nSubject: Status\r\nDate: Mon, 2 Mar 2026 08:00:00 +0000\r\nContent-Type: text/plain\r\n\r\nAll good.\r\n";
        let parsed = MailParserMime.parse(raw).await.unwrap();
        assert_eq!(parsed.subject.as_deref(), Some("Status"));
        assert_eq!(parsed.from.as_deref(), Some("Eve <eve@example.com>"));
        assert!(parsed.date.is_some());
        assert_eq!(parsed.text.as_deref().map(str::trim), Some("All good."));
        assert!(parsed.html.is_none());
    }

    #[tokio::test]
    async fn keeps_real_html_part() {
        let raw = concat!(
            "From: frank@example.com\r\n",
            "Subject: Alt\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/alternative; boundary=\"b1\"\r\n",
            "\r\n",
            "--b1\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "plain body\r\n",
            "--b1\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>html body</p>\r\n",
            "--b1--\r\n",
        );
        let parsed = MailParserMime.parse(raw.as_bytes()).await.unwrap();
        assert_eq!(parsed.text.as_deref().map(str::trim), Some("plain body"));
        assert!(parsed.html.unwrap().contains("<p>html body</p>"));
    }

    #[tokio::test]
    async fn empty_input_fails() {
        assert!(MailParserMime.parse(b"").await.is_err());
        assert!(MailParserMime.parse(b"\r\n\r\n").await.is_err());
    }
}
