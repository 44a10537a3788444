//! Envelope header parsing (From / To / Subject / Date).
//!
//! The IMAP path fetches only `HEADER.FIELDS (FROM TO SUBJECT DATE)`, so the
//! input is a bare header block. Encoded words and address lists are decoded
//! by `mail-parser`; anything missing or malformed comes back as `None`.

use chrono::{DateTime, Utc};
use mail_parser::{Address, MessageParser};

/// Decoded envelope fields. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// Parse a raw header block into an [`Envelope`].
pub fn parse_envelope(raw: &[u8]) -> Envelope {
    if raw.iter().all(|b| b.is_ascii_whitespace()) {
        return Envelope::default();
    }

    // A header block without its terminating blank line would be read as body.
    let mut block = raw.to_vec();
    if !block.ends_with(b"\r\n\r\n") && !block.ends_with(b"\n\n") {
        block.extend_from_slice(b"\r\n\r\n");
    }

    let Some(message) = MessageParser::default().parse(&block[..]) else {
        return Envelope::default();
    };

    Envelope {
        subject: message
            .subject()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        from: message.from().map(format_address).filter(|s| !s.is_empty()),
        to: message.to().map(format_address).filter(|s| !s.is_empty()),
        date: message.date().and_then(to_utc),
    }
}

/// Render an address header as `Name <addr>, other@example.com`.
pub fn format_address(address: &Address) -> String {
    address
        .iter()
        .map(|addr| match (addr.name(), addr.address()) {
            (Some(name), Some(email)) => format!("{name} <{email}>"),
            (Some(name), None) => name.to_string(),
            (None, email) => email.unwrap_or_default().to_string(),
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convert a `mail-parser` date to UTC. Out-of-range values yield `None`.
pub fn to_utc(date: &mail_parser::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(date.to_timestamp(), 0)
}
