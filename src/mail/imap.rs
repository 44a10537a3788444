//! IMAP retrieval: a minimal async client and the fetch state machine.
//!
//! `Idle → Connecting → Authenticated → MailboxOpen → Fetching → Done | Failed`.
//! Each step is one awaited exchange; every failure maps to a
//! [`FetchFailure`] and the session is logged out exactly once.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

use super::MAX_BATCH;
use super::header::parse_envelope;
use super::model::NormalizedEmail;
use super::net::{self, MailStream};
use super::placeholder::{FetchFailure, FetchOutcome};
use crate::config::MailboxConfig;
use crate::error::MailError;

/// Mailbox opened by every fetch.
pub const INBOX: &str = "INBOX";

/// Upper bound on the LOGOUT exchange during cleanup.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest literal accepted from the server. Anything bigger is a protocol error.
const MAX_LITERAL: usize = 32 * 1024 * 1024;

/// Sections requested per message: the envelope headers and the raw text body.
const FETCH_ITEMS: &str = "(BODY.PEEK[HEADER.FIELDS (FROM TO SUBJECT DATE)] BODY.PEEK[TEXT])";

/// One message as delivered by a FETCH response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedMessage {
    pub seqno: u32,
    /// Raw header block; `None` if the server never sent the header section.
    pub header: Option<Vec<u8>>,
    pub text: Option<Vec<u8>>,
}

impl FetchedMessage {
    fn store(&mut self, section: Section, data: Vec<u8>) {
        match section {
            Section::Header => self.header = Some(data),
            Section::Text => self.text = Some(data),
            Section::Other => {}
        }
    }
}

/// An authenticated-or-not IMAP connection.
#[async_trait]
pub trait ImapSession: Send {
    async fn login(&mut self, user: &str, password: &str) -> Result<(), MailError>;

    /// Open a mailbox read-only and return its message count.
    async fn examine(&mut self, mailbox: &str) -> Result<u32, MailError>;

    /// Issue a FETCH for the sequence range `first:last`.
    async fn start_fetch(&mut self, first: u32, last: u32) -> Result<(), MailError>;

    /// Next message of the running FETCH; `None` once the server completes it.
    async fn next_message(&mut self) -> Result<Option<FetchedMessage>, MailError>;

    async fn logout(&mut self) -> Result<(), MailError>;
}

/// Opens IMAP sessions. The live implementation dials the network.
#[async_trait]
pub trait ImapConnector: Send + Sync {
    async fn connect(&self, config: &MailboxConfig) -> Result<Box<dyn ImapSession>, MailError>;
}

/// Connector for real servers (TCP + optional TLS).
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpImapConnector;

#[async_trait]
impl ImapConnector for TcpImapConnector {
    async fn connect(&self, config: &MailboxConfig) -> Result<Box<dyn ImapSession>, MailError> {
        let stream = net::connect(config).await?;
        let client = ImapClient::from_stream(stream).await?;
        Ok(Box::new(client))
    }
}

// ── State machine ───────────────────────────────────────────────────

/// The sequence range holding the newest `min(limit, 20, total)` messages.
///
/// `None` for an empty mailbox.
pub fn fetch_range(limit: u32, total: u32) -> Option<(u32, u32)> {
    if total == 0 {
        return None;
    }
    let actual = limit.max(1).min(MAX_BATCH).min(total);
    Some((total - actual + 1, total))
}

/// Run one IMAP fetch to completion.
pub async fn fetch_imap(
    connector: &dyn ImapConnector,
    config: &MailboxConfig,
    limit: u32,
) -> FetchOutcome {
    let Some(credentials) = config.credentials.as_ref() else {
        warn!("IMAP credentials not configured");
        return FetchOutcome::Failed(FetchFailure::MissingCredentials);
    };

    info!(host = %config.host, port = config.port, limit, "IMAP fetch starting");
    let deadline = Instant::now() + config.connect_timeout;

    let mut session = match timeout_at(deadline, connector.connect(config)).await {
        Err(_) => {
            warn!(host = %config.host, "IMAP connect timed out");
            return FetchOutcome::Failed(FetchFailure::ConnectTimeout);
        }
        Ok(Err(e)) => {
            warn!(host = %config.host, error = %e, "IMAP connect failed");
            return FetchOutcome::Failed(FetchFailure::ConnectFailed(e.to_string()));
        }
        Ok(Ok(session)) => session,
    };

    let login = timeout_at(
        deadline,
        session.login(&credentials.user, credentials.password.expose_secret()),
    )
    .await;

    let outcome = match login {
        Err(_) => {
            warn!(host = %config.host, "IMAP authentication timed out");
            FetchOutcome::Failed(FetchFailure::ConnectTimeout)
        }
        Ok(Err(MailError::Rejected { response, .. })) => {
            warn!(response = %response, "IMAP login rejected");
            FetchOutcome::Failed(FetchFailure::AuthFailure(response))
        }
        Ok(Err(e)) => {
            warn!(error = %e, "IMAP login failed");
            FetchOutcome::Failed(FetchFailure::ConnectFailed(e.to_string()))
        }
        Ok(Ok(())) => {
            debug!("IMAP authenticated");
            fetch_authenticated(session.as_mut(), limit).await
        }
    };

    close(session).await;
    outcome
}

async fn fetch_authenticated(session: &mut dyn ImapSession, limit: u32) -> FetchOutcome {
    let total = match session.examine(INBOX).await {
        Ok(total) => total,
        Err(e) => {
            warn!(error = %e, "Cannot open INBOX");
            return FetchOutcome::Failed(FetchFailure::MailboxOpenFailure(e.to_string()));
        }
    };

    let Some((first, last)) = fetch_range(limit, total) else {
        info!("IMAP mailbox is empty");
        return FetchOutcome::Failed(FetchFailure::EmptyMailbox);
    };
    debug!(total, first, last, "Fetching IMAP range");

    if let Err(e) = session.start_fetch(first, last).await {
        warn!(error = %e, "Failed to set up IMAP fetch");
        return FetchOutcome::Failed(FetchFailure::FetchSetupFailure(e.to_string()));
    }

    let mut accepted: Vec<(u32, NormalizedEmail)> = Vec::new();
    let mut stream_error = None;
    loop {
        match session.next_message().await {
            Ok(Some(message)) => {
                let seqno = message.seqno;
                match normalize(message) {
                    Some(email) => accepted.push((seqno, email)),
                    None => debug!(seqno, "Dropping IMAP message without headers"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, accepted = accepted.len(), "IMAP fetch stream failed");
                stream_error = Some(e);
                break;
            }
        }
    }

    if !accepted.is_empty() {
        accepted.sort_by(|a, b| b.0.cmp(&a.0));
        info!(count = accepted.len(), "IMAP fetch complete");
        return FetchOutcome::Messages(accepted.into_iter().map(|(_, email)| email).collect());
    }

    match stream_error {
        Some(e) => FetchOutcome::Failed(FetchFailure::FetchFailure(e.to_string())),
        None => FetchOutcome::Failed(FetchFailure::NoValidMessages),
    }
}

/// Turn a fetched message into a record. Messages without a header section are dropped.
fn normalize(message: FetchedMessage) -> Option<NormalizedEmail> {
    let header = message.header?;
    let envelope = parse_envelope(&header);
    let text = message
        .text
        .map(|body| String::from_utf8_lossy(&body).trim_end().to_string());

    let email = NormalizedEmail::new(
        format!("msg-{}", message.seqno),
        envelope.subject,
        envelope.from,
        envelope.date,
        text,
        None,
    );
    Some(match envelope.to {
        Some(to) => email.with_to(to),
        None => email,
    })
}

async fn close(mut session: Box<dyn ImapSession>) {
    match timeout(CLOSE_TIMEOUT, session.logout()).await {
        Ok(Ok(())) => debug!("IMAP session closed"),
        Ok(Err(e)) => debug!(error = %e, "IMAP logout failed"),
        Err(_) => debug!("IMAP logout timed out"),
    }
}

// ── Live client ─────────────────────────────────────────────────────

/// Minimal async IMAP client: LOGIN, EXAMINE, FETCH, LOGOUT.
pub struct ImapClient {
    reader: BufReader<ReadHalf<Box<dyn MailStream>>>,
    writer: WriteHalf<Box<dyn MailStream>>,
    tag_counter: u32,
    /// Tag of the FETCH currently being streamed.
    fetch_tag: Option<String>,
}

impl ImapClient {
    /// Wrap a connected stream and consume the server greeting.
    pub async fn from_stream(stream: Box<dyn MailStream>) -> Result<Self, MailError> {
        let (read, write) = tokio::io::split(stream);
        let mut client = Self {
            reader: BufReader::new(read),
            writer: write,
            tag_counter: 0,
            fetch_tag: None,
        };

        let greeting = client.read_line().await?;
        let upper = greeting.to_ascii_uppercase();
        if !upper.starts_with("* OK") && !upper.starts_with("* PREAUTH") {
            return Err(MailError::Rejected {
                command: "greeting".into(),
                response: greeting,
            });
        }
        debug!(greeting = %greeting, "IMAP connected");
        Ok(client)
    }

    /// Read a single CRLF-terminated line.
    async fn read_line(&mut self) -> Result<String, MailError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(MailError::Protocol("IMAP connection closed unexpectedly".into()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Read a `{n}` literal. The buffer grows with the bytes actually received.
    async fn read_literal(&mut self, n: usize) -> Result<Vec<u8>, MailError> {
        if n > MAX_LITERAL {
            return Err(MailError::Protocol(format!(
                "IMAP literal of {n} bytes exceeds the {MAX_LITERAL} byte limit"
            )));
        }
        let mut buf = Vec::new();
        (&mut self.reader).take(n as u64).read_to_end(&mut buf).await?;
        if buf.len() != n {
            return Err(MailError::Protocol("IMAP connection closed inside a literal".into()));
        }
        Ok(buf)
    }

    /// Send a tagged command. Returns the tag.
    async fn send_command(&mut self, cmd: &str) -> Result<String, MailError> {
        self.tag_counter += 1;
        let tag = format!("A{:04}", self.tag_counter);
        let line = format!("{tag} {cmd}\r\n");
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(tag)
    }

    /// Read until the tagged completion. Returns (untagged lines, status line).
    async fn read_response(&mut self, tag: &str) -> Result<(Vec<String>, String), MailError> {
        let mut untagged = Vec::new();
        loop {
            let line = self.read_line().await?;
            if is_tagged(&line, tag) {
                return Ok((untagged, line));
            }
            untagged.push(line);
        }
    }

    async fn command(&mut self, name: &str, cmd: &str) -> Result<Vec<String>, MailError> {
        let tag = self.send_command(cmd).await?;
        let (untagged, status) = self.read_response(&tag).await?;
        if !status_ok(&status, &tag) {
            return Err(MailError::Rejected {
                command: name.to_string(),
                response: status,
            });
        }
        Ok(untagged)
    }

    /// Read the sections of one `* N FETCH (...)` response, starting at its first line.
    async fn read_fetch_body(&mut self, seqno: u32, first_line: String) -> Result<FetchedMessage, MailError> {
        let mut message = FetchedMessage {
            seqno,
            ..Default::default()
        };
        let mut line = first_line;
        loop {
            // `""` and NIL arrive inline; the section is present but empty.
            for (section, data) in inline_sections(&line) {
                message.store(section, data);
            }
            let Some(size) = literal_size(&line) else {
                break;
            };
            let data = self.read_literal(size).await?;
            message.store(section_before_literal(&line), data);
            // Remainder of the response after the literal: another section or ")".
            line = self.read_line().await?;
        }
        Ok(message)
    }
}

#[async_trait]
impl ImapSession for ImapClient {
    async fn login(&mut self, user: &str, password: &str) -> Result<(), MailError> {
        let cmd = format!("LOGIN {} {}", quote(user), quote(password));
        self.command("LOGIN", &cmd).await.map(|_| ())
    }

    async fn examine(&mut self, mailbox: &str) -> Result<u32, MailError> {
        let untagged = self.command("EXAMINE", &format!("EXAMINE {}", quote(mailbox))).await?;
        untagged
            .iter()
            .find_map(|line| parse_exists(line))
            .ok_or_else(|| MailError::Protocol("EXAMINE response carried no EXISTS count".into()))
    }

    async fn start_fetch(&mut self, first: u32, last: u32) -> Result<(), MailError> {
        if self.fetch_tag.is_some() {
            return Err(MailError::InvalidState {
                command: "FETCH".into(),
            });
        }
        let tag = self
            .send_command(&format!("FETCH {first}:{last} {FETCH_ITEMS}"))
            .await?;
        self.fetch_tag = Some(tag);
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<FetchedMessage>, MailError> {
        let Some(tag) = self.fetch_tag.clone() else {
            return Err(MailError::InvalidState {
                command: "FETCH".into(),
            });
        };
        loop {
            let line = self.read_line().await?;
            if is_tagged(&line, &tag) {
                self.fetch_tag = None;
                if status_ok(&line, &tag) {
                    return Ok(None);
                }
                return Err(MailError::Rejected {
                    command: "FETCH".into(),
                    response: line,
                });
            }
            if let Some(seqno) = parse_fetch_start(&line) {
                return self.read_fetch_body(seqno, line).await.map(Some);
            }
            // Unrelated untagged data (EXISTS, EXPUNGE, ...) is ignored.
        }
    }

    async fn logout(&mut self) -> Result<(), MailError> {
        let tag = self.send_command("LOGOUT").await?;
        // Server sends * BYE before the tagged OK.
        self.read_response(&tag).await.map(|_| ())
    }
}

// ── Response parsing helpers ────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Section {
    Header,
    Text,
    Other,
}

/// Quote an IMAP string argument.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn is_tagged(line: &str, tag: &str) -> bool {
    line.strip_prefix(tag).is_some_and(|rest| rest.starts_with(' '))
}

fn status_ok(line: &str, tag: &str) -> bool {
    line.strip_prefix(tag)
        .and_then(|rest| rest.split_whitespace().next())
        .is_some_and(|status| status.eq_ignore_ascii_case("OK"))
}

/// `* 12 EXISTS` → 12
fn parse_exists(line: &str) -> Option<u32> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "*" {
        return None;
    }
    let count = parts.next()?.parse().ok()?;
    parts
        .next()
        .filter(|word| word.eq_ignore_ascii_case("EXISTS"))
        .map(|_| count)
}

/// `* 7 FETCH (...` → 7
fn parse_fetch_start(line: &str) -> Option<u32> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "*" {
        return None;
    }
    let seqno = parts.next()?.parse().ok()?;
    parts
        .next()
        .filter(|word| word.eq_ignore_ascii_case("FETCH"))
        .map(|_| seqno)
}

/// Size of a literal announced at the end of the line (`... {123}`).
fn literal_size(line: &str) -> Option<usize> {
    let trimmed = line.trim_end();
    let inner = trimmed.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].trim_end_matches('+').parse().ok()
}

/// Which body section the literal at the end of `line` belongs to.
fn section_before_literal(line: &str) -> Section {
    let upper = line.to_ascii_uppercase();
    match upper.rfind("BODY[") {
        Some(start) => section_kind(&upper[start..]),
        None => Section::Other,
    }
}

/// Classify an upper-cased `BODY[...]` item.
fn section_kind(item: &str) -> Section {
    if item.contains("HEADER") {
        Section::Header
    } else if item.contains("TEXT]") {
        Section::Text
    } else {
        Section::Other
    }
}

/// Sections on `line` whose value is a quoted string or NIL instead of a literal.
fn inline_sections(line: &str) -> Vec<(Section, Vec<u8>)> {
    let upper = line.to_ascii_uppercase();
    let mut found = Vec::new();
    let mut pos = 0;
    while let Some(offset) = upper[pos..].find("BODY[") {
        let start = pos + offset;
        let Some(close) = upper[start..].find(']') else {
            break;
        };
        let end = start + close + 1;
        let section = section_kind(&upper[start..end]);

        // Skip an optional `<origin>` partial marker.
        let mut value_start = end;
        if upper[end..].starts_with('<') {
            match upper[end..].find('>') {
                Some(gt) => value_start = end + gt + 1,
                None => break,
            }
        }
        let rest = line[value_start..].trim_start();
        let skipped = line.len() - value_start - rest.len();

        pos = value_start + skipped;
        if let Some((data, consumed)) = parse_quoted(rest) {
            found.push((section, data));
            pos += consumed;
        } else if rest.get(..3).is_some_and(|word| word.eq_ignore_ascii_case("NIL")) {
            found.push((section, Vec::new()));
            pos += 3;
        }
    }
    found
}

/// Parse a leading IMAP quoted string. Returns its content and the bytes consumed.
fn parse_quoted(s: &str) -> Option<(Vec<u8>, usize)> {
    let bytes = s.as_bytes();
    if bytes.first() != Some(&b'"') {
        return None;
    }
    let mut out = Vec::new();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => return Some((out, i + 1)),
            b'\\' if i + 1 < bytes.len() => {
                out.push(bytes[i + 1]);
                i += 2;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    None
}
