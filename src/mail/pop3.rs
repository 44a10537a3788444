//! POP3 retrieval: a small async client with an explicit session state and
//! the serial fetch state machine built on it.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

use super::MAX_BATCH;
use super::mime::MimeParser;
use super::model::NormalizedEmail;
use super::net::{self, MailStream};
use super::placeholder::{FetchFailure, FetchOutcome, parse_error_entry};
use crate::config::MailboxConfig;
use crate::error::MailError;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// `+OK count size` from STAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatResponse {
    pub count: u32,
    pub total_size: u64,
}

/// One scan listing line from LIST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListEntry {
    pub msg_no: u32,
    pub size: u64,
}

/// A POP3 connection. Commands out of session order fail with
/// [`MailError::InvalidState`].
#[async_trait]
pub trait Pop3Session: Send {
    /// USER then PASS.
    async fn login(&mut self, user: &str, password: &str) -> Result<(), MailError>;
    async fn stat(&mut self) -> Result<StatResponse, MailError>;
    async fn list(&mut self) -> Result<Vec<ListEntry>, MailError>;
    /// Full message bytes, dot-unstuffed.
    async fn retr(&mut self, msg_no: u32) -> Result<Vec<u8>, MailError>;
    async fn quit(&mut self) -> Result<(), MailError>;
}

#[async_trait]
pub trait Pop3Connector: Send + Sync {
    async fn connect(&self, config: &MailboxConfig) -> Result<Box<dyn Pop3Session>, MailError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpPop3Connector;

#[async_trait]
impl Pop3Connector for TcpPop3Connector {
    async fn connect(&self, config: &MailboxConfig) -> Result<Box<dyn Pop3Session>, MailError> {
        let stream = net::connect(config).await?;
        let client = Pop3Client::from_stream(stream).await?;
        Ok(Box::new(client))
    }
}

// ── State machine ───────────────────────────────────────────────────

/// The `min(limit, 20, listed)` highest-numbered messages, highest first.
///
/// Assumes a higher message number means a more recent message.
pub fn select_messages(listed: &[ListEntry], limit: u32) -> Vec<u32> {
    let mut numbers: Vec<u32> = listed.iter().map(|e| e.msg_no).collect();
    numbers.sort_unstable_by(|a, b| b.cmp(a));
    numbers.dedup();
    let actual = limit.max(1).min(MAX_BATCH) as usize;
    numbers.truncate(actual);
    numbers
}

/// Run one POP3 fetch to completion.
pub async fn fetch_pop3(
    connector: &dyn Pop3Connector,
    parser: &dyn MimeParser,
    config: &MailboxConfig,
    limit: u32,
) -> FetchOutcome {
    let Some(credentials) = config.credentials.as_ref() else {
        warn!("POP3 credentials not configured");
        return FetchOutcome::Failed(FetchFailure::MissingCredentials);
    };

    info!(host = %config.host, port = config.port, limit, "POP3 fetch starting");
    let deadline = Instant::now() + config.connect_timeout;

    let mut session = match timeout_at(deadline, connector.connect(config)).await {
        Err(_) => {
            warn!(host = %config.host, "POP3 connection timed out");
            return FetchOutcome::Failed(FetchFailure::ConnectTimeout);
        }
        Ok(Err(e)) => {
            warn!(host = %config.host, error = %e, "POP3 client error");
            return FetchOutcome::Failed(FetchFailure::ClientError(e.to_string()));
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
            warn!(host = %config.host, "POP3 login timed out");
            FetchOutcome::Failed(FetchFailure::ConnectTimeout)
        }
        Ok(Err(MailError::Rejected { response, .. })) => {
            warn!(response = %response, "POP3 login failed");
            FetchOutcome::Failed(FetchFailure::LoginFailed(response))
        }
        Ok(Err(MailError::InvalidState { command })) => {
            warn!(command = %command, "POP3 command issued in invalid state");
            FetchOutcome::Failed(FetchFailure::AuthFailure(String::new()))
        }
        Ok(Err(e)) => {
            warn!(error = %e, "POP3 client error");
            FetchOutcome::Failed(FetchFailure::ClientError(e.to_string()))
        }
        Ok(Ok(())) => {
            debug!("POP3 login successful");
            fetch_transaction(session.as_mut(), parser, limit).await
        }
    };

    close(session).await;
    outcome
}

fn session_failure(e: MailError) -> FetchFailure {
    match e {
        MailError::InvalidState { .. } => FetchFailure::AuthFailure(String::new()),
        other => FetchFailure::ClientError(other.to_string()),
    }
}

async fn fetch_transaction(
    session: &mut dyn Pop3Session,
    parser: &dyn MimeParser,
    limit: u32,
) -> FetchOutcome {
    let stat = match session.stat().await {
        Ok(stat) => stat,
        Err(e) => {
            warn!(error = %e, "POP3 STAT failed");
            return FetchOutcome::Failed(session_failure(e));
        }
    };
    info!(count = stat.count, size = stat.total_size, "POP3 mailbox stats");
    if stat.count == 0 {
        return FetchOutcome::Failed(FetchFailure::EmptyMailbox);
    }

    let listed = match session.list().await {
        Ok(listed) => listed,
        Err(MailError::Rejected { response, .. }) => {
            warn!(response = %response, "POP3 LIST rejected");
            return FetchOutcome::Failed(FetchFailure::ListFailure(response));
        }
        Err(e) => {
            warn!(error = %e, "POP3 LIST failed");
            return FetchOutcome::Failed(session_failure(e));
        }
    };

    let selected = select_messages(&listed, limit);
    debug!(listed = listed.len(), selected = ?selected, "POP3 messages to retrieve");

    let mut messages = Vec::with_capacity(selected.len());
    for msg_no in selected {
        let raw = match session.retr(msg_no).await {
            Ok(raw) => raw,
            Err(MailError::Rejected { response, .. }) => {
                warn!(msg_no, response = %response, "POP3 RETR failed, skipping");
                continue;
            }
            Err(e) => {
                warn!(msg_no, error = %e, "POP3 RETR aborted");
                return FetchOutcome::Failed(session_failure(e));
            }
        };

        match parser.parse(&raw).await {
            Ok(parsed) => {
                debug!(msg_no, "POP3 message parsed");
                messages.push(NormalizedEmail::new(
                    msg_no,
                    parsed.subject,
                    parsed.from,
                    parsed.date,
                    parsed.text,
                    parsed.html,
                ));
            }
            Err(e) => {
                warn!(msg_no, error = %e, "POP3 message could not be parsed");
                messages.push(parse_error_entry(msg_no));
            }
        }
    }

    if messages.is_empty() {
        return FetchOutcome::Failed(FetchFailure::NoMessagesRetrieved { count: stat.count });
    }
    info!(count = messages.len(), "POP3 fetch complete");
    FetchOutcome::Messages(messages)
}

async fn close(mut session: Box<dyn Pop3Session>) {
    match timeout(CLOSE_TIMEOUT, session.quit()).await {
        Ok(Ok(())) => debug!("POP3 session closed"),
        Ok(Err(e)) => debug!(error = %e, "POP3 QUIT failed"),
        Err(_) => debug!("POP3 QUIT timed out"),
    }
}

// ── Live client ─────────────────────────────────────────────────────

/// RFC 1939 session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authorization,
    Transaction,
    Closed,
}

pub struct Pop3Client {
    stream: BufReader<Box<dyn MailStream>>,
    state: SessionState,
}

impl Pop3Client {
    /// Wrap a connected stream and consume the `+OK` greeting.
    pub async fn from_stream(stream: Box<dyn MailStream>) -> Result<Self, MailError> {
        let mut client = Self {
            stream: BufReader::new(stream),
            state: SessionState::Authorization,
        };
        let greeting = client.read_line().await?;
        check_ok("greeting", &greeting)?;
        debug!(greeting = %greeting, "POP3 connected");
        Ok(client)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn require(&self, state: SessionState, command: &str) -> Result<(), MailError> {
        if self.state != state {
            return Err(MailError::InvalidState {
                command: command.to_string(),
            });
        }
        Ok(())
    }

    async fn read_raw_line(&mut self) -> Result<Vec<u8>, MailError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Err(MailError::Protocol("POP3 connection closed unexpectedly".into()));
        }
        while matches!(buf.last(), Some(b'\r' | b'\n')) {
            buf.pop();
        }
        Ok(buf)
    }

    async fn read_line(&mut self) -> Result<String, MailError> {
        let raw = self.read_raw_line().await?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    async fn write_line(&mut self, line: &str) -> Result<(), MailError> {
        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;
        Ok(())
    }

    /// Send a command and check its single-line status.
    async fn command(&mut self, name: &str, line: &str) -> Result<String, MailError> {
        self.write_line(line).await?;
        let status = self.read_line().await?;
        check_ok(name, &status)?;
        Ok(status)
    }

    /// Lines up to the terminating ".", with byte stuffing removed.
    async fn read_multiline(&mut self) -> Result<Vec<u8>, MailError> {
        let mut out = Vec::new();
        loop {
            let line = self.read_raw_line().await?;
            if line == b"." {
                break;
            }
            let content = if line.starts_with(b"..") { &line[1..] } else { &line[..] };
            out.extend_from_slice(content);
            out.extend_from_slice(b"\r\n");
        }
        Ok(out)
    }
}

#[async_trait]
impl Pop3Session for Pop3Client {
    async fn login(&mut self, user: &str, password: &str) -> Result<(), MailError> {
        self.require(SessionState::Authorization, "USER")?;
        self.command("USER", &format!("USER {user}")).await?;
        self.command("PASS", &format!("PASS {password}")).await?;
        self.state = SessionState::Transaction;
        Ok(())
    }

    async fn stat(&mut self) -> Result<StatResponse, MailError> {
        self.require(SessionState::Transaction, "STAT")?;
        let status = self.command("STAT", "STAT").await?;
        let mut parts = status.trim_start_matches("+OK").split_whitespace();
        let count = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| MailError::Protocol(format!("malformed STAT response: {status}")))?;
        let total_size = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Ok(StatResponse { count, total_size })
    }

    async fn list(&mut self) -> Result<Vec<ListEntry>, MailError> {
        self.require(SessionState::Transaction, "LIST")?;
        self.command("LIST", "LIST").await?;
        let body = self.read_multiline().await?;
        let entries = String::from_utf8_lossy(&body)
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let msg_no = parts.next()?.parse().ok()?;
                let size = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                Some(ListEntry { msg_no, size })
            })
            .filter(|entry| entry.msg_no > 0)
            .collect();
        Ok(entries)
    }

    async fn retr(&mut self, msg_no: u32) -> Result<Vec<u8>, MailError> {
        self.require(SessionState::Transaction, "RETR")?;
        self.command("RETR", &format!("RETR {msg_no}")).await?;
        self.read_multiline().await
    }

    async fn quit(&mut self) -> Result<(), MailError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        self.command("QUIT", "QUIT").await.map(|_| ())
    }
}

fn check_ok(command: &str, line: &str) -> Result<(), MailError> {
    if line.starts_with("+OK") {
        Ok(())
    } else {
        Err(MailError::Rejected {
            command: command.to_string(),
            response: line.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;

    fn entries(numbers: &[u32]) -> Vec<ListEntry> {
        numbers
            .iter()
            .map(|&msg_no| ListEntry { msg_no, size: 100 })
            .collect()
    }

    #[test]
    fn selects_highest_numbers_first() {
        assert_eq!(select_messages(&entries(&[1, 2, 3, 4, 5]), 3), vec![5, 4, 3]);
        assert_eq!(select_messages(&entries(&[1, 2, 3]), 10), vec![3, 2, 1]);
        assert_eq!(select_messages(&entries(&[]), 10), Vec::<u32>::new());
    }

    #[test]
    fn selection_is_capped() {
        let listed = entries(&(1..=50).collect::<Vec<_>>());
        let selected = select_messages(&listed, 100);
        assert_eq!(selected.len(), 20);
        assert_eq!(selected[0], 50);
        assert_eq!(selected[19], 31);
    }

    async fn serve(
        server_side: tokio::io::DuplexStream,
        script: Vec<(&'static str, &'static str)>,
    ) {
        let (read, mut write) = tokio::io::split(server_side);
        let mut lines = BufReader::new(read).lines();
        write.write_all(b"+OK POP3 ready\r\n").await.unwrap();
        for (expected, reply) in script {
            let line = lines.next_line().await.unwrap().unwrap();
            assert_eq!(line, expected);
            write.write_all(reply.as_bytes()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn client_speaks_pop3() {
        let (client_side, server_side) = tokio::io::duplex(16 * 1024);
        let server = tokio::spawn(serve(
            server_side,
            vec![
                ("USER user", "+OK\r\n"),
                ("PASS secret", "+OK logged in\r\n"),
                ("STAT", "+OK 2 320\r\n"),
                ("LIST", "+OK 2 messages\r\n1 120\r\n2 200\r\n.\r\n"),
                (
                    "RETR 2",
                    "+OK 200 octets\r\nSubject: Two\r\n\r\n..leading dot\r\nbody\r\n.\r\n",
                ),
                ("QUIT", "+OK bye\r\n"),
            ],
        ));

        let mut client = Pop3Client::from_stream(Box::new(client_side)).await.unwrap();
        assert_eq!(client.state(), SessionState::Authorization);
        client.login("user", "secret").await.unwrap();
        assert_eq!(client.state(), SessionState::Transaction);

        let stat = client.stat().await.unwrap();
        assert_eq!(stat, StatResponse { count: 2, total_size: 320 });

        let listed = client.list().await.unwrap();
        assert_eq!(listed, vec![ListEntry { msg_no: 1, size: 120 }, ListEntry { msg_no: 2, size: 200 }]);

        let raw = client.retr(2).await.unwrap();
        assert_eq!(raw, b"Subject: Two\r\n\r\n.leading dot\r\nbody\r\n".to_vec());

        client.quit().await.unwrap();
        assert_eq!(client.state(), SessionState::Closed);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_password_is_reported() {
        let (client_side, server_side) = tokio::io::duplex(4096);
        let server = tokio::spawn(serve(
            server_side,
            vec![
                ("USER user", "+OK\r\n"),
                ("PASS wrong", "-ERR [AUTH] Username and password not accepted.\r\n"),
            ],
        ));

        let mut client = Pop3Client::from_stream(Box::new(client_side)).await.unwrap();
        match client.login("user", "wrong").await {
            Err(MailError::Rejected { command, response }) => {
                assert_eq!(command, "PASS");
                assert!(response.starts_with("-ERR"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(client.state(), SessionState::Authorization);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn commands_out_of_state_are_refused() {
        let (client_side, server_side) = tokio::io::duplex(4096);
        let server = tokio::spawn(serve(server_side, vec![]));

        let mut client = Pop3Client::from_stream(Box::new(client_side)).await.unwrap();
        assert!(matches!(
            client.stat().await,
            Err(MailError::InvalidState { command }) if command == "STAT"
        ));
        assert!(matches!(client.retr(1).await, Err(MailError::InvalidState { .. })));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn err_greeting_fails_connect() {
        let (client_side, mut server_side) = tokio::io::duplex(1024);
        server_side.write_all(b"-ERR go away\r\n").await.unwrap();
        assert!(Pop3Client::from_stream(Box::new(client_side)).await.is_err());
    }
}
