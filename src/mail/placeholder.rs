//! Failure taxonomy of the fetch state machines and its mapping to
//! placeholder records.
//!
//! Every distinguishable failure becomes exactly one [`NormalizedEmail`] with
//! a stable id, a subject naming the failure and remediation text, so a fetch
//! never fails outward and never returns an empty list.

use std::fmt;

use chrono::Utc;

use super::model::{EmailId, NormalizedEmail, SYSTEM_SENDER, escape_html};

/// Retrieval protocol a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Imap,
    Pop3,
}

impl Protocol {
    fn label(self) -> &'static str {
        match self {
            Protocol::Imap => "IMAP",
            Protocol::Pop3 => "POP3",
        }
    }

    fn slug(self) -> &'static str {
        match self {
            Protocol::Imap => "imap",
            Protocol::Pop3 => "pop3",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Terminal failure of one fetch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    MissingCredentials,
    ConnectTimeout,
    ConnectFailed(String),
    /// Authentication could not proceed (rejected login or out-of-sequence command).
    AuthFailure(String),
    /// The server answered the login with a failure status.
    LoginFailed(String),
    MailboxOpenFailure(String),
    EmptyMailbox,
    ListFailure(String),
    FetchSetupFailure(String),
    /// Batch-level fetch error before any message was accumulated.
    FetchFailure(String),
    NoValidMessages,
    NoMessagesRetrieved { count: u32 },
    ClientError(String),
    CriticalFailure(String),
}

impl FetchFailure {
    fn slug(&self) -> &'static str {
        match self {
            FetchFailure::MissingCredentials => "missing-credentials",
            FetchFailure::ConnectTimeout => "connect-timeout",
            FetchFailure::ConnectFailed(_) => "connect-failed",
            FetchFailure::AuthFailure(_) => "auth-failed",
            FetchFailure::LoginFailed(_) => "login-failed",
            FetchFailure::MailboxOpenFailure(_) => "mailbox-open-failed",
            FetchFailure::EmptyMailbox => "empty-mailbox",
            FetchFailure::ListFailure(_) => "list-failed",
            FetchFailure::FetchSetupFailure(_) => "fetch-setup-failed",
            FetchFailure::FetchFailure(_) => "fetch-failed",
            FetchFailure::NoValidMessages => "no-valid-messages",
            FetchFailure::NoMessagesRetrieved { .. } => "no-messages-retrieved",
            FetchFailure::ClientError(_) => "client-error",
            FetchFailure::CriticalFailure(_) => "critical-failure",
        }
    }
}

/// Result of one state machine run before it is collapsed at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Messages(Vec<NormalizedEmail>),
    Failed(FetchFailure),
}

impl FetchOutcome {
    /// Collapse to the non-empty record sequence handed to callers.
    pub fn into_emails(self, protocol: Protocol) -> Vec<NormalizedEmail> {
        match self {
            FetchOutcome::Messages(messages) if !messages.is_empty() => messages,
            FetchOutcome::Messages(_) => vec![placeholder(protocol, &FetchFailure::NoValidMessages)],
            FetchOutcome::Failed(failure) => vec![placeholder(protocol, &failure)],
        }
    }
}

const NETWORK_HINTS: &[&str] = &[
    "Network connectivity issues",
    "Incorrect email credentials",
    "Protocol access is not enabled in your email account",
    "Email provider's security settings blocking access",
];

fn provider_hints(protocol: Protocol) -> [String; 3] {
    [
        format!("Enable {protocol} access in your Gmail settings"),
        "Use an app-specific password if 2FA is enabled".to_string(),
        "Allow access for less secure apps (if applicable)".to_string(),
    ]
}

fn list_html<S: AsRef<str>>(items: &[S]) -> String {
    let mut html = String::from("<ul>");
    for item in items {
        html.push_str("<li>");
        html.push_str(&escape_html(item.as_ref()));
        html.push_str("</li>");
    }
    html.push_str("</ul>");
    html
}

fn list_text<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|i| format!("- {}", i.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Subject, plain text and HTML for one failure.
fn describe(protocol: Protocol, failure: &FetchFailure) -> (String, String, String) {
    let p = protocol.label();
    match failure {
        FetchFailure::MissingCredentials => {
            let msg = format!(
                "Please set EMAIL_USER and EMAIL_PASS environment variables to connect to your {p} account."
            );
            (format!("{p} Error: Missing Credentials"), msg.clone(), para(&msg))
        }
        FetchFailure::ConnectTimeout => {
            let msg = format!(
                "Connection to {p} server timed out. Please check your network settings and try again."
            );
            (format!("{p} Error: Connection Timeout"), msg.clone(), para(&msg))
        }
        FetchFailure::ConnectFailed(reason) => {
            let msg = format!("Failed to connect to {p} server: {reason}");
            let hints = provider_hints(protocol);
            let text = format!(
                "{msg}\n\nThis may be due to:\n{}\n\nFor Gmail, make sure to:\n{}",
                list_text(NETWORK_HINTS),
                list_text(&hints)
            );
            let html = format!(
                "{}<p>This may be due to:</p>{}<p>For Gmail, make sure to:</p>{}",
                para(&msg),
                list_html(NETWORK_HINTS),
                list_html(&hints)
            );
            (format!("{p} Error: Connection Failed"), text, html)
        }
        FetchFailure::AuthFailure(reason) => {
            let msg = format!(
                "Failed to authenticate with the {p} server. Please check your credentials."
            );
            let hints = provider_hints(protocol);
            let detail = if reason.is_empty() {
                String::new()
            } else {
                format!(" ({reason})")
            };
            let text = format!("{msg}{detail}\n\nFor Gmail, make sure to:\n{}", list_text(&hints));
            let html = format!(
                "{}<p>For Gmail, make sure to:</p>{}",
                para(&format!("{msg}{detail}")),
                list_html(&hints)
            );
            (format!("{p} Error: Authentication Failed"), text, html)
        }
        FetchFailure::LoginFailed(response) => {
            let msg = format!("Login to {p} server failed: {response}");
            let hint = format!(
                "Check your email and password, and make sure {p} access is enabled."
            );
            (
                format!("{p} Error: Login Failed"),
                format!("{msg}\n\n{hint}"),
                format!("{}{}", para(&msg), para(&hint)),
            )
        }
        FetchFailure::MailboxOpenFailure(reason) => {
            let msg = format!("Failed to open INBOX: {reason}");
            (format!("{p} Error: Cannot Open Inbox"), msg.clone(), para(&msg))
        }
        FetchFailure::EmptyMailbox => {
            let msg = format!("Your {p} mailbox is empty.");
            ("No Messages".to_string(), msg.clone(), para(&msg))
        }
        FetchFailure::ListFailure(reason) => {
            let msg = format!("Failed to retrieve message list from the {p} server: {reason}");
            (format!("{p} Error: Failed to List Messages"), msg.clone(), para(&msg))
        }
        FetchFailure::FetchSetupFailure(reason) => {
            let msg = format!("Error setting up fetch operation: {reason}");
            (format!("{p} Error: Failed to Set Up Fetch"), msg.clone(), para(&msg))
        }
        FetchFailure::FetchFailure(reason) => {
            let msg = format!("Failed to fetch messages: {reason}");
            (format!("{p} Error: Failed to Fetch Messages"), msg.clone(), para(&msg))
        }
        FetchFailure::NoValidMessages => {
            let msg = "Your mailbox contains messages, but none could be properly parsed.";
            (format!("{p}: No Valid Messages"), msg.to_string(), para(msg))
        }
        FetchFailure::NoMessagesRetrieved { count } => {
            let msg = format!("Your mailbox contains {count} messages, but none could be retrieved.");
            let hint = "This might be due to format incompatibilities or access restrictions.";
            (
                format!("{p} Error: No Messages Retrieved"),
                format!("{msg}\n\n{hint}"),
                format!("{}{}", para(&msg), para(hint)),
            )
        }
        FetchFailure::ClientError(reason) => {
            let msg = format!("{p} client error: {reason}");
            let hint =
                "This may be due to network issues, server configuration, or incorrect credentials.";
            (
                format!("{p} Error: Client Error"),
                format!("{msg}\n\n{hint}"),
                format!("{}{}", para(&msg), para(hint)),
            )
        }
        FetchFailure::CriticalFailure(reason) => {
            let msg = format!("A critical error occurred: {reason}");
            let hint = "Please check your server configuration and network settings.";
            (
                format!("{p} Error: Critical Failure"),
                format!("{msg}\n\n{hint}"),
                format!("{}{}", para(&msg), para(hint)),
            )
        }
    }
}

fn para(text: &str) -> String {
    format!("<p>{}</p>", escape_html(text))
}

/// Map a terminal failure to its placeholder record.
pub fn placeholder(protocol: Protocol, failure: &FetchFailure) -> NormalizedEmail {
    let (subject, text, html) = describe(protocol, failure);
    NormalizedEmail {
        id: EmailId::Text(format!("{}-{}", protocol.slug(), failure.slug())),
        subject,
        from: SYSTEM_SENDER.to_string(),
        to: None,
        date: Utc::now(),
        text,
        html,
    }
}

/// In-batch entry for a single message whose MIME content could not be parsed.
pub fn parse_error_entry(msg_no: u32) -> NormalizedEmail {
    NormalizedEmail {
        id: EmailId::Number(msg_no),
        subject: "Parsing Error".to_string(),
        from: SYSTEM_SENDER.to_string(),
        to: None,
        date: Utc::now(),
        text: "Message could not be parsed".to_string(),
        html: "<p>This message could not be properly parsed due to format incompatibilities.</p>"
            .to_string(),
    }
}
