//! Email: IMAP/POP3 retrieval, SMTP sending and the HTTP routes exposing both.

pub mod header;
pub mod imap;
pub mod mime;
pub mod mock;
pub mod model;
pub mod net;
pub mod placeholder;
pub mod pop3;
pub mod routes;
pub mod service;
pub mod smtp;

/// Hard cap on messages retrieved per fetch, whatever the caller asks for.
pub const MAX_BATCH: u32 = 20;

pub use model::{EmailId, NormalizedEmail};
pub use placeholder::{FetchFailure, FetchOutcome, Protocol};
pub use service::MailService;
pub use smtp::{MailSender, OutgoingEmail, SendOutcome, SmtpMailer};
