//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default IMAP connect + authenticate budget.
pub const DEFAULT_IMAP_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
/// Default POP3 connect + login budget.
pub const DEFAULT_POP3_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Delay before the mock POP3 strategy answers.
pub const DEFAULT_MOCK_DELAY: Duration = Duration::from_millis(500);

/// Mailbox login credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Connection settings for one retrieval protocol (IMAP or POP3).
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS on connect.
    pub tls: bool,
    /// Verify the server certificate chain. Only disable for self-signed test servers.
    pub verify_certificates: bool,
    /// `None` when `EMAIL_USER` or `EMAIL_PASS` is missing or empty.
    pub credentials: Option<Credentials>,
    /// Budget for connect + greeting + authentication.
    pub connect_timeout: Duration,
}

/// Which implementation backs POP3 fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pop3Strategy {
    /// Talk to the configured server.
    Live,
    /// Return canned informational messages (provider blocks POP3).
    Mock,
}

/// Outbound SMTP settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS when true, STARTTLS otherwise.
    pub secure: bool,
    pub credentials: Option<Credentials>,
}

/// All mail settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub imap: MailboxConfig,
    pub pop3: MailboxConfig,
    pub pop3_strategy: Pop3Strategy,
    pub mock_delay: Duration,
    pub smtp: SmtpConfig,
}

/// Process configuration. Loaded once at startup, immutable afterwards.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub mail: MailConfig,
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = parse_or(&lookup, "PORT", 5000u16)?;
        let db_path = lookup("TODO_DB_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/todos.db"));

        Ok(Self {
            port,
            db_path,
            mail: MailConfig::from_lookup(&lookup)?,
        })
    }
}

impl MailConfig {
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = credentials_from(lookup);

        let imap = MailboxConfig {
            host: lookup("IMAP_HOST").unwrap_or_else(|| "imap.gmail.com".to_string()),
            port: parse_or(lookup, "IMAP_PORT", 993u16)?,
            tls: flag_or(lookup, "IMAP_TLS", true),
            verify_certificates: !flag_or(lookup, "IMAP_TLS_SKIP_VERIFY", false),
            credentials: credentials.clone(),
            connect_timeout: secs_or(lookup, "IMAP_CONNECT_TIMEOUT_SECS", DEFAULT_IMAP_CONNECT_TIMEOUT)?,
        };

        let pop3 = MailboxConfig {
            host: lookup("POP3_HOST").unwrap_or_else(|| "pop.gmail.com".to_string()),
            port: parse_or(lookup, "POP3_PORT", 995u16)?,
            tls: flag_or(lookup, "POP3_TLS", true),
            verify_certificates: !flag_or(lookup, "POP3_TLS_SKIP_VERIFY", false),
            credentials: credentials.clone(),
            connect_timeout: secs_or(lookup, "POP3_CONNECT_TIMEOUT_SECS", DEFAULT_POP3_CONNECT_TIMEOUT)?,
        };

        let pop3_strategy = if flag_or(lookup, "USE_POP3_MOCK", false) {
            Pop3Strategy::Mock
        } else {
            Pop3Strategy::Live
        };

        let smtp = SmtpConfig {
            host: lookup("SMTP_HOST").unwrap_or_else(|| "smtp.gmail.com".to_string()),
            port: parse_or(lookup, "SMTP_PORT", 587u16)?,
            secure: flag_or(lookup, "SMTP_SECURE", false),
            credentials,
        };

        Ok(Self {
            imap,
            pop3,
            pop3_strategy,
            mock_delay: DEFAULT_MOCK_DELAY,
            smtp,
        })
    }
}

fn credentials_from<F>(lookup: &F) -> Option<Credentials>
where
    F: Fn(&str) -> Option<String>,
{
    let user = lookup("EMAIL_USER").filter(|s| !s.is_empty())?;
    let password = lookup("EMAIL_PASS").filter(|s| !s.is_empty())?;
    Some(Credentials::new(user, password))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key).filter(|s| !s.trim().is_empty()) else {
        return Ok(default);
    };
    let value = raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}

/// Boolean flags: only `"true"` (any case) or `"1"` enable; unset keeps the default.
fn flag_or<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) if !v.trim().is_empty() => {
            let v = v.trim();
            v.eq_ignore_ascii_case("true") || v == "1"
        }
        _ => default,
    }
}
