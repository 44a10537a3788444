//! The fetch surface exposed to the rest of the app.
//!
//! Every method returns a non-empty list and never fails: protocol errors
//! become placeholder records, and a panic inside a run becomes the
//! critical-failure placeholder.

use std::future::Future;
use std::sync::Arc;

use tracing::{error, info};

use super::imap::{self, ImapConnector, TcpImapConnector};
use super::mime::{MailParserMime, MimeParser};
use super::mock;
use super::model::NormalizedEmail;
use super::placeholder::{FetchFailure, FetchOutcome, Protocol};
use super::pop3::{self, Pop3Connector, TcpPop3Connector};
use crate::config::{MailConfig, Pop3Strategy};

#[derive(Clone)]
pub struct MailService {
    config: Arc<MailConfig>,
    imap: Arc<dyn ImapConnector>,
    pop3: Arc<dyn Pop3Connector>,
    parser: Arc<dyn MimeParser>,
}

impl MailService {
    /// Service talking to the configured servers.
    pub fn new(config: MailConfig) -> Self {
        Self::with_backends(
            config,
            Arc::new(TcpImapConnector),
            Arc::new(TcpPop3Connector),
            Arc::new(MailParserMime),
        )
    }

    /// Service over explicit connectors and parser.
    pub fn with_backends(
        config: MailConfig,
        imap: Arc<dyn ImapConnector>,
        pop3: Arc<dyn Pop3Connector>,
        parser: Arc<dyn MimeParser>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            imap,
            pop3,
            parser,
        }
    }

    /// Newest `min(limit, 20)` INBOX messages over IMAP, newest first.
    pub async fn fetch_imap(&self, limit: u32) -> Vec<NormalizedEmail> {
        let config = Arc::clone(&self.config);
        let connector = Arc::clone(&self.imap);
        run(Protocol::Imap, async move {
            imap::fetch_imap(connector.as_ref(), &config.imap, limit).await
        })
        .await
    }

    /// Newest `min(limit, 20)` messages over POP3, or the mock set when
    /// the mock strategy is configured.
    pub async fn fetch_pop3(&self, limit: u32) -> Vec<NormalizedEmail> {
        if self.config.pop3_strategy == Pop3Strategy::Mock {
            return self.fetch_mock().await;
        }
        let config = Arc::clone(&self.config);
        let connector = Arc::clone(&self.pop3);
        let parser = Arc::clone(&self.parser);
        run(Protocol::Pop3, async move {
            pop3::fetch_pop3(connector.as_ref(), parser.as_ref(), &config.pop3, limit).await
        })
        .await
    }

    /// The canned POP3 messages.
    pub async fn fetch_mock(&self) -> Vec<NormalizedEmail> {
        mock::mock_emails(self.config.mock_delay).await
    }
}

/// Run one fetch on its own task and collapse the outcome.
async fn run<F>(protocol: Protocol, fetch: F) -> Vec<NormalizedEmail>
where
    F: Future<Output = FetchOutcome> + Send + 'static,
{
    let outcome = match tokio::spawn(fetch).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(protocol = %protocol, error = %e, "Fetch task failed");
            FetchOutcome::Failed(FetchFailure::CriticalFailure(panic_message(e)))
        }
    };

    let emails = outcome.into_emails(protocol);
    info!(
        protocol = %protocol,
        count = emails.len(),
        placeholder = emails.len() == 1 && emails[0].is_placeholder(),
        "Fetch finished"
    );
    emails
}

fn panic_message(e: tokio::task::JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown error".to_string()
    }
}
