use std::sync::Arc;

use taskmail::config::{AppConfig, Pop3Strategy};
use taskmail::error::Result;
use taskmail::mail::{MailService, SmtpMailer};
use taskmail::server::{AppState, router};
use taskmail::store::{LibSqlTodoStore, TodoStore};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;

    eprintln!("📋 Taskmail v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api/todos", config.port);
    eprintln!("   WS:  ws://0.0.0.0:{}/ws", config.port);
    eprintln!(
        "   IMAP: {}:{} (tls: {})",
        config.mail.imap.host, config.mail.imap.port, config.mail.imap.tls
    );
    match config.mail.pop3_strategy {
        Pop3Strategy::Mock => eprintln!("   POP3: mock"),
        Pop3Strategy::Live => eprintln!(
            "   POP3: {}:{} (tls: {})",
            config.mail.pop3.host, config.mail.pop3.port, config.mail.pop3.tls
        ),
    }
    if config.mail.imap.credentials.is_none() {
        eprintln!("   Warning: EMAIL_USER / EMAIL_PASS not set, inbox fetches will return setup hints");
    }

    // ── Database ─────────────────────────────────────────────────────────
    let todos: Arc<dyn TodoStore> = Arc::new(LibSqlTodoStore::new_local(&config.db_path).await?);
    eprintln!("   Database: {}\n", config.db_path.display());

    // ── Mail ─────────────────────────────────────────────────────────────
    let sender = Arc::new(SmtpMailer::new(config.mail.smtp.clone()));
    let mail = MailService::new(config.mail.clone());

    let state = AppState::new(todos, mail, sender);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Server started");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
