//! Canned POP3 results for providers that block POP3 access.

use std::time::Duration;

use chrono::{Duration as Days, Utc};
use tracing::info;

use super::model::NormalizedEmail;

/// Three informational messages, returned after `delay`.
pub async fn mock_emails(delay: Duration) -> Vec<NormalizedEmail> {
    info!("Using POP3 mock implementation instead of real client");
    tokio::time::sleep(delay).await;

    let now = Utc::now();
    vec![
        NormalizedEmail::new(
            1u32,
            Some("Welcome to Todo App".into()),
            Some("Todo System <system@todoapp.example>".into()),
            Some(now),
            Some(
                "Welcome to Todo App! This is a mock email since POP3 connection is currently unavailable.\n\n\
                 The POP3 protocol may be blocked by email providers or requires special security settings."
                    .into(),
            ),
            Some(
                "<h2>Welcome to Todo App!</h2><p>This is a mock email since POP3 connection is currently unavailable.</p>\
                 <p>The POP3 protocol may be blocked by email providers or requires special security settings.</p>"
                    .into(),
            ),
        ),
        NormalizedEmail::new(
            2u32,
            Some("Your Tasks for Today".into()),
            Some("Todo System <system@todoapp.example>".into()),
            Some(now - Days::days(1)),
            Some("You have several tasks to complete today. Check your todo list!".into()),
            Some(
                "<h2>Your Tasks for Today</h2><p>You have several tasks to complete today. Check your todo list!</p>"
                    .into(),
            ),
        ),
        NormalizedEmail::new(
            3u32,
            Some("POP3 Troubleshooting".into()),
            Some("Support <support@todoapp.example>".into()),
            Some(now - Days::days(2)),
            Some(
                "To enable actual POP3 connections, make sure you:\n\
                 1. Enable POP3 access in your Gmail settings\n\
                 2. Use an App Password if you have 2-factor authentication\n\
                 3. Allow less secure apps in your Google account\n\
                 4. Check that your network/firewall allows POP3 traffic"
                    .into(),
            ),
            Some(
                "<h2>POP3 Troubleshooting</h2><p>To enable actual POP3 connections, make sure you:</p><ol>\
                 <li>Enable POP3 access in your Gmail settings</li>\
                 <li>Use an App Password if you have 2-factor authentication</li>\
                 <li>Allow less secure apps in your Google account</li>\
                 <li>Check that your network/firewall allows POP3 traffic</li></ol>"
                    .into(),
            ),
        ),
    ]
}
