//! Taskmail: a todo service with IMAP/POP3 inbox retrieval and SMTP sharing.

pub mod config;
pub mod error;
pub mod mail;
pub mod server;
pub mod store;
pub mod todos;
