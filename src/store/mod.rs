//! Persistence layer: libSQL-backed todo storage.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlTodoStore;
pub use traits::TodoStore;
