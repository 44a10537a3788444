//! The `TodoStore` trait: async persistence interface for todos.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::todos::model::Todo;

#[async_trait]
pub trait TodoStore: Send + Sync {
    async fn create_todo(&self, todo: &Todo) -> Result<(), DatabaseError>;

    async fn get_todo(&self, id: Uuid) -> Result<Option<Todo>, DatabaseError>;

    /// All todos, newest first.
    async fn list_todos(&self) -> Result<Vec<Todo>, DatabaseError>;

    /// Overwrite an existing todo. `NotFound` if it does not exist.
    async fn update_todo(&self, todo: &Todo) -> Result<(), DatabaseError>;

    /// Returns whether a row was deleted.
    async fn delete_todo(&self, id: Uuid) -> Result<bool, DatabaseError>;
}
