//! libSQL backend for [`TodoStore`]. Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::TodoStore;
use crate::todos::model::Todo;

const TODO_COLUMNS: &str = "id, title, description, completed, created_at";

/// libSQL todo store.
///
/// Holds a single connection reused for all operations.
pub struct LibSqlTodoStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlTodoStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;
        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

/// Parse an RFC 3339 or SQLite datetime string.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn row_to_todo(row: &libsql::Row) -> Result<Todo, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("todo.id: {e}")))?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Query(format!("todo.id parse: {e}")))?;
    let title: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("todo.title: {e}")))?;
    let description: String = row.get(2).unwrap_or_default();
    let completed: i64 = row.get(3).unwrap_or(0);
    let created_at: String = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("todo.created_at: {e}")))?;

    Ok(Todo {
        id,
        title,
        description,
        completed: completed != 0,
        created_at: parse_datetime(&created_at),
    })
}

#[async_trait]
impl TodoStore for LibSqlTodoStore {
    async fn create_todo(&self, todo: &Todo) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO todos (id, title, description, completed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    todo.id.to_string(),
                    todo.title.as_str(),
                    todo.description.as_str(),
                    todo.completed as i64,
                    todo.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_todo: {e}")))?;
        debug!(id = %todo.id, "Todo inserted");
        Ok(())
    }

    async fn get_todo(&self, id: Uuid) -> Result<Option<Todo>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {TODO_COLUMNS} FROM todos WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_todo: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_todo(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_todo row: {e}"))),
        }
    }

    async fn list_todos(&self) -> Result<Vec<Todo>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {TODO_COLUMNS} FROM todos ORDER BY created_at DESC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_todos: {e}")))?;

        let mut todos = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_todos row: {e}")))?
        {
            todos.push(row_to_todo(&row)?);
        }
        Ok(todos)
    }

    async fn update_todo(&self, todo: &Todo) -> Result<(), DatabaseError> {
        let changed = self
            .conn
            .execute(
                "UPDATE todos SET title = ?2, description = ?3, completed = ?4 WHERE id = ?1",
                params![
                    todo.id.to_string(),
                    todo.title.as_str(),
                    todo.description.as_str(),
                    todo.completed as i64
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_todo: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "todo".into(),
                id: todo.id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_todo(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let changed = self
            .conn
            .execute("DELETE FROM todos WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_todo: {e}")))?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[tokio::test]
    async fn crud_round_trip() {
        let store = LibSqlTodoStore::new_memory().await.unwrap();
        let todo = Todo::new("Buy milk").with_description("2 litres");
        store.create_todo(&todo).await.unwrap();

        let loaded = store.get_todo(todo.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Buy milk");
        assert_eq!(loaded.description, "2 litres");
        assert!(!loaded.completed);

        let mut updated = loaded.clone();
        updated.completed = true;
        store.update_todo(&updated).await.unwrap();
        assert!(store.get_todo(todo.id).await.unwrap().unwrap().completed);

        assert!(store.delete_todo(todo.id).await.unwrap());
        assert!(store.get_todo(todo.id).await.unwrap().is_none());
        assert!(!store.delete_todo(todo.id).await.unwrap());
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = LibSqlTodoStore::new_memory().await.unwrap();
        let mut older = Todo::new("older");
        older.created_at = Utc::now() - Duration::hours(2);
        let newer = Todo::new("newer");
        store.create_todo(&older).await.unwrap();
        store.create_todo(&newer).await.unwrap();

        let titles: Vec<String> = store
            .list_todos()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["newer", "older"]);
    }

    #[tokio::test]
    async fn update_missing_todo_is_not_found() {
        let store = LibSqlTodoStore::new_memory().await.unwrap();
        let ghost = Todo::new("ghost");
        assert!(matches!(
            store.update_todo(&ghost).await,
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn local_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("todos.db");
        let todo = Todo::new("persisted");
        {
            let store = LibSqlTodoStore::new_local(&path).await.unwrap();
            store.create_todo(&todo).await.unwrap();
        }
        let store = LibSqlTodoStore::new_local(&path).await.unwrap();
        assert_eq!(store.get_todo(todo.id).await.unwrap().unwrap().title, "persisted");
    }
}
