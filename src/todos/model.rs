//! Todo data model and the real-time event type.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: Uuid,
    /// Short title. Never blank.
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl Todo {
    /// Create a new, incomplete todo.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: String::new(),
            completed: false,
            // Stored with microsecond precision.
            created_at: Utc::now().trunc_subsecs(6),
        }
    }

    /// Builder: set description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder: set completion.
    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }
}

/// Body of `POST /api/todos`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTodo {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
}

impl NewTodo {
    /// Build the todo, or `None` when the title is missing or blank.
    pub fn into_todo(self) -> Option<Todo> {
        let title = self.title.filter(|t| !t.trim().is_empty())?;
        Some(
            Todo::new(title)
                .with_description(self.description.unwrap_or_default())
                .with_completed(self.completed.unwrap_or(false)),
        )
    }
}

/// Body of `PUT /api/todos/{id}`. Absent or empty strings leave a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TodoUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
}

impl TodoUpdate {
    pub fn apply(self, todo: &mut Todo) {
        if let Some(title) = self.title.filter(|t| !t.is_empty()) {
            todo.title = title;
        }
        if let Some(description) = self.description.filter(|d| !d.is_empty()) {
            todo.description = description;
        }
        if let Some(completed) = self.completed {
            todo.completed = completed;
        }
    }
}

/// Messages pushed to WebSocket clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TodoEvent {
    /// Sent once when a client connects.
    Connected { message: String },
    TodoCreated { todo: Todo },
    TodoUpdated { todo: Todo },
    TodoDeleted { id: Uuid },
}
