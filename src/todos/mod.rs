//! Todos: model, REST routes and the WebSocket event feed.

pub mod model;
pub mod routes;
pub mod ws;

pub use model::{Todo, TodoEvent};
