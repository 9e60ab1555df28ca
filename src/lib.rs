pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod feeds;
pub mod interfaces;
pub mod positions;
pub mod projects;
pub mod recurrence;
pub mod scheduler;
pub mod services;
pub mod todo;

pub use crate::config::Config;
pub use crate::db::Database;
pub use crate::error::{Result, TodoSyncError};
pub use crate::feeds::{FeedIngestor, FeedStore, FeedSubscription, SyncReport};
pub use crate::projects::{Project, ProjectStore};
pub use crate::recurrence::{next_due, Recurrence, RecurrenceUnit};
pub use crate::todo::{NewTodo, Todo, TodoPatch, TodoStore, TodoUpdate};
