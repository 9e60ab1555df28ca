#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;

use todo_sync::db::Database;
use todo_sync::feeds::{FeedIngestor, FeedStore};
use todo_sync::projects::ProjectStore;
use todo_sync::services::HttpFeedFetcher;
use todo_sync::todo::{NewTodo, Todo, TodoStore};

/// A fresh database in a temp file. Keep the file alive for the test.
pub async fn open_db() -> (NamedTempFile, Database) {
    let tmp = NamedTempFile::new().unwrap();
    let db = Database::open(tmp.path().to_str().unwrap()).await.unwrap();
    (tmp, db)
}

pub fn db_path(tmp: &NamedTempFile) -> String {
    tmp.path().to_str().unwrap().to_string()
}

pub fn ingestor(db: &Database) -> Arc<FeedIngestor> {
    let fetcher = HttpFeedFetcher::new(Duration::from_secs(5), None).unwrap();
    Arc::new(FeedIngestor::new(
        FeedStore::new(db.clone()),
        TodoStore::new(db.clone()),
        Arc::new(fetcher),
    ))
}

pub async fn project(db: &Database, title: &str) -> i32 {
    ProjectStore::new(db.clone()).create(title).await.unwrap().id
}

pub async fn todo(store: &TodoStore, project_id: i32, title: &str) -> Todo {
    store
        .create(NewTodo {
            title: title.to_string(),
            project_id,
            ..NewTodo::default()
        })
        .await
        .unwrap()
}
