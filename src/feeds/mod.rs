//! Calendar feed subscriptions and their import into todos.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sqlite::SqliteConnection;
use serde::Serialize;

use crate::db::schema::{feed_subscriptions, projects};
use crate::db::{from_timestamp, now_ts, to_timestamp, Database};
use crate::error::{Result, TodoSyncError};
use crate::projects::{delete_project_cascade, find_or_create};

pub mod ics;
pub mod ingest;

pub use ingest::{FeedIngestor, FeedRefreshJob, SubscriptionSync, SyncReport};

#[derive(Debug, Clone, Serialize)]
pub struct FeedSubscription {
    pub id: i32,
    pub url: String,
    pub project_id: i32,
    pub project_name: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable)]
struct SubscriptionRow {
    id: i32,
    url: String,
    project_id: i32,
    project_name: String,
    last_synced_at: Option<i64>,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = feed_subscriptions)]
struct NewSubscription<'a> {
    url: &'a str,
    project_id: i32,
    last_synced_at: Option<i64>,
    created_at: i64,
}

#[derive(Clone)]
pub struct FeedStore {
    db: Database,
}

impl FeedStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Subscribe to `url`, importing into the project titled `project_name`
    /// (created at the bottom of the project list if missing).
    pub async fn subscribe(&self, url: &str, project_name: &str) -> Result<FeedSubscription> {
        let url = validate_feed_url(url)?;
        let project_name = project_name.trim().to_string();
        if project_name.is_empty() {
            return Err(TodoSyncError::Validation(
                "project name must not be empty".to_string(),
            ));
        }

        self.db
            .write(move |conn| {
                let existing: Option<i32> = feed_subscriptions::table
                    .filter(feed_subscriptions::url.eq(&url))
                    .select(feed_subscriptions::id)
                    .first(conn)
                    .optional()?;
                if existing.is_some() {
                    return Err(already_subscribed(&url));
                }

                let project_id = find_or_create(conn, &project_name)?;
                diesel::insert_into(feed_subscriptions::table)
                    .values(&NewSubscription {
                        url: &url,
                        project_id,
                        last_synced_at: None,
                        created_at: now_ts(),
                    })
                    .execute(conn)
                    .map_err(|err| match err {
                        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                            already_subscribed(&url)
                        }
                        other => TodoSyncError::Database(other),
                    })?;
                let id = feed_subscriptions::table
                    .select(feed_subscriptions::id)
                    .order(feed_subscriptions::id.desc())
                    .first::<i32>(conn)?;
                load_subscription(conn, id)
            })
            .await
    }

    pub async fn list(&self) -> Result<Vec<FeedSubscription>> {
        self.db
            .read(|conn| {
                let rows: Vec<SubscriptionRow> = feed_subscriptions::table
                    .inner_join(projects::table)
                    .select((
                        feed_subscriptions::id,
                        feed_subscriptions::url,
                        feed_subscriptions::project_id,
                        projects::title,
                        feed_subscriptions::last_synced_at,
                        feed_subscriptions::created_at,
                    ))
                    .order(feed_subscriptions::id.asc())
                    .load(conn)?;
                Ok(rows.into_iter().map(map_row).collect())
            })
            .await
    }

    pub async fn get(&self, id: i32) -> Result<FeedSubscription> {
        self.db.read(move |conn| load_subscription(conn, id)).await
    }

    /// Drop the subscription together with its project and the project's todos.
    pub async fn cancel(&self, id: i32) -> Result<()> {
        self.db
            .write(move |conn| {
                let subscription = load_subscription(conn, id)?;
                diesel::delete(feed_subscriptions::table.filter(feed_subscriptions::id.eq(id)))
                    .execute(conn)?;
                delete_project_cascade(conn, subscription.project_id)
            })
            .await
    }

    pub async fn mark_synced(&self, id: i32, at: DateTime<Utc>) -> Result<()> {
        let synced_at = to_timestamp(at);
        self.db
            .write(move |conn| {
                diesel::update(feed_subscriptions::table.filter(feed_subscriptions::id.eq(id)))
                    .set(feed_subscriptions::last_synced_at.eq(Some(synced_at)))
                    .execute(conn)?;
                Ok(())
            })
            .await
    }
}

fn already_subscribed(url: &str) -> TodoSyncError {
    TodoSyncError::Conflict(format!("already subscribed to {url}"))
}

/// Trimmed feed URL; must be absolute http, https or webcal.
pub fn validate_feed_url(url: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(TodoSyncError::Validation("feed url is required".to_string()));
    }
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| TodoSyncError::Validation(format!("invalid feed url '{url}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" | "webcal" => Ok(url.to_string()),
        other => Err(TodoSyncError::Validation(format!(
            "unsupported feed url scheme '{other}'"
        ))),
    }
}

fn load_subscription(conn: &mut SqliteConnection, id: i32) -> Result<FeedSubscription> {
    let row: Option<SubscriptionRow> = feed_subscriptions::table
        .inner_join(projects::table)
        .filter(feed_subscriptions::id.eq(id))
        .select((
            feed_subscriptions::id,
            feed_subscriptions::url,
            feed_subscriptions::project_id,
            projects::title,
            feed_subscriptions::last_synced_at,
            feed_subscriptions::created_at,
        ))
        .first(conn)
        .optional()?;
    row.map(map_row)
        .ok_or_else(|| TodoSyncError::NotFound(format!("subscription {id}")))
}

fn map_row(row: SubscriptionRow) -> FeedSubscription {
    FeedSubscription {
        id: row.id,
        url: row.url,
        project_id: row.project_id,
        project_name: row.project_name,
        last_synced_at: row.last_synced_at.map(from_timestamp),
        created_at: from_timestamp(row.created_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_urls_are_validated() {
        assert_eq!(
            validate_feed_url("  https://example.com/cal.ics ").unwrap(),
            "https://example.com/cal.ics"
        );
        assert!(validate_feed_url("webcal://example.com/cal.ics").is_ok());
        assert!(validate_feed_url("").unwrap_err().is_client_error());
        assert!(validate_feed_url("not a url").is_err());
        assert!(validate_feed_url("ftp://example.com/cal.ics").is_err());
    }
}
