use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::Serialize;

use crate::db::schema::{feed_subscriptions, projects, todos};
use crate::db::{from_timestamp, now_ts, Database};
use crate::error::{Result, TodoSyncError};
use crate::positions::{self, Scope};

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: i32,
    pub title: String,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable)]
struct ProjectRow {
    id: i32,
    title: String,
    position: i32,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = projects)]
struct NewProject<'a> {
    title: &'a str,
    position: i32,
    created_at: i64,
}

#[derive(Clone)]
pub struct ProjectStore {
    db: Database,
}

impl ProjectStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn list(&self) -> Result<Vec<Project>> {
        self.db
            .read(|conn| {
                let rows: Vec<ProjectRow> = projects::table
                    .order((projects::position.asc(), projects::id.asc()))
                    .load(conn)?;
                Ok(rows.into_iter().map(map_row).collect())
            })
            .await
    }

    pub async fn get(&self, id: i32) -> Result<Project> {
        self.db.read(move |conn| load_project(conn, id)).await
    }

    /// Append a project at the bottom of the project list.
    pub async fn create(&self, title: &str) -> Result<Project> {
        let title = validate_title(title)?;
        self.db
            .write(move |conn| {
                let id = insert_project(conn, &title)?;
                load_project(conn, id)
            })
            .await
    }

    pub async fn rename(&self, id: i32, title: &str) -> Result<Project> {
        let title = validate_title(title)?;
        self.db
            .write(move |conn| {
                let count = diesel::update(projects::table.filter(projects::id.eq(id)))
                    .set(projects::title.eq(&title))
                    .execute(conn)?;
                if count == 0 {
                    return Err(project_not_found(id));
                }
                load_project(conn, id)
            })
            .await
    }

    /// Remove a project together with its todos and feed subscriptions.
    pub async fn delete(&self, id: i32) -> Result<()> {
        self.db
            .write(move |conn| delete_project_cascade(conn, id))
            .await
    }

    pub async fn reorder(&self, ordered_ids: &[i32]) -> Result<()> {
        let ordered_ids = ordered_ids.to_vec();
        self.db
            .write(move |conn| positions::set_explicit_order(conn, Scope::Projects, &ordered_ids))
            .await
    }
}

fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(TodoSyncError::Validation(
            "project title must not be empty".to_string(),
        ));
    }
    Ok(title.to_string())
}

fn project_not_found(id: i32) -> TodoSyncError {
    TodoSyncError::NotFound(format!("project {id}"))
}

pub(crate) fn load_project(conn: &mut SqliteConnection, id: i32) -> Result<Project> {
    let row: Option<ProjectRow> = projects::table
        .filter(projects::id.eq(id))
        .first(conn)
        .optional()?;
    row.map(map_row).ok_or_else(|| project_not_found(id))
}

pub(crate) fn insert_project(conn: &mut SqliteConnection, title: &str) -> Result<i32> {
    let position = positions::next_at_bottom(conn, Scope::Projects)?;
    diesel::insert_into(projects::table)
        .values(&NewProject {
            title,
            position,
            created_at: now_ts(),
        })
        .execute(conn)?;
    let id = projects::table
        .select(projects::id)
        .order(projects::id.desc())
        .first::<i32>(conn)?;
    Ok(id)
}

/// Existing project with exactly this title, or a new one at the bottom of the list.
pub(crate) fn find_or_create(conn: &mut SqliteConnection, title: &str) -> Result<i32> {
    let existing: Option<i32> = projects::table
        .filter(projects::title.eq(title))
        .select(projects::id)
        .order(projects::id.asc())
        .first(conn)
        .optional()?;
    match existing {
        Some(id) => Ok(id),
        None => insert_project(conn, title),
    }
}

pub(crate) fn delete_project_cascade(conn: &mut SqliteConnection, id: i32) -> Result<()> {
    diesel::delete(todos::table.filter(todos::project_id.eq(id))).execute(conn)?;
    diesel::delete(feed_subscriptions::table.filter(feed_subscriptions::project_id.eq(id)))
        .execute(conn)?;
    let count = diesel::delete(projects::table.filter(projects::id.eq(id))).execute(conn)?;
    if count == 0 {
        return Err(project_not_found(id));
    }
    Ok(())
}

fn map_row(row: ProjectRow) -> Project {
    Project {
        id: row.id,
        title: row.title,
        position: row.position,
        created_at: from_timestamp(row.created_at),
    }
}
