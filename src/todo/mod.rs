//! Todo lifecycle: create, update (including completion and recurrence),
//! delete and reorder.
//!
//! A todo is either active or completed, and each state of each project is a
//! separate [`Scope`]. Whenever a todo changes scope it is placed at the top of
//! its destination scope; its old position means nothing there.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::Serialize;

use crate::db::schema::todos;
use crate::db::{from_timestamp, now_ts, to_timestamp, Database};
use crate::error::{Result, TodoSyncError};
use crate::positions::{self, Scope};
use crate::projects::load_project;
use crate::recurrence::{self, Recurrence};

#[derive(Debug, Clone, Serialize)]
pub struct Todo {
    pub id: i32,
    pub project_id: i32,
    pub title: String,
    pub completed: bool,
    pub position: i32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub recurrence_interval: Option<i32>,
    pub recurrence_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_uid: Option<String>,
}

impl Todo {
    pub fn scope(&self) -> Scope {
        Scope::Todos {
            project_id: self.project_id,
            completed: self.completed,
        }
    }
}

#[derive(Queryable)]
struct TodoRow {
    id: i32,
    project_id: i32,
    title: String,
    completed: bool,
    position: i32,
    created_at: i64,
    completed_at: Option<i64>,
    due_at: Option<i64>,
    recurrence_interval: Option<i32>,
    recurrence_unit: Option<String>,
    external_uid: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = todos)]
struct NewTodoRow<'a> {
    project_id: i32,
    title: &'a str,
    completed: bool,
    position: i32,
    created_at: i64,
    completed_at: Option<i64>,
    due_at: Option<i64>,
    recurrence_interval: Option<i32>,
    recurrence_unit: Option<&'a str>,
    external_uid: Option<&'a str>,
}

/// A manually created todo.
#[derive(Debug, Clone, Default)]
pub struct NewTodo {
    pub title: String,
    pub project_id: i32,
    /// RFC 3339; an empty string means no due date.
    pub due_date: Option<String>,
    pub recurrence: Option<Recurrence>,
}

/// Field changes for [`TodoStore::update`]. `None` leaves a field untouched;
/// `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default)]
pub struct TodoPatch {
    pub title: Option<String>,
    pub completed: Option<bool>,
    pub due_date: Option<Option<String>>,
    pub recurrence: Option<Option<Recurrence>>,
    pub project_id: Option<i32>,
    pub position: Option<i32>,
}

/// A todo created from a calendar feed event.
#[derive(Debug, Clone)]
pub struct ImportedTodo<'a> {
    pub project_id: i32,
    pub title: &'a str,
    pub due_date: Option<DateTime<Utc>>,
    pub external_uid: &'a str,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TodoUpdate {
    pub todo: Todo,
    /// Generated when a repeating todo was completed.
    pub next_occurrence: Option<Todo>,
}

#[derive(Clone)]
pub struct TodoStore {
    db: Database,
}

impl TodoStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Todos ordered by project, then active before completed, then position.
    pub async fn list(&self, project_id: Option<i32>) -> Result<Vec<Todo>> {
        self.db
            .read(move |conn| {
                let mut query = todos::table.into_boxed();
                if let Some(project_id) = project_id {
                    query = query.filter(todos::project_id.eq(project_id));
                }
                let rows: Vec<TodoRow> = query
                    .order((
                        todos::project_id.asc(),
                        todos::completed.asc(),
                        todos::position.asc(),
                        todos::id.asc(),
                    ))
                    .load(conn)?;
                Ok(rows.into_iter().map(map_row).collect())
            })
            .await
    }

    pub async fn get(&self, id: i32) -> Result<Todo> {
        self.db.read(move |conn| load_todo(conn, id)).await
    }

    /// Insert a new active todo at the top of its project's active list.
    pub async fn create(&self, new: NewTodo) -> Result<Todo> {
        let title = validate_title(&new.title)?;
        let due_at = match new.due_date.as_deref() {
            Some(value) => parse_due_date(value)?.map(to_timestamp),
            None => None,
        };
        let recurrence = new.recurrence;
        let project_id = new.project_id;

        self.db
            .write(move |conn| {
                load_project(conn, project_id)?;
                let position = positions::insert_at_top(conn, Scope::active(project_id))?;
                let id = insert_todo(
                    conn,
                    &NewTodoRow {
                        project_id,
                        title: &title,
                        completed: false,
                        position,
                        created_at: now_ts(),
                        completed_at: None,
                        due_at,
                        recurrence_interval: recurrence.map(|r| r.stored_interval()),
                        recurrence_unit: recurrence.map(|r| r.unit().as_str()),
                        external_uid: None,
                    },
                )?;
                load_todo(conn, id)
            })
            .await
    }

    /// Apply `patch` to todo `id`.
    ///
    /// Completing a repeating todo also creates its next occurrence. Both
    /// writes share one transaction, so if the next occurrence cannot be
    /// stored the todo stays active.
    pub async fn update(&self, id: i32, patch: TodoPatch) -> Result<TodoUpdate> {
        let title = patch.title.as_deref().map(validate_title).transpose()?;
        let due_date = match patch.due_date {
            Some(Some(value)) => Some(parse_due_date(&value)?),
            Some(None) => Some(None),
            None => None,
        };
        let recurrence = patch.recurrence;
        let completed = patch.completed;
        let target_project = patch.project_id;
        let explicit_position = patch.position;

        self.db
            .write(move |conn| {
                let current = load_todo_row(conn, id)?;

                let project_id = target_project.unwrap_or(current.project_id);
                let moved = project_id != current.project_id;
                if moved {
                    load_project(conn, project_id)?;
                }

                let completed = completed.unwrap_or(current.completed);
                let completing = completed && !current.completed;
                let reopening = !completed && current.completed;

                let title = title.unwrap_or(current.title);
                let due_at = match due_date {
                    Some(value) => value.map(to_timestamp),
                    None => current.due_at,
                };
                let (recurrence_interval, recurrence_unit) = match recurrence {
                    Some(Some(rule)) => (
                        Some(rule.stored_interval()),
                        Some(rule.unit().as_str().to_string()),
                    ),
                    Some(None) => (None, None),
                    None => (current.recurrence_interval, current.recurrence_unit),
                };

                let now = Utc::now();
                let position = if completing || reopening || moved {
                    let destination = Scope::Todos {
                        project_id,
                        completed,
                    };
                    positions::insert_at_top(conn, destination)?
                } else {
                    explicit_position.unwrap_or(current.position)
                };
                let completed_at = if completing {
                    Some(to_timestamp(now))
                } else if reopening {
                    None
                } else {
                    current.completed_at
                };

                diesel::update(todos::table.filter(todos::id.eq(id)))
                    .set((
                        todos::title.eq(&title),
                        todos::completed.eq(completed),
                        todos::project_id.eq(project_id),
                        todos::position.eq(position),
                        todos::completed_at.eq(completed_at),
                        todos::due_at.eq(due_at),
                        todos::recurrence_interval.eq(recurrence_interval),
                        todos::recurrence_unit.eq(recurrence_unit.as_deref()),
                    ))
                    .execute(conn)?;

                let mut next_occurrence = None;
                if completing {
                    if let (Some(interval), Some(unit)) =
                        (recurrence_interval, recurrence_unit.as_deref())
                    {
                        let base_due = due_at.map(from_timestamp).unwrap_or(now);
                        let next_due = u32::try_from(interval)
                            .ok()
                            .and_then(|interval| recurrence::next_due(base_due, interval, unit));
                        match next_due {
                            Some(next_due) => {
                                let position =
                                    positions::insert_at_top(conn, Scope::active(project_id))?;
                                let next_id = insert_todo(
                                    conn,
                                    &NewTodoRow {
                                        project_id,
                                        title: &title,
                                        completed: false,
                                        position,
                                        created_at: to_timestamp(now),
                                        completed_at: None,
                                        due_at: Some(to_timestamp(next_due)),
                                        recurrence_interval: Some(interval),
                                        recurrence_unit: Some(unit),
                                        external_uid: None,
                                    },
                                )?;
                                next_occurrence = Some(load_todo(conn, next_id)?);
                            }
                            None => {
                                tracing::debug!(
                                    todo_id = id,
                                    interval,
                                    unit,
                                    "recurrence not understood, no next occurrence"
                                );
                            }
                        }
                    }
                }

                let todo = load_todo(conn, id)?;
                Ok(TodoUpdate {
                    todo,
                    next_occurrence,
                })
            })
            .await
    }

    pub async fn set_completed(&self, id: i32, completed: bool) -> Result<TodoUpdate> {
        self.update(
            id,
            TodoPatch {
                completed: Some(completed),
                ..TodoPatch::default()
            },
        )
        .await
    }

    pub async fn delete(&self, id: i32) -> Result<bool> {
        self.db
            .write(move |conn| {
                let count = diesel::delete(todos::table.filter(todos::id.eq(id))).execute(conn)?;
                Ok(count > 0)
            })
            .await
    }

    /// Reorder one scope. The scope is taken from the listed todos, and the
    /// list must contain every todo of that scope exactly once.
    pub async fn reorder(&self, ordered_ids: &[i32]) -> Result<()> {
        let Some(&first) = ordered_ids.first() else {
            return Err(TodoSyncError::Validation(
                "reorder payload must not be empty".to_string(),
            ));
        };
        let ordered_ids = ordered_ids.to_vec();

        self.db
            .write(move |conn| {
                let scope = load_todo(conn, first)?.scope();
                positions::set_explicit_order(conn, scope, &ordered_ids)
            })
            .await
    }

    pub async fn external_uid_exists(&self, external_uid: &str) -> Result<bool> {
        let external_uid = external_uid.to_string();
        self.db
            .read(move |conn| {
                let found: Option<i32> = todos::table
                    .filter(todos::external_uid.eq(&external_uid))
                    .select(todos::id)
                    .first(conn)
                    .optional()?;
                Ok(found.is_some())
            })
            .await
    }

    /// First position below the current active list of `project_id`.
    pub async fn bottom_position(&self, project_id: i32) -> Result<i32> {
        self.db
            .read(move |conn| positions::next_at_bottom(conn, Scope::active(project_id)))
            .await
    }

    /// Store a feed event as an active todo at the given position.
    pub async fn create_imported(&self, imported: ImportedTodo<'_>) -> Result<Todo> {
        let title = imported.title.to_string();
        let external_uid = imported.external_uid.to_string();
        let ImportedTodo {
            project_id,
            due_date,
            position,
            ..
        } = imported;

        self.db
            .write(move |conn| {
                let id = insert_todo(
                    conn,
                    &NewTodoRow {
                        project_id,
                        title: &title,
                        completed: false,
                        position,
                        created_at: now_ts(),
                        completed_at: None,
                        due_at: due_date.map(to_timestamp),
                        recurrence_interval: None,
                        recurrence_unit: None,
                        external_uid: Some(&external_uid),
                    },
                )?;
                load_todo(conn, id)
            })
            .await
    }
}

/// Parse an RFC 3339 due date and normalize it to UTC. Blank input means none.
pub fn parse_due_date(value: &str) -> Result<Option<DateTime<Utc>>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| Some(parsed.with_timezone(&Utc)))
        .map_err(|_| {
            TodoSyncError::Validation(format!(
                "invalid due date '{value}', expected RFC 3339 (e.g. 2023-01-02T15:04:05Z)"
            ))
        })
}

fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(TodoSyncError::Validation(
            "todo title must not be empty".to_string(),
        ));
    }
    Ok(title.to_string())
}

fn insert_todo(conn: &mut SqliteConnection, row: &NewTodoRow<'_>) -> Result<i32> {
    diesel::insert_into(todos::table).values(row).execute(conn)?;
    let id = todos::table
        .select(todos::id)
        .order(todos::id.desc())
        .first::<i32>(conn)?;
    Ok(id)
}

fn load_todo_row(conn: &mut SqliteConnection, id: i32) -> Result<TodoRow> {
    let row: Option<TodoRow> = todos::table
        .filter(todos::id.eq(id))
        .first(conn)
        .optional()?;
    row.ok_or_else(|| TodoSyncError::NotFound(format!("todo {id}")))
}

fn load_todo(conn: &mut SqliteConnection, id: i32) -> Result<Todo> {
    load_todo_row(conn, id).map(map_row)
}

fn map_row(row: TodoRow) -> Todo {
    Todo {
        id: row.id,
        project_id: row.project_id,
        title: row.title,
        completed: row.completed,
        position: row.position,
        created_at: from_timestamp(row.created_at),
        completed_at: row.completed_at.map(from_timestamp),
        due_date: row.due_at.map(from_timestamp),
        recurrence_interval: row.recurrence_interval,
        recurrence_unit: row.recurrence_unit,
        external_uid: row.external_uid,
    }
}
