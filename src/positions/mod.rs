//! Ordering of projects and todos.
//!
//! Every ordered list lives in a [`Scope`]. Positions sort ascending (lowest
//! position displays first), need not be contiguous, and may go negative:
//! inserting at the top takes `min - 1` instead of renumbering the scope.
//!
//! The functions here take a bare connection and never open a transaction
//! themselves. Callers run them inside [`Database::write`](crate::db::Database::write)
//! so that multi-row changes commit or roll back as a unit.

use std::collections::HashSet;

use diesel::dsl::{max, min};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::db::schema::{projects, todos};
use crate::error::{Result, TodoSyncError};

/// An independently ordered list of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The list of all projects.
    Projects,
    /// One project's todos in one completion state.
    Todos { project_id: i32, completed: bool },
}

impl Scope {
    pub fn active(project_id: i32) -> Self {
        Self::Todos {
            project_id,
            completed: false,
        }
    }

    pub fn completed(project_id: i32) -> Self {
        Self::Todos {
            project_id,
            completed: true,
        }
    }
}

/// Add `amount` to every position in `scope`.
pub fn shift_down(conn: &mut SqliteConnection, scope: Scope, amount: i32) -> Result<usize> {
    let count = match scope {
        Scope::Projects => {
            diesel::update(projects::table)
                .set(projects::position.eq(projects::position + amount))
                .execute(conn)?
        }
        Scope::Todos {
            project_id,
            completed,
        } => {
            diesel::update(
                todos::table
                    .filter(todos::project_id.eq(project_id))
                    .filter(todos::completed.eq(completed)),
            )
            .set(todos::position.eq(todos::position + amount))
            .execute(conn)?
        }
    };
    Ok(count)
}

/// A position that sorts before everything currently in `scope`, or 0 when it is empty.
pub fn insert_at_top(conn: &mut SqliteConnection, scope: Scope) -> Result<i32> {
    let current_min: Option<i32> = match scope {
        Scope::Projects => {
            projects::table
                .select(min(projects::position))
                .first(conn)?
        }
        Scope::Todos {
            project_id,
            completed,
        } => {
            todos::table
                .filter(todos::project_id.eq(project_id))
                .filter(todos::completed.eq(completed))
                .select(min(todos::position))
                .first(conn)?
        }
    };
    Ok(current_min.map_or(0, |value| value - 1))
}

/// `COALESCE(MAX(position), 0) + 1` over `scope`.
pub fn next_at_bottom(conn: &mut SqliteConnection, scope: Scope) -> Result<i32> {
    let current_max: Option<i32> = match scope {
        Scope::Projects => {
            projects::table
                .select(max(projects::position))
                .first(conn)?
        }
        Scope::Todos {
            project_id,
            completed,
        } => {
            todos::table
                .filter(todos::project_id.eq(project_id))
                .filter(todos::completed.eq(completed))
                .select(max(todos::position))
                .first(conn)?
        }
    };
    Ok(current_max.unwrap_or(0) + 1)
}

/// Ids in `scope`, in display order.
pub fn ids_in_order(conn: &mut SqliteConnection, scope: Scope) -> Result<Vec<i32>> {
    let ids = match scope {
        Scope::Projects => {
            projects::table
                .select(projects::id)
                .order((projects::position.asc(), projects::id.asc()))
                .load::<i32>(conn)?
        }
        Scope::Todos {
            project_id,
            completed,
        } => {
            todos::table
                .filter(todos::project_id.eq(project_id))
                .filter(todos::completed.eq(completed))
                .select(todos::id)
                .order((todos::position.asc(), todos::id.asc()))
                .load::<i32>(conn)?
        }
    };
    Ok(ids)
}

/// Assign positions `1..=n` to `ordered_ids`.
///
/// The list must name every row of `scope` exactly once; a partial list
/// would leave stale positions tied with the new ones.
pub fn set_explicit_order(
    conn: &mut SqliteConnection,
    scope: Scope,
    ordered_ids: &[i32],
) -> Result<()> {
    validate_order(&ids_in_order(conn, scope)?, ordered_ids)?;

    for (idx, id) in ordered_ids.iter().enumerate() {
        let position = (idx + 1) as i32;
        match scope {
            Scope::Projects => {
                diesel::update(projects::table.filter(projects::id.eq(*id)))
                    .set(projects::position.eq(position))
                    .execute(conn)?;
            }
            Scope::Todos { .. } => {
                diesel::update(todos::table.filter(todos::id.eq(*id)))
                    .set(todos::position.eq(position))
                    .execute(conn)?;
            }
        }
    }
    Ok(())
}

fn validate_order(current: &[i32], ordered_ids: &[i32]) -> Result<()> {
    if ordered_ids.is_empty() {
        return Err(TodoSyncError::Validation(
            "reorder payload must not be empty".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(ordered_ids.len());
    for id in ordered_ids {
        if !seen.insert(*id) {
            return Err(TodoSyncError::Validation(format!(
                "id {id} appears more than once in reorder payload"
            )));
        }
    }

    let current: HashSet<i32> = current.iter().copied().collect();
    if let Some(stray) = ordered_ids.iter().find(|id| !current.contains(id)) {
        return Err(TodoSyncError::Validation(format!(
            "id {stray} does not belong to the list being reordered"
        )));
    }
    if seen.len() != current.len() {
        return Err(TodoSyncError::Validation(format!(
            "reorder payload lists {} of {} items; send the complete list",
            seen.len(),
            current.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_must_be_complete_and_unique() {
        assert!(validate_order(&[1, 2, 3], &[3, 1, 2]).is_ok());

        let err = validate_order(&[1, 2, 3], &[]).unwrap_err();
        assert!(err.to_string().contains("must not be empty"));

        let err = validate_order(&[1, 2, 3], &[1, 2]).unwrap_err();
        assert!(err.to_string().contains("2 of 3"));

        let err = validate_order(&[1, 2], &[1, 1]).unwrap_err();
        assert!(err.to_string().contains("more than once"));

        let err = validate_order(&[1, 2], &[1, 2, 9]).unwrap_err();
        assert!(err.to_string().contains("id 9"));
    }
}
