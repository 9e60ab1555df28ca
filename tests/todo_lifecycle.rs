mod common;

use chrono::{TimeZone, Utc};
use diesel::connection::SimpleConnection;
use diesel::{Connection, SqliteConnection};

use todo_sync::error::TodoSyncError;
use todo_sync::projects::ProjectStore;
use todo_sync::recurrence::{Recurrence, RecurrenceUnit};
use todo_sync::todo::{NewTodo, TodoPatch, TodoStore};

fn monthly() -> Option<Recurrence> {
    Some(Recurrence::new(1, RecurrenceUnit::Month).unwrap())
}

#[tokio::test]
async fn create_validates_input() {
    let (_tmp, db) = common::open_db().await;
    let project_id = common::project(&db, "Inbox").await;
    let store = TodoStore::new(db.clone());

    let todo = store
        .create(NewTodo {
            title: "  Pay rent ".to_string(),
            project_id,
            due_date: Some("2024-06-01T09:30:00+02:00".to_string()),
            recurrence: monthly(),
        })
        .await
        .unwrap();
    assert_eq!(todo.title, "Pay rent");
    assert!(!todo.completed);
    assert_eq!(
        todo.due_date,
        Some(Utc.with_ymd_and_hms(2024, 6, 1, 7, 30, 0).unwrap())
    );
    assert_eq!(todo.recurrence_interval, Some(1));
    assert_eq!(todo.recurrence_unit.as_deref(), Some("month"));
    assert_eq!(todo.external_uid, None);

    let err = store
        .create(NewTodo {
            title: " ".to_string(),
            project_id,
            ..NewTodo::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TodoSyncError::Validation(_)));

    let err = store
        .create(NewTodo {
            title: "x".to_string(),
            project_id,
            due_date: Some("tomorrow".to_string()),
            ..NewTodo::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TodoSyncError::Validation(_)));

    let err = store
        .create(NewTodo {
            title: "x".to_string(),
            project_id: 999,
            ..NewTodo::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TodoSyncError::NotFound(_)));
}

#[tokio::test]
async fn toggling_twice_returns_to_top_of_active() {
    let (_tmp, db) = common::open_db().await;
    let project_id = common::project(&db, "Inbox").await;
    let store = TodoStore::new(db.clone());
    let target = common::todo(&store, project_id, "target").await;
    let _b = common::todo(&store, project_id, "b").await;
    let c = common::todo(&store, project_id, "c").await;

    let done = store.set_completed(target.id, true).await.unwrap();
    assert!(done.todo.completed);
    assert!(done.todo.completed_at.is_some());
    assert_eq!(done.todo.position, 0);
    assert!(done.next_occurrence.is_none());

    let top_before = store.get(c.id).await.unwrap().position;
    let reopened = store.set_completed(target.id, false).await.unwrap().todo;
    assert!(!reopened.completed);
    assert_eq!(reopened.completed_at, None);
    assert!(reopened.position < top_before);

    let first = store.list(Some(project_id)).await.unwrap().remove(0);
    assert_eq!(first.id, target.id);
}

#[tokio::test]
async fn completing_a_repeating_todo_creates_one_next_occurrence() {
    let (_tmp, db) = common::open_db().await;
    let project_id = common::project(&db, "Bills").await;
    let store = TodoStore::new(db.clone());
    let todo = store
        .create(NewTodo {
            title: "Rent".to_string(),
            project_id,
            due_date: Some("2024-01-31T09:00:00Z".to_string()),
            recurrence: monthly(),
        })
        .await
        .unwrap();

    let update = store.set_completed(todo.id, true).await.unwrap();
    assert!(update.todo.completed);
    let next = update.next_occurrence.expect("next occurrence");
    assert!(!next.completed);
    assert_eq!(next.completed_at, None);
    assert_eq!(next.title, "Rent");
    assert_eq!(next.project_id, project_id);
    assert_eq!(
        next.due_date,
        Some(Utc.with_ymd_and_hms(2024, 2, 29, 9, 0, 0).unwrap())
    );
    assert_eq!(next.recurrence_interval, Some(1));
    assert_eq!(next.recurrence_unit.as_deref(), Some("month"));

    let all = store.list(Some(project_id)).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all.iter().filter(|t| !t.completed).count(), 1);

    // Updating an already completed todo does not repeat again.
    let again = store
        .update(
            todo.id,
            TodoPatch {
                title: Some("Rent (paid)".to_string()),
                completed: Some(true),
                ..TodoPatch::default()
            },
        )
        .await
        .unwrap();
    assert!(again.next_occurrence.is_none());
    assert_eq!(store.list(Some(project_id)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn failed_next_occurrence_leaves_todo_active() {
    let (tmp, db) = common::open_db().await;
    let project_id = common::project(&db, "Bills").await;
    let store = TodoStore::new(db.clone());
    let todo = store
        .create(NewTodo {
            title: "Rent".to_string(),
            project_id,
            due_date: Some("2024-01-31T09:00:00Z".to_string()),
            recurrence: monthly(),
        })
        .await
        .unwrap();

    let mut raw = SqliteConnection::establish(&common::db_path(&tmp)).unwrap();
    raw.batch_execute(
        "CREATE TRIGGER block_inserts BEFORE INSERT ON todos \
         BEGIN SELECT RAISE(ABORT, 'insert blocked'); END;",
    )
    .unwrap();

    let err = store.set_completed(todo.id, true).await.unwrap_err();
    assert!(matches!(err, TodoSyncError::Database(_)));

    let after = store.get(todo.id).await.unwrap();
    assert!(!after.completed);
    assert_eq!(after.completed_at, None);
    assert_eq!(after.position, todo.position);
    assert_eq!(store.list(Some(project_id)).await.unwrap().len(), 1);

    raw.batch_execute("DROP TRIGGER block_inserts;").unwrap();
    let update = store.set_completed(todo.id, true).await.unwrap();
    assert!(update.next_occurrence.is_some());
}

#[tokio::test]
async fn patch_edits_fields_and_moves_between_projects() {
    let (_tmp, db) = common::open_db().await;
    let inbox = common::project(&db, "Inbox").await;
    let later = common::project(&db, "Later").await;
    let store = TodoStore::new(db.clone());
    let todo = store
        .create(NewTodo {
            title: "Read".to_string(),
            project_id: inbox,
            due_date: Some("2024-05-01T12:00:00Z".to_string()),
            recurrence: Some(Recurrence::new(2, RecurrenceUnit::Week).unwrap()),
        })
        .await
        .unwrap();
    let resident = common::todo(&store, later, "resident").await;

    let moved = store
        .update(
            todo.id,
            TodoPatch {
                project_id: Some(later),
                due_date: Some(None),
                recurrence: Some(None),
                ..TodoPatch::default()
            },
        )
        .await
        .unwrap()
        .todo;
    assert_eq!(moved.project_id, later);
    assert_eq!(moved.due_date, None);
    assert_eq!(moved.recurrence_interval, None);
    assert_eq!(moved.recurrence_unit, None);
    assert!(moved.position < resident.position);

    let positioned = store
        .update(
            todo.id,
            TodoPatch {
                position: Some(42),
                ..TodoPatch::default()
            },
        )
        .await
        .unwrap()
        .todo;
    assert_eq!(positioned.position, 42);

    let err = store
        .update(
            todo.id,
            TodoPatch {
                project_id: Some(999),
                ..TodoPatch::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TodoSyncError::NotFound(_)));
}

#[tokio::test]
async fn delete_and_project_cascade() {
    let (_tmp, db) = common::open_db().await;
    let projects = ProjectStore::new(db.clone());
    let project_id = common::project(&db, "Inbox").await;
    let store = TodoStore::new(db.clone());
    let a = common::todo(&store, project_id, "a").await;
    let _b = common::todo(&store, project_id, "b").await;

    assert!(store.delete(a.id).await.unwrap());
    assert!(!store.delete(a.id).await.unwrap());

    projects.delete(project_id).await.unwrap();
    assert!(store.list(Some(project_id)).await.unwrap().is_empty());
    assert!(matches!(
        projects.get(project_id).await.unwrap_err(),
        TodoSyncError::NotFound(_)
    ));
    assert!(matches!(
        projects.delete(project_id).await.unwrap_err(),
        TodoSyncError::NotFound(_)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_writes_all_commit_with_distinct_positions() {
    let (_tmp, db) = common::open_db().await;
    let project_id = common::project(&db, "Inbox").await;
    let store = TodoStore::new(db.clone());

    let creates = (0..40).map(|n| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .create(NewTodo {
                    title: format!("todo {n}"),
                    project_id,
                    ..NewTodo::default()
                })
                .await
        })
    });
    let mut created = Vec::new();
    for handle in futures::future::join_all(creates).await {
        created.push(handle.unwrap().unwrap());
    }

    let mut positions: Vec<i32> = created.iter().map(|todo| todo.position).collect();
    positions.sort_unstable();
    positions.dedup();
    assert_eq!(positions, (-39..=0).collect::<Vec<_>>());

    let completions = created.iter().step_by(2).map(|todo| {
        let store = store.clone();
        let id = todo.id;
        tokio::spawn(async move { store.set_completed(id, true).await })
    });
    for handle in futures::future::join_all(completions).await {
        assert!(handle.unwrap().unwrap().todo.completed);
    }

    let listed = store.list(Some(project_id)).await.unwrap();
    assert_eq!(listed.len(), 40);
    let mut done: Vec<i32> = listed
        .iter()
        .filter(|todo| todo.completed)
        .map(|todo| todo.position)
        .collect();
    done.sort_unstable();
    done.dedup();
    assert_eq!(done, (-19..=0).collect::<Vec<_>>());
}
