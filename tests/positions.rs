mod common;

use todo_sync::positions::{self, Scope};
use todo_sync::projects::ProjectStore;
use todo_sync::todo::TodoStore;

#[tokio::test]
async fn insert_at_top_keeps_decreasing() {
    let (_tmp, db) = common::open_db().await;
    let project_id = common::project(&db, "Inbox").await;
    let store = TodoStore::new(db.clone());

    let a = common::todo(&store, project_id, "a").await;
    let b = common::todo(&store, project_id, "b").await;
    let c = common::todo(&store, project_id, "c").await;
    assert_eq!((a.position, b.position, c.position), (0, -1, -2));

    let order = db
        .read(move |conn| positions::ids_in_order(conn, Scope::active(project_id)))
        .await
        .unwrap();
    assert_eq!(order, vec![c.id, b.id, a.id]);

    // Scopes of another project are untouched.
    let other = common::project(&db, "Other").await;
    let first = common::todo(&store, other, "x").await;
    assert_eq!(first.position, 0);
}

#[tokio::test]
async fn explicit_order_is_read_back_exactly() {
    let (_tmp, db) = common::open_db().await;
    let project_id = common::project(&db, "Inbox").await;
    let store = TodoStore::new(db.clone());
    let a = common::todo(&store, project_id, "a").await;
    let b = common::todo(&store, project_id, "b").await;
    let c = common::todo(&store, project_id, "c").await;

    store.reorder(&[a.id, c.id, b.id]).await.unwrap();

    let listed: Vec<(i32, i32)> = store
        .list(Some(project_id))
        .await
        .unwrap()
        .into_iter()
        .map(|todo| (todo.id, todo.position))
        .collect();
    assert_eq!(listed, vec![(a.id, 1), (c.id, 2), (b.id, 3)]);
}

#[tokio::test]
async fn incomplete_reorder_is_rejected_and_changes_nothing() {
    let (_tmp, db) = common::open_db().await;
    let project_id = common::project(&db, "Inbox").await;
    let store = TodoStore::new(db.clone());
    let a = common::todo(&store, project_id, "a").await;
    let b = common::todo(&store, project_id, "b").await;
    let _c = common::todo(&store, project_id, "c").await;

    let err = store.reorder(&[a.id, b.id]).await.unwrap_err();
    assert!(err.is_client_error());
    assert!(err.to_string().contains("2 of 3"));

    let positions: Vec<i32> = store
        .list(Some(project_id))
        .await
        .unwrap()
        .into_iter()
        .map(|todo| todo.position)
        .collect();
    assert_eq!(positions, vec![-2, -1, 0]);
}

#[tokio::test]
async fn shift_down_moves_only_its_scope() {
    let (_tmp, db) = common::open_db().await;
    let project_id = common::project(&db, "Inbox").await;
    let store = TodoStore::new(db.clone());
    let a = common::todo(&store, project_id, "a").await;
    let done = common::todo(&store, project_id, "done").await;
    store.set_completed(done.id, true).await.unwrap();

    let shifted = db
        .write(move |conn| positions::shift_down(conn, Scope::active(project_id), 5))
        .await
        .unwrap();
    assert_eq!(shifted, 1);

    assert_eq!(store.get(a.id).await.unwrap().position, a.position + 5);
    assert_eq!(store.get(done.id).await.unwrap().position, 0);
}

#[tokio::test]
async fn projects_append_and_reorder() {
    let (_tmp, db) = common::open_db().await;
    let projects = ProjectStore::new(db.clone());
    let work = projects.create("Work").await.unwrap();
    let home = projects.create("Home").await.unwrap();
    assert_eq!((work.position, home.position), (1, 2));

    projects.reorder(&[home.id, work.id]).await.unwrap();
    let titles: Vec<String> = projects
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|project| project.title)
        .collect();
    assert_eq!(titles, vec!["Home", "Work"]);

    assert!(projects.reorder(&[home.id]).await.is_err());
}
