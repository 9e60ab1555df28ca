use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::Config;
use crate::db::Database;
use crate::error::{Result, TodoSyncError};
use crate::feeds::{FeedIngestor, FeedRefreshJob, FeedStore, FeedSubscription, SyncReport};
use crate::interfaces::feeds::FeedFetcher;
use crate::projects::{Project, ProjectStore};
use crate::recurrence::Recurrence;
use crate::scheduler::Scheduler;
use crate::services::HttpFeedFetcher;
use crate::todo::{NewTodo, Todo, TodoPatch, TodoStore, TodoUpdate};

#[derive(Clone)]
pub struct AppState {
    pub projects: ProjectStore,
    pub todos: TodoStore,
    pub ingestor: Arc<FeedIngestor>,
}

impl AppState {
    pub fn new(db: Database, fetcher: Arc<dyn FeedFetcher>) -> Self {
        let todos = TodoStore::new(db.clone());
        let ingestor = Arc::new(FeedIngestor::new(
            FeedStore::new(db.clone()),
            todos.clone(),
            fetcher,
        ));
        Self {
            projects: ProjectStore::new(db),
            todos,
            ingestor,
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

struct ApiError(TodoSyncError);

impl From<TodoSyncError> for ApiError {
    fn from(err: TodoSyncError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TodoSyncError::Validation(_) => StatusCode::BAD_REQUEST,
            TodoSyncError::NotFound(_) => StatusCode::NOT_FOUND,
            TodoSyncError::Conflict(_) => StatusCode::CONFLICT,
            err => {
                tracing::error!(error = %err, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Deserialize)]
struct ProjectRequest {
    title: String,
}

#[derive(Deserialize)]
struct ReorderRequest {
    ids: Vec<i32>,
}

#[derive(Deserialize)]
struct TodosQuery {
    project_id: Option<i32>,
}

#[derive(Deserialize)]
struct CreateTodoRequest {
    title: String,
    project_id: i32,
    due_date: Option<String>,
    recurrence_interval: Option<i64>,
    recurrence_unit: Option<String>,
}

/// Absent fields stay untouched; explicit `null` clears.
#[derive(Deserialize)]
struct UpdateTodoRequest {
    title: Option<String>,
    completed: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    due_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    recurrence_interval: Option<Option<i64>>,
    #[serde(default, deserialize_with = "nullable")]
    recurrence_unit: Option<Option<String>>,
    project_id: Option<i32>,
    position: Option<i32>,
}

impl UpdateTodoRequest {
    fn into_patch(self) -> Result<TodoPatch> {
        let recurrence = match (self.recurrence_interval, self.recurrence_unit) {
            (None, None) => None,
            (interval, unit) => Some(Recurrence::from_parts(
                interval.flatten(),
                unit.flatten().as_deref(),
            )?),
        };
        Ok(TodoPatch {
            title: self.title,
            completed: self.completed,
            due_date: self.due_date,
            recurrence,
            project_id: self.project_id,
            position: self.position,
        })
    }
}

fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
struct SubscribeRequest {
    url: String,
    project_name: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/reorder", put(reorder_projects))
        .route(
            "/api/projects/:id",
            get(get_project).put(rename_project).delete(delete_project),
        )
        .route("/api/todos", get(list_todos).post(create_todo))
        .route("/api/todos/reorder", put(reorder_todos))
        .route(
            "/api/todos/:id",
            get(get_todo).put(update_todo).delete(delete_todo),
        )
        .route(
            "/api/subscriptions",
            get(list_subscriptions).post(subscribe),
        )
        .route("/api/subscriptions/refresh", post(refresh_subscriptions))
        .route(
            "/api/subscriptions/:id",
            delete(cancel_subscription),
        )
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<Project>>> {
    Ok(Json(state.projects.list().await?))
}

async fn create_project(
    State(state): State<AppState>,
    Json(payload): Json<ProjectRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let project = state.projects.create(&payload.title).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<Project>> {
    Ok(Json(state.projects.get(id).await?))
}

async fn rename_project(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<ProjectRequest>,
) -> ApiResult<Json<Project>> {
    Ok(Json(state.projects.rename(id, &payload.title).await?))
}

async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<StatusCode> {
    state.projects.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reorder_projects(
    State(state): State<AppState>,
    Json(payload): Json<ReorderRequest>,
) -> ApiResult<StatusCode> {
    state.projects.reorder(&payload.ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_todos(
    State(state): State<AppState>,
    Query(query): Query<TodosQuery>,
) -> ApiResult<Json<Vec<Todo>>> {
    Ok(Json(state.todos.list(query.project_id).await?))
}

async fn create_todo(
    State(state): State<AppState>,
    Json(payload): Json<CreateTodoRequest>,
) -> ApiResult<(StatusCode, Json<Todo>)> {
    let recurrence = Recurrence::from_parts(
        payload.recurrence_interval,
        payload.recurrence_unit.as_deref(),
    )?;
    let todo = state
        .todos
        .create(NewTodo {
            title: payload.title,
            project_id: payload.project_id,
            due_date: payload.due_date,
            recurrence,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(todo)))
}

async fn get_todo(State(state): State<AppState>, Path(id): Path<i32>) -> ApiResult<Json<Todo>> {
    Ok(Json(state.todos.get(id).await?))
}

async fn update_todo(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateTodoRequest>,
) -> ApiResult<Json<TodoUpdate>> {
    let patch = payload.into_patch()?;
    Ok(Json(state.todos.update(id, patch).await?))
}

async fn delete_todo(State(state): State<AppState>, Path(id): Path<i32>) -> ApiResult<StatusCode> {
    if state.todos.delete(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(TodoSyncError::NotFound(format!("todo {id}")).into())
    }
}

async fn reorder_todos(
    State(state): State<AppState>,
    Json(payload): Json<ReorderRequest>,
) -> ApiResult<StatusCode> {
    state.todos.reorder(&payload.ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_subscriptions(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<FeedSubscription>>> {
    Ok(Json(state.ingestor.feeds().list().await?))
}

async fn subscribe(
    State(state): State<AppState>,
    Json(payload): Json<SubscribeRequest>,
) -> ApiResult<(StatusCode, Json<FeedSubscription>)> {
    let subscription = state
        .ingestor
        .subscribe(&payload.url, &payload.project_name)
        .await?;
    tracing::info!(
        subscription_id = subscription.id,
        url = %subscription.url,
        "subscribed to feed"
    );
    Ok((StatusCode::CREATED, Json(subscription)))
}

async fn refresh_subscriptions(State(state): State<AppState>) -> ApiResult<Json<SyncReport>> {
    Ok(Json(state.ingestor.sync_all().await?))
}

async fn cancel_subscription(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<StatusCode> {
    state.ingestor.feeds().cancel(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn run(config: Config) -> Result<()> {
    run_with_shutdown(config, futures::future::pending::<()>()).await
}

pub async fn run_with_shutdown<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let db = Database::open(config.resolve_sqlite_path()).await?;
    let fetcher = Arc::new(HttpFeedFetcher::new(
        config.resolve_fetch_timeout(),
        config.resolve_user_agent().as_deref(),
    )?);
    let state = AppState::new(db, fetcher);

    let mut scheduler = Scheduler::new();
    scheduler.register_job(Arc::new(FeedRefreshJob::new(
        state.ingestor.clone(),
        config.resolve_refresh_interval(),
    )));
    scheduler.start();

    let app = build_router(state);

    let addr = format!("{}:{}", config.resolve_host(), config.resolve_port());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TodoSyncError::Runtime(e.to_string()))?;
    tracing::info!(%addr, "todo-syncd listening");
    let shutdown = async move {
        shutdown.await;
        scheduler.stop().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| TodoSyncError::Runtime(e.to_string()))?;

    Ok(())
}
