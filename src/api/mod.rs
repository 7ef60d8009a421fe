//! HTTP adapter
//!
//! Maps JSON routes onto store operations. No behavior lives here beyond
//! request decoding and error rendering.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::LearaError;
use crate::search::SearchOptions;
use crate::storage::{Store, SCHEMA_VERSION};
use crate::summary::{SummaryEngine, SummaryRequest};
use crate::types::*;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub summary: SummaryEngine,
}

impl AppState {
    pub fn new(store: Store, summary: SummaryEngine) -> Self {
        Self { store, summary }
    }
}

/// Create the API router with all routes
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/stats", get(stats))
        .route("/memories", get(list_memories).post(create_memory))
        .route("/memories/search", get(search_memories))
        .route("/memories/by-key/:key", get(find_memories_by_key))
        .route(
            "/memories/:id",
            get(get_memory).patch(update_memory).delete(deactivate_memory),
        )
        .route("/summary", get(summary))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/:id", get(get_task))
        .route("/tasks/:id/status", put(update_task_status))
        .route(
            "/sessions/:session_id/context",
            get(get_session_context)
                .put(put_session_context)
                .delete(delete_session_context),
        )
        .route("/chat/messages", post(append_message))
        .route("/chat/conversations", get(list_conversations))
        .route("/chat/conversations/:id/messages", get(get_messages));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// API error type that converts to HTTP responses
#[derive(Debug)]
pub struct ApiError(pub LearaError);

impl<E: Into<LearaError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = %self.0, kind = self.0.kind(), "Request failed");
        }

        let body = Json(json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn bad_query(rejection: QueryRejection) -> ApiError {
    ApiError(LearaError::Validation(rejection.body_text()))
}

fn bad_path(rejection: PathRejection) -> ApiError {
    ApiError(LearaError::Validation(rejection.body_text()))
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    ApiError(LearaError::Validation(rejection.body_text()))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "schema_version": SCHEMA_VERSION,
    }))
}

async fn stats(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let stats = state.store.stats().await?;
    Ok(Json(json!({
        "stats": stats,
        "pool": state.store.pool_status(),
    })))
}

// Memories

async fn list_memories(
    State(state): State<AppState>,
    query: Result<Query<MemoryListOptions>, QueryRejection>,
) -> ApiResult<Json<Page<Memory>>> {
    let Query(options) = query.map_err(bad_query)?;
    Ok(Json(state.store.list_memories(options).await?))
}

async fn create_memory(
    State(state): State<AppState>,
    body: Result<Json<CreateMemoryInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Memory>)> {
    let Json(input) = body.map_err(bad_body)?;
    let memory = state.store.create_memory(input).await?;
    Ok((StatusCode::CREATED, Json(memory)))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    category: Option<String>,
    limit: Option<u32>,
}

async fn search_memories(
    State(state): State<AppState>,
    query: Result<Query<SearchParams>, QueryRejection>,
) -> ApiResult<Json<Vec<Memory>>> {
    let Query(params) = query.map_err(bad_query)?;
    let options = SearchOptions {
        query: params.q,
        category: params.category,
        limit: params.limit,
    };
    Ok(Json(state.store.search_memories(options).await?))
}

async fn find_memories_by_key(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<Vec<Memory>>> {
    let Path(key) = path.map_err(bad_path)?;
    Ok(Json(state.store.find_memories_by_key(&key).await?))
}

async fn get_memory(
    State(state): State<AppState>,
    path: Result<Path<MemoryId>, PathRejection>,
) -> ApiResult<Json<Memory>> {
    let Path(id) = path.map_err(bad_path)?;
    Ok(Json(state.store.get_memory(id).await?))
}

async fn update_memory(
    State(state): State<AppState>,
    path: Result<Path<MemoryId>, PathRejection>,
    body: Result<Json<UpdateMemoryInput>, JsonRejection>,
) -> ApiResult<Json<Memory>> {
    let Path(id) = path.map_err(bad_path)?;
    let Json(input) = body.map_err(bad_body)?;
    Ok(Json(state.store.update_memory(id, input).await?))
}

async fn deactivate_memory(
    State(state): State<AppState>,
    path: Result<Path<MemoryId>, PathRejection>,
) -> ApiResult<Json<Memory>> {
    let Path(id) = path.map_err(bad_path)?;
    Ok(Json(state.store.deactivate_memory(id).await?))
}

async fn summary(
    State(state): State<AppState>,
    query: Result<Query<SummaryRequest>, QueryRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Query(request) = query.map_err(bad_query)?;
    let summary = state.summary.summarize(&request).await?;
    Ok(Json(json!({
        "summary": summary,
        "generator": state.summary.summarizer_name(),
    })))
}

// Tasks

async fn list_tasks(
    State(state): State<AppState>,
    query: Result<Query<TaskListOptions>, QueryRejection>,
) -> ApiResult<Json<Page<Task>>> {
    let Query(options) = query.map_err(bad_query)?;
    Ok(Json(state.store.list_tasks(options).await?))
}

async fn create_task(
    State(state): State<AppState>,
    body: Result<Json<CreateTaskInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let Json(input) = body.map_err(bad_body)?;
    let task = state.store.create_task(input).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<AppState>,
    path: Result<Path<TaskId>, PathRejection>,
) -> ApiResult<Json<Task>> {
    let Path(id) = path.map_err(bad_path)?;
    Ok(Json(state.store.get_task(id).await?))
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

async fn update_task_status(
    State(state): State<AppState>,
    path: Result<Path<TaskId>, PathRejection>,
    body: Result<Json<StatusBody>, JsonRejection>,
) -> ApiResult<Json<Task>> {
    let Path(id) = path.map_err(bad_path)?;
    let Json(body) = body.map_err(bad_body)?;
    Ok(Json(state.store.update_task_status_str(id, &body.status).await?))
}

// Session context

async fn get_session_context(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<Vec<SessionContext>>> {
    let Path(session_id) = path.map_err(bad_path)?;
    Ok(Json(state.store.get_session_context(&session_id).await?))
}

#[derive(Debug, Deserialize)]
struct ContextBody {
    context_key: String,
    context_value: String,
}

async fn put_session_context(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    body: Result<Json<ContextBody>, JsonRejection>,
) -> ApiResult<Json<SessionContext>> {
    let Path(session_id) = path.map_err(bad_path)?;
    let Json(body) = body.map_err(bad_body)?;
    let entry = state
        .store
        .upsert_session_context(&session_id, &body.context_key, &body.context_value)
        .await?;
    Ok(Json(entry))
}

#[derive(Debug, Deserialize)]
struct DeleteContextParams {
    /// Remove only this key instead of the whole session
    key: Option<String>,
}

async fn delete_session_context(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<DeleteContextParams>, QueryRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Path(session_id) = path.map_err(bad_path)?;
    let Query(params) = query.map_err(bad_query)?;
    let deleted = match params.key {
        Some(key) => usize::from(state.store.delete_session_key(&session_id, &key).await?),
        None => state.store.clear_session(&session_id).await?,
    };
    Ok(Json(json!({ "deleted": deleted })))
}

// Chat

#[derive(Debug, Deserialize)]
struct AppendMessageBody {
    conversation_id: Option<ConversationId>,
    content: String,
    #[serde(default = "default_sender")]
    sender: Sender,
}

fn default_sender() -> Sender {
    Sender::User
}

#[derive(Debug, Serialize)]
struct AppendMessageResponse {
    conversation: Conversation,
    message: Message,
}

async fn append_message(
    State(state): State<AppState>,
    body: Result<Json<AppendMessageBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AppendMessageResponse>)> {
    let Json(body) = body.map_err(bad_body)?;
    let (conversation, message) = state
        .store
        .append_message(body.conversation_id, &body.content, body.sender)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(AppendMessageResponse {
            conversation,
            message,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct Paging {
    limit: Option<u32>,
    offset: Option<u32>,
}

async fn list_conversations(
    State(state): State<AppState>,
    query: Result<Query<Paging>, QueryRejection>,
) -> ApiResult<Json<Vec<Conversation>>> {
    let Query(paging) = query.map_err(bad_query)?;
    let conversations = state
        .store
        .list_conversations(
            paging.limit.unwrap_or(DEFAULT_LIST_LIMIT),
            paging.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(conversations))
}

async fn get_messages(
    State(state): State<AppState>,
    path: Result<Path<ConversationId>, PathRejection>,
    query: Result<Query<Paging>, QueryRejection>,
) -> ApiResult<Json<Vec<Message>>> {
    let Path(id) = path.map_err(bad_path)?;
    let Query(paging) = query.map_err(bad_query)?;
    Ok(Json(state.store.get_messages(id, paging.limit).await?))
}
