//! HTTP surface
//!
//! REST endpoints for direct note/todo manipulation plus the chat
//! endpoints that drive the agent. Record CRUD talks to the providers
//! directly; everything conversational goes through the agent loop.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::agent::PicoAgent;
use crate::conversation::Turn;
use crate::error::ProviderError;
use crate::providers::todos::{NewTodo, TodoUpdate};
use crate::providers::{NotesProvider, TodosProvider};

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<PicoAgent>,
    pub notes: Arc<NotesProvider>,
    pub todos: Arc<TodosProvider>,
    pub model: String,
    pub max_tokens: u32,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/api/notes", get(list_notes).post(create_note))
        .route(
            "/api/notes/{id}",
            get(get_note).put(update_note).delete(delete_note),
        )
        .route("/api/todos", get(list_todos).post(create_todo))
        .route("/api/todos/{id}", get(get_todo).put(update_todo).delete(delete_todo))
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Uniform error body: `{"detail": "..."}` with the mapped status.
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn not_found(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: detail.into(),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(e: ProviderError) -> Self {
        let status = match &e {
            ProviderError::Execution(_)
            | ProviderError::OperationNotFound(_)
            | ProviderError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            ProviderError::InvalidArguments { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            detail: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"detail": self.detail}))).into_response()
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({"message": "Pico API is running"}))
}

// -- notes ----------------------------------------------------------------

#[derive(Deserialize)]
struct NoteBody {
    title: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct NotePatch {
    title: Option<String>,
    content: Option<String>,
}

async fn list_notes(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(Json(state.notes.get_all()?).into_response())
}

async fn get_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.notes.get(&id)? {
        Some(note) => Ok(Json(note).into_response()),
        None => Err(ApiError::not_found("Note not found")),
    }
}

async fn create_note(
    State(state): State<AppState>,
    Json(body): Json<NoteBody>,
) -> Result<Response, ApiError> {
    Ok(Json(state.notes.create(&body.title, &body.content)?).into_response())
}

async fn update_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<NotePatch>,
) -> Result<Response, ApiError> {
    let note = state
        .notes
        .update(&id, body.title.as_deref(), body.content.as_deref())?;
    Ok(Json(note).into_response())
}

async fn delete_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    if state.notes.delete(&id)? {
        Ok(Json(json!({"message": "Note deleted"})).into_response())
    } else {
        Err(ApiError::not_found("Note not found"))
    }
}

// -- todos ----------------------------------------------------------------

async fn list_todos(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(Json(state.todos.get_all()?).into_response())
}

async fn get_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.todos.get(&id)? {
        Some(todo) => Ok(Json(todo).into_response()),
        None => Err(ApiError::not_found("Todo not found")),
    }
}

async fn create_todo(
    State(state): State<AppState>,
    Json(body): Json<NewTodo>,
) -> Result<Response, ApiError> {
    Ok(Json(state.todos.create(body)?).into_response())
}

async fn update_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TodoUpdate>,
) -> Result<Response, ApiError> {
    Ok(Json(state.todos.update(&id, body)?).into_response())
}

async fn delete_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    if state.todos.delete(&id)? {
        Ok(Json(json!({"message": "Todo deleted"})).into_response())
    } else {
        Err(ApiError::not_found("Todo not found"))
    }
}

// -- chat -----------------------------------------------------------------

#[derive(Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatReply {
    response: String,
    model: String,
    metadata: crate::agent::ActionMetadata,
}

fn to_turns(messages: Vec<ChatMessage>) -> Vec<Turn> {
    messages
        .into_iter()
        .map(|m| match m.role.as_str() {
            "assistant" => Turn::assistant(m.content),
            _ => Turn::user(m.content),
        })
        .collect()
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    let mut messages = to_turns(request.messages);
    match state.agent.chat(&mut messages, state.max_tokens).await {
        Ok(result) => Ok(Json(ChatReply {
            response: result.response,
            model: state.model.clone(),
            metadata: result.metadata,
        })),
        Err(e) => {
            error!("chat failed: {}", e);
            Err(ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                detail: e.to_string(),
            })
        }
    }
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let messages = to_turns(request.messages);
    let events = state
        .agent
        .chat_stream(messages, state.max_tokens)
        .map(|event| Event::default().json_data(&event));
    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_map_to_http_statuses() {
        let e: ApiError = ProviderError::Execution("Todo x not found".into()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);

        let e: ApiError = ProviderError::invalid_arguments("create_note", "missing title").into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);

        let e: ApiError = ProviderError::Io(std::io::Error::other("disk")).into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn roles_map_onto_turns() {
        let turns = to_turns(vec![
            ChatMessage {
                role: "user".into(),
                content: "hi".into(),
            },
            ChatMessage {
                role: "assistant".into(),
                content: "hello".into(),
            },
        ]);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text(), "hi");
        assert_eq!(turns[1].text(), "hello");
    }
}
