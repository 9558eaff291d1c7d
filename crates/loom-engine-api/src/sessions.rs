//! Session endpoints: create, list, inspect, state reads, SSE event
//! feeds, input, pause/resume, fork, delete.

use actix_web::{delete, get, post, web, HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use loom_engine_core::{CoreError, ValidationError};

use crate::error::ApiError;
use crate::sse;
use crate::AppState;

fn parse_session_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| {
        ApiError(CoreError::Validation(ValidationError::new(format!(
            "invalid session id {raw:?}"
        ))))
    })
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub input: Value,
    /// Workflow to run; defaults to the transport's configured workflow.
    pub workflow: Option<String>,
}

#[post("/sessions")]
pub async fn create_session(
    state: web::Data<AppState>,
    body: web::Json<CreateSessionRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let workflow = body
        .workflow
        .unwrap_or_else(|| state.default_workflow.clone());
    let session_id = state.scaffold.create_session(&workflow, body.input).await?;
    Ok(HttpResponse::Created().json(json!({"sessionId": session_id})))
}

#[get("/sessions")]
pub async fn list_sessions(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let sessions = state.scaffold.list_sessions().await?;
    Ok(HttpResponse::Ok().json(json!({"sessions": sessions})))
}

#[get("/sessions/{id}")]
pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let session_id = parse_session_id(&path)?;
    // 404 for sessions the store has never seen.
    state.scaffold.status(session_id).await?;
    let running = state.scaffold.is_running(session_id).await;
    Ok(HttpResponse::Ok().json(json!({"running": running})))
}

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    pub position: Option<u64>,
}

#[get("/sessions/{id}/state")]
pub async fn get_session_state(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<StateQuery>,
) -> Result<HttpResponse, ApiError> {
    let session_id = parse_session_id(&path)?;
    let value = state.scaffold.state(session_id, query.position).await?;
    let events = state.scaffold.events(session_id).await?;
    let position = query
        .position
        .unwrap_or(events.len() as u64)
        .min(events.len() as u64);
    Ok(HttpResponse::Ok().json(json!({"state": value, "position": position})))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub history: bool,
}

#[get("/sessions/{id}/events")]
pub async fn session_events(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<EventsQuery>,
) -> Result<HttpResponse, ApiError> {
    let session_id = parse_session_id(&path)?;
    state.scaffold.status(session_id).await?;
    let stream = sse::event_stream(state.scaffold.clone(), session_id, query.history).await?;
    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream))
}

#[derive(Debug, Deserialize)]
pub struct InputRequest {
    pub input: Value,
    pub choice: Option<String>,
}

#[post("/sessions/{id}/input")]
pub async fn session_input(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<InputRequest>,
) -> Result<HttpResponse, ApiError> {
    let session_id = parse_session_id(&path)?;
    let body = body.into_inner();
    let content = match body.input {
        Value::String(s) => s,
        other => other.to_string(),
    };
    state
        .scaffold
        .reply_latest(session_id, content, body.choice)
        .await?;
    Ok(HttpResponse::Ok().json(json!({"ok": true})))
}

#[post("/sessions/{id}/pause")]
pub async fn pause_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let session_id = parse_session_id(&path)?;
    let was_paused = state.scaffold.pause(session_id).await?;
    Ok(HttpResponse::Ok().json(json!({"wasPaused": was_paused})))
}

#[post("/sessions/{id}/resume")]
pub async fn resume_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let session_id = parse_session_id(&path)?;
    let was_resumed = state.scaffold.resume(session_id).await?;
    Ok(HttpResponse::Ok().json(json!({"wasResumed": was_resumed})))
}

#[post("/sessions/{id}/fork")]
pub async fn fork_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let session_id = parse_session_id(&path)?;
    let fork = state.scaffold.fork(session_id).await?;
    Ok(HttpResponse::Created().json(json!({
        "sessionId": fork.session_id,
        "eventsCopied": fork.events_copied,
    })))
}

#[delete("/sessions/{id}")]
pub async fn delete_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let session_id = parse_session_id(&path)?;
    // Deleting an unknown session is a successful no-op.
    state.scaffold.delete_session(session_id).await?;
    Ok(HttpResponse::Ok().json(json!({"ok": true})))
}
