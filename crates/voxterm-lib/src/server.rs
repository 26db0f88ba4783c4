//! HTTP API for the voxterm assistant.
//!
//! Runs on 127.0.0.1:2004 by default. CORS-permissive so a local dashboard
//! can call it from the browser.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;

use voxterm_core::conflicts::Conflicts;
use voxterm_core::locale::Language;
use voxterm_core::types::{EngineStatus, ModuleId, ModuleInfo, RunMode, Turn};

use crate::assistant::Assistant;
use crate::lifecycle::{Exit, Lifecycle};
use crate::speech::{SpeechQueue, SpeechStatus};

#[derive(Clone)]
pub struct AppState {
    pub assistant: Arc<Assistant>,
    pub lifecycle: Option<Lifecycle>,
    pub speech: Option<SpeechQueue>,
}

/// Build the axum router over shared [`AppState`].
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/process", post(process))
        .route("/status", get(status))
        .route("/modules", get(modules))
        .route("/modules/{id}/enabled", post(set_enabled))
        .route("/modules/{id}/mode", post(set_mode))
        .route("/dynamic", post(insert_dynamic))
        .route("/dynamic/{id}", delete(remove_dynamic))
        .route("/conflicts", get(conflicts))
        .route("/say", post(say))
        .route("/speech/clear", post(clear_speech))
        .route("/language", post(language))
        .route("/shutdown", post(shutdown))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
}

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            ok: false,
            error: error.to_string(),
        }),
    )
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
    changed: bool,
}

/// Run `f` against the assistant on the blocking pool. Engine calls wait on
/// the dispatch lock, which a running handler may hold for a while.
async fn engine<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Assistant) -> T + Send + 'static,
    T: Send + 'static,
{
    let assistant = state.assistant.clone();
    tokio::task::spawn_blocking(move || f(&assistant))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))
}

async fn resolve(state: &AppState, id: String) -> Result<ModuleId, ApiError> {
    let found = engine(state, {
        let id = id.clone();
        move |a| a.dispatcher().resolve(&id)
    })
    .await?;
    found.ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("unknown module {id}")))
}

// ─── Dispatch ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ProcessRequest {
    text: String,
    #[serde(default)]
    target: Option<ModuleId>,
    #[serde(default)]
    model: Option<String>,
}

async fn process(State(state): State<AppState>, Json(req): Json<ProcessRequest>) -> Json<Turn> {
    Json(state.assistant.handle(&req.text, req.target, req.model).await)
}

#[derive(Serialize)]
struct StatusResponse {
    engine: EngineStatus,
    language: Language,
    speech: Option<SpeechStatus>,
    exit: Option<Exit>,
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let status = engine(&state, |a| a.dispatcher().status()).await?;
    Ok(Json(StatusResponse {
        engine: status,
        language: state.assistant.language(),
        speech: state.speech.as_ref().map(SpeechQueue::status),
        exit: state.lifecycle.as_ref().map(Lifecycle::state),
    }))
}

// ─── Modules ───────────────────────────────────────────────────────────────

async fn modules(State(state): State<AppState>) -> Result<Json<Vec<ModuleInfo>>, ApiError> {
    Ok(Json(engine(&state, |a| a.dispatcher().modules()).await?))
}

#[derive(Deserialize)]
struct EnabledRequest {
    enabled: bool,
}

async fn set_enabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<EnabledRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let id = resolve(&state, id).await?;
    let changed = engine(&state, move |a| a.dispatcher().set_enabled(&id, req.enabled)).await?;
    Ok(Json(OkResponse { ok: true, changed }))
}

#[derive(Deserialize)]
struct ModeRequest {
    mode: String,
}

async fn set_mode(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ModeRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let id = resolve(&state, id).await?;
    let mode: RunMode = req
        .mode
        .parse()
        .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e))?;
    let changed = engine(&state, move |a| a.dispatcher().set_mode(&id, mode)).await?;
    Ok(Json(OkResponse { ok: true, changed }))
}

#[derive(Serialize)]
struct InsertResponse {
    ok: bool,
    id: ModuleId,
}

async fn insert_dynamic(
    State(state): State<AppState>,
    Json(description): Json<Value>,
) -> Result<Json<InsertResponse>, ApiError> {
    let id = engine(&state, move |a| a.insert_script(description))
        .await?
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    Ok(Json(InsertResponse { ok: true, id }))
}

async fn remove_dynamic(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    let target = ModuleId::new(id.as_str());
    if engine(&state, move |a| a.remove_dynamic(&target)).await? {
        Ok(Json(OkResponse {
            ok: true,
            changed: true,
        }))
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            format!("no dynamic module {id}"),
        ))
    }
}

#[derive(Deserialize)]
struct ConflictQuery {
    #[serde(default)]
    debug: bool,
}

async fn conflicts(
    State(state): State<AppState>,
    Query(query): Query<ConflictQuery>,
) -> Result<Json<Conflicts>, ApiError> {
    Ok(Json(engine(&state, move |a| a.dispatcher().conflicts(query.debug)).await?))
}

// ─── Output and lifecycle ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct SayRequest {
    text: String,
}

async fn say(State(state): State<AppState>, Json(req): Json<SayRequest>) -> Json<OkResponse> {
    state.assistant.say(&req.text);
    Json(OkResponse {
        ok: true,
        changed: false,
    })
}

/// Drop every phrase still waiting in the speech queue.
async fn clear_speech(State(state): State<AppState>) -> Result<Json<OkResponse>, ApiError> {
    let Some(speech) = &state.speech else {
        return Err(api_error(StatusCode::CONFLICT, "no speech queue attached"));
    };
    speech.clear();
    Ok(Json(OkResponse {
        ok: true,
        changed: true,
    }))
}

#[derive(Deserialize)]
struct LanguageRequest {
    language: String,
}

#[derive(Serialize)]
struct LanguageResponse {
    ok: bool,
    language: Language,
}

async fn language(
    State(state): State<AppState>,
    Json(req): Json<LanguageRequest>,
) -> Result<Json<LanguageResponse>, ApiError> {
    let language = engine(&state, move |a| a.set_language(&req.language))
        .await?
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    Ok(Json(LanguageResponse { ok: true, language }))
}

#[derive(Deserialize)]
struct ShutdownRequest {
    #[serde(default)]
    reload: bool,
}

async fn shutdown(
    State(state): State<AppState>,
    Json(req): Json<ShutdownRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let Some(lifecycle) = &state.lifecycle else {
        return Err(api_error(StatusCode::CONFLICT, "no lifecycle attached"));
    };
    lifecycle.exit_now(if req.reload { Exit::Reload } else { Exit::Shutdown });
    Ok(Json(OkResponse {
        ok: true,
        changed: true,
    }))
}
