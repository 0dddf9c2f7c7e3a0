use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::memory::rehydrate::RehydratedContext;
use crate::persistence::{ConversationMeta, ConversationRecord, UserPreferences};
use crate::runtime::BackendRuntime;
use crate::session::{CompanionEngine, CompanionEvent, ConversationState, TurnResult};

#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<CompanionEngine>,
    pub auth: BackendAuthConfig,
    pub ws_events: broadcast::Sender<ApiEventEnvelope>,
}

#[derive(Debug, Clone)]
pub struct BackendAuthConfig {
    mode: AuthMode,
    token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthMode {
    Required,
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiEventEnvelope {
    pub event_type: String,
    pub emitted_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    persistence: &'static str,
}

#[derive(Debug, Deserialize)]
struct ListConversationsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SendTurnRequest {
    content: String,
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    title: String,
}

#[derive(Debug, Serialize)]
struct CreateConversationResponse {
    conversation_id: String,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    deleted: bool,
}

#[derive(Debug, Serialize)]
struct RenameResponse {
    renamed: bool,
}

#[derive(Debug, Serialize)]
struct SavePreferencesResponse {
    preferences: UserPreferences,
    saved: bool,
}

pub async fn serve_backend(
    runtime: BackendRuntime,
    event_rx: flume::Receiver<CompanionEvent>,
) -> Result<()> {
    let bind_addr = std::env::var("HEARTH_BACKEND_BIND")
        .unwrap_or_else(|_| "127.0.0.1:8797".to_string())
        .parse::<SocketAddr>()
        .context("Invalid HEARTH_BACKEND_BIND (expected host:port)")?;

    let auth = load_auth_config()?;
    let (ws_events, _) = broadcast::channel(512);

    let state = Arc::new(ServerState {
        engine: runtime.engine.clone(),
        auth,
        ws_events: ws_events.clone(),
    });

    spawn_event_bridge(event_rx, ws_events);

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind backend server to {}", bind_addr))?;
    tracing::info!("Hearth backend listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .await
        .context("Backend server failed")?;
    Ok(())
}

fn router(state: Arc<ServerState>) -> Router {
    let protected = Router::new()
        .route("/health", get(health))
        .route(
            "/users/:user_id/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/users/:user_id/conversations/:conversation_id",
            get(get_conversation).delete(delete_conversation),
        )
        .route(
            "/users/:user_id/conversations/:conversation_id/state",
            get(get_conversation_state),
        )
        .route(
            "/users/:user_id/conversations/:conversation_id/title",
            put(rename_conversation),
        )
        .route(
            "/users/:user_id/conversations/:conversation_id/turns",
            post(send_turn),
        )
        .route(
            "/users/:user_id/preferences",
            get(get_preferences).put(save_preferences),
        )
        .route("/users/:user_id/rehydrate", get(rehydrate))
        .route("/ws/events", get(ws_events_route))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new().nest("/v1", protected)
}

fn spawn_event_bridge(
    event_rx: flume::Receiver<CompanionEvent>,
    ws_events: broadcast::Sender<ApiEventEnvelope>,
) {
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv_async().await {
            let envelope = map_companion_event(event);
            let _ = ws_events.send(envelope);
        }
    });
}

fn map_companion_event(event: CompanionEvent) -> ApiEventEnvelope {
    match event {
        CompanionEvent::SessionOpened {
            user_id,
            conversation_id,
            status,
            restored_turns,
        } => envelope(
            "session_opened",
            serde_json::json!({
                "user_id": user_id,
                "conversation_id": conversation_id,
                "status": status,
                "restored_turns": restored_turns
            }),
        ),
        CompanionEvent::TurnComposed {
            user_id,
            conversation_id,
            turn,
            response_class,
            glyph,
            tone,
            processing_time_ms,
        } => envelope(
            "turn_composed",
            serde_json::json!({
                "user_id": user_id,
                "conversation_id": conversation_id,
                "turn": turn,
                "response_class": response_class,
                "glyph": glyph,
                "tone": tone,
                "processing_time_ms": processing_time_ms
            }),
        ),
        CompanionEvent::ThemeReflected {
            user_id,
            conversation_id,
            theme,
            text,
        } => envelope(
            "theme_reflected",
            serde_json::json!({
                "user_id": user_id,
                "conversation_id": conversation_id,
                "theme": theme,
                "text": text
            }),
        ),
        CompanionEvent::PersistenceDegraded { operation } => envelope(
            "persistence_degraded",
            serde_json::json!({ "operation": operation }),
        ),
        CompanionEvent::Fallback {
            user_id,
            conversation_id,
        } => envelope(
            "fallback",
            serde_json::json!({
                "user_id": user_id,
                "conversation_id": conversation_id
            }),
        ),
    }
}

fn envelope(event_type: &str, payload: serde_json::Value) -> ApiEventEnvelope {
    ApiEventEnvelope {
        event_type: event_type.to_string(),
        emitted_at: Utc::now(),
        payload,
    }
}

fn load_auth_config() -> Result<BackendAuthConfig> {
    let mode = parse_auth_mode(std::env::var("HEARTH_BACKEND_AUTH_MODE").ok())?;
    let token = std::env::var("HEARTH_BACKEND_TOKEN")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    if mode == AuthMode::Required && token.is_none() {
        return Err(anyhow!(
            "HEARTH_BACKEND_TOKEN is required when auth mode is 'required'"
        ));
    }
    if mode == AuthMode::Disabled {
        tracing::warn!("Backend auth mode is disabled; all API routes are unauthenticated");
    }

    Ok(BackendAuthConfig { mode, token })
}

fn parse_auth_mode(raw: Option<String>) -> Result<AuthMode> {
    let normalized = raw
        .unwrap_or_else(|| "required".to_string())
        .trim()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "" | "required" | "on" | "enabled" | "true" => Ok(AuthMode::Required),
        "disabled" | "off" | "false" => Ok(AuthMode::Disabled),
        other => Err(anyhow!(
            "Invalid HEARTH_BACKEND_AUTH_MODE '{}'. Expected 'required' or 'disabled'",
            other
        )),
    }
}

async fn auth_middleware(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    authorize(&headers, &state.auth)?;
    Ok(next.run(request).await)
}

fn authorize(headers: &HeaderMap, auth: &BackendAuthConfig) -> Result<(), StatusCode> {
    if auth.mode == AuthMode::Disabled {
        return Ok(());
    }
    let Some(token) = auth.token.as_deref() else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    let Some(raw_header) = headers.get(header::AUTHORIZATION) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let Ok(auth_value) = raw_header.to_str() else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    if auth_value.trim() != format!("Bearer {}", token) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        persistence: state.engine.gateway().backend_name(),
    })
}

async fn list_conversations(
    State(state): State<Arc<ServerState>>,
    Path(user_id): Path<String>,
    Query(query): Query<ListConversationsQuery>,
) -> Result<Json<Vec<ConversationMeta>>, (StatusCode, String)> {
    let user_id = require_id(&user_id, "user id")?;
    let limit = clamp_limit(query.limit, 50, 1, 500);
    Ok(Json(state.engine.list_conversations(user_id, limit).await))
}

async fn create_conversation(
    Path(user_id): Path<String>,
) -> Result<Json<CreateConversationResponse>, (StatusCode, String)> {
    require_id(&user_id, "user id")?;
    Ok(Json(CreateConversationResponse {
        conversation_id: uuid::Uuid::new_v4().to_string(),
    }))
}

async fn get_conversation(
    State(state): State<Arc<ServerState>>,
    Path((user_id, conversation_id)): Path<(String, String)>,
) -> Result<Json<ConversationRecord>, (StatusCode, String)> {
    let user_id = require_id(&user_id, "user id")?;
    let conversation_id = require_id(&conversation_id, "conversation id")?;
    match state
        .engine
        .stored_conversation(user_id, conversation_id)
        .await
    {
        Some(record) => Ok(Json(record)),
        None => Err(not_found(format!(
            "conversation '{}' not found",
            conversation_id
        ))),
    }
}

async fn get_conversation_state(
    State(state): State<Arc<ServerState>>,
    Path((user_id, conversation_id)): Path<(String, String)>,
) -> Result<Json<ConversationState>, (StatusCode, String)> {
    let user_id = require_id(&user_id, "user id")?;
    let conversation_id = require_id(&conversation_id, "conversation id")?;
    Ok(Json(
        state
            .engine
            .conversation_state(user_id, conversation_id)
            .await,
    ))
}

async fn delete_conversation(
    State(state): State<Arc<ServerState>>,
    Path((user_id, conversation_id)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, (StatusCode, String)> {
    let user_id = require_id(&user_id, "user id")?;
    let conversation_id = require_id(&conversation_id, "conversation id")?;
    if state
        .engine
        .delete_conversation(user_id, conversation_id)
        .await
    {
        Ok(Json(DeleteResponse { deleted: true }))
    } else {
        Err(not_found(format!(
            "conversation '{}' not found",
            conversation_id
        )))
    }
}

async fn rename_conversation(
    State(state): State<Arc<ServerState>>,
    Path((user_id, conversation_id)): Path<(String, String)>,
    Json(body): Json<RenameRequest>,
) -> Result<Json<RenameResponse>, (StatusCode, String)> {
    let user_id = require_id(&user_id, "user id")?;
    let conversation_id = require_id(&conversation_id, "conversation id")?;
    if body.title.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "title cannot be empty".to_string()));
    }
    let renamed = state
        .engine
        .rename_conversation(user_id, conversation_id, &body.title)
        .await;
    if !renamed {
        return Err(not_found(format!(
            "conversation '{}' not found",
            conversation_id
        )));
    }
    Ok(Json(RenameResponse { renamed }))
}

async fn send_turn(
    State(state): State<Arc<ServerState>>,
    Path((user_id, conversation_id)): Path<(String, String)>,
    Json(body): Json<SendTurnRequest>,
) -> Result<Json<TurnResult>, (StatusCode, String)> {
    let user_id = require_id(&user_id, "user id")?;
    let conversation_id = require_id(&conversation_id, "conversation id")?;
    let content = body.content.trim();
    if content.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "content cannot be empty".to_string(),
        ));
    }

    Ok(Json(
        state
            .engine
            .compose_turn(user_id, conversation_id, content)
            .await,
    ))
}

async fn get_preferences(
    State(state): State<Arc<ServerState>>,
    Path(user_id): Path<String>,
) -> Result<Json<UserPreferences>, (StatusCode, String)> {
    let user_id = require_id(&user_id, "user id")?;
    Ok(Json(state.engine.preferences(user_id).await))
}

async fn save_preferences(
    State(state): State<Arc<ServerState>>,
    Path(user_id): Path<String>,
    Json(preferences): Json<UserPreferences>,
) -> Result<Json<SavePreferencesResponse>, (StatusCode, String)> {
    let user_id = require_id(&user_id, "user id")?;
    let saved = state.engine.save_preferences(user_id, preferences).await;
    Ok(Json(SavePreferencesResponse { preferences, saved }))
}

async fn rehydrate(
    State(state): State<Arc<ServerState>>,
    Path(user_id): Path<String>,
) -> Result<Json<RehydratedContext>, (StatusCode, String)> {
    let user_id = require_id(&user_id, "user id")?;
    Ok(Json(state.engine.rehydrate(user_id).await))
}

async fn ws_events_route(
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_events_socket(state, socket))
}

async fn handle_events_socket(state: Arc<ServerState>, mut socket: WebSocket) {
    let mut rx = state.ws_events.subscribe();

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(serialized) => serialized,
                            Err(error) => {
                                tracing::warn!("Failed to serialize websocket event: {}", error);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

fn require_id<'a>(raw: &'a str, what: &str) -> Result<&'a str, (StatusCode, String)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err((StatusCode::BAD_REQUEST, format!("{what} cannot be empty")));
    }
    Ok(trimmed)
}

fn clamp_limit(value: Option<usize>, default: usize, min: usize, max: usize) -> usize {
    value.unwrap_or(default).clamp(min, max)
}

fn not_found(message: String) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, message)
}
