//! HTTP API server: axum router and request handlers.
//!
//! Handlers validate payloads, then hand models to the engine loop through
//! an [`EngineHandle`]. They never touch the frame buffer directly.
//!
//! ## Rust concepts
//! - axum extractors: `State`, `Bytes`, `WebSocketUpgrade`
//! - `DefaultBodyLimit` to cap request bodies
//! - `(StatusCode, String)` as a lightweight error response

use crate::StripConfig;
use crate::animation::AnimationId;
use crate::engine::{AnimationStatus, EngineGone, EngineHandle, EngineStatus};
use crate::request;
use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Largest accepted request body, in bytes.
pub const MAX_BODY_BYTES: usize = 1_000_000;

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, passed to every handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Client side of the animation engine
    pub engine: EngineHandle,
    /// Strip dimensions, used to range-check pixel indices
    pub strip: StripConfig,
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(
        post_animate,
        post_animate_repeat,
        post_animation,
        get_status,
    ),
    components(schemas(
        AnimationRequest,
        FrameSchema,
        AnimationStarted,
        AnimationStatus,
        EngineStatus,
    )),
    tags(
        (name = "animation", description = "Start animations on the strip"),
        (name = "system", description = "System status endpoints"),
    ),
    info(
        title = "LED Strip Animation API",
        version = env!("CARGO_PKG_VERSION"),
        description = "HTTP API for playing timed animations on an addressable LED strip"
    )
)]
pub struct ApiDoc;

// ── Request/Response types ───────────────────────────────────────────

#[derive(Deserialize, utoipa::ToSchema)]
pub struct AnimationRequest {
    /// Frames played in order. Validated against the strip before playback.
    #[serde(default)]
    #[schema(value_type = Vec<FrameSchema>)]
    frames: Value,
    /// Start over after the last frame, forever (until pre-empted)
    #[serde(default)]
    #[schema(example = false, default = false)]
    repeat: bool,
}

/// One frame: a duration and the pixels it sets.
#[derive(utoipa::ToSchema)]
#[allow(dead_code)] // schema only; payloads are validated from raw JSON
struct FrameSchema {
    /// Milliseconds before the next frame. Non-negative, fractions allowed.
    #[schema(example = 100.0)]
    duration: f64,
    /// Pixel index (as a string key) to packed 0xRRGGBB color. Colors may also
    /// be decimal or "0x"-prefixed hex strings.
    pixels: HashMap<String, u32>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct AnimationStarted {
    /// Identifier of the new animation
    #[schema(value_type = u64, example = 1)]
    id: AnimationId,
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with all API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(
            SwaggerUi::new("/docs")
                .url("/api-docs/openapi.json", ApiDoc::openapi())
                .config(utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"]).validator_url("none")),
        )
        .route("/animate", post(post_animate))
        .route("/animate+repeat", post(post_animate_repeat))
        .route("/api/v1/animations", post(post_animation))
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/buffer/stream", get(ws_buffer_stream))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Handlers ─────────────────────────────────────────────────────────

/// POST /animate — play a list of frames once
#[utoipa::path(
    post,
    path = "/animate",
    tag = "animation",
    request_body = Vec<FrameSchema>,
    responses(
        (status = 200, description = "Animation started", body = AnimationStarted),
        (status = 400, description = "Payload failed validation"),
        (status = 413, description = "Body larger than 1 MB"),
        (status = 422, description = "Body is not JSON")
    )
)]
async fn post_animate(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AnimationStarted>, (StatusCode, String)> {
    let frames: Value = parse_json(&body)?;
    start_frames(&state, &frames, false).await
}

/// POST /animate+repeat — play a list of frames in a loop
#[utoipa::path(
    post,
    path = "/animate+repeat",
    tag = "animation",
    request_body = Vec<FrameSchema>,
    responses(
        (status = 200, description = "Animation started", body = AnimationStarted),
        (status = 400, description = "Payload failed validation"),
        (status = 413, description = "Body larger than 1 MB"),
        (status = 422, description = "Body is not JSON")
    )
)]
async fn post_animate_repeat(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AnimationStarted>, (StatusCode, String)> {
    let frames: Value = parse_json(&body)?;
    start_frames(&state, &frames, true).await
}

/// POST /api/v1/animations — start an animation described by `{ frames, repeat }`
#[utoipa::path(
    post,
    path = "/api/v1/animations",
    tag = "animation",
    request_body = AnimationRequest,
    responses(
        (status = 200, description = "Animation started", body = AnimationStarted),
        (status = 400, description = "Payload failed validation"),
        (status = 413, description = "Body larger than 1 MB"),
        (status = 422, description = "Body is not JSON")
    )
)]
async fn post_animation(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AnimationStarted>, (StatusCode, String)> {
    let req: AnimationRequest = parse_json(&body)?;
    start_frames(&state, &req.frames, req.repeat).await
}

/// GET /api/v1/status — live animations and the current buffer
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "system",
    responses(
        (status = 200, description = "Current engine status", body = EngineStatus),
        (status = 503, description = "Engine stopped")
    )
)]
async fn get_status(
    State(state): State<AppState>,
) -> Result<Json<EngineStatus>, (StatusCode, String)> {
    let status = state.engine.status().await.map_err(engine_gone)?;
    Ok(Json(status))
}

async fn start_frames(
    state: &AppState,
    frames: &Value,
    repeat: bool,
) -> Result<Json<AnimationStarted>, (StatusCode, String)> {
    let model = request::parse_frames(frames, repeat, state.strip).map_err(|e| {
        tracing::warn!("Rejected animation: {}", e);
        (StatusCode::BAD_REQUEST, format!("Bad request\r\n{e}"))
    })?;

    let id = state.engine.start_animation(model).await.map_err(engine_gone)?;
    Ok(Json(AnimationStarted { id }))
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, (StatusCode, String)> {
    serde_json::from_slice(body).map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Body is not valid JSON: {e}"),
        )
    })
}

fn engine_gone(e: EngineGone) -> (StatusCode, String) {
    tracing::error!("{}", e);
    (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
}

// ── WebSocket streaming ─────────────────────────────────────────────

/// GET /api/v1/buffer/stream — WebSocket feed of buffer snapshots.
///
/// Sends the current buffer on connect, then one text message for every
/// buffer the strip is shown, each a JSON array of packed colors. A client
/// that falls too far behind is resynced to the current buffer with a
/// warning in the log. Incoming messages are ignored.
async fn ws_buffer_stream(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_buffer_stream(socket, state))
}

async fn handle_buffer_stream(mut socket: WebSocket, state: AppState) {
    let Ok(mut snapshots) = state.engine.subscribe().await else {
        tracing::warn!("Buffer stream refused: engine stopped");
        return;
    };
    tracing::info!("Buffer stream client connected");
    let mut sent: u64 = 0;

    loop {
        let buffer = tokio::select! {
            buffer = snapshots.next() => match buffer {
                Some(buffer) => buffer,
                None => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::warn!("WebSocket receive error: {}", e);
                    break;
                }
                Some(Ok(_)) => continue, // Ignore text, ping/pong handled by axum
            },
        };

        let payload = match serde_json::to_string(&buffer) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Failed to encode buffer snapshot: {}", e);
                break;
            }
        };
        if socket.send(Message::Text(payload.into())).await.is_err() {
            break;
        }
        sent += 1;
    }

    tracing::info!("Buffer stream client disconnected ({} snapshots sent)", sent);
}
