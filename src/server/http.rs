//! Admin HTTP surface: topic CRUD, health, stats, and the /ws upgrade into
//! the framed protocol.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::broker::registry::RegistryError;
use crate::server::session;
use crate::FanoutEngine;

pub fn router(engine: FanoutEngine) -> Router {
    Router::new()
        .route("/topics", post(create_topic).get(list_topics))
        .route("/topics/{name}", delete(delete_topic))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

// ========================================
// TOPIC CRUD
// ========================================

#[derive(Debug, Deserialize)]
struct CreateTopicRequest {
    #[serde(default)]
    name: String,
}

async fn create_topic(
    State(engine): State<FanoutEngine>,
    Json(req): Json<CreateTopicRequest>,
) -> Response {
    match engine.registry.create(&req.name) {
        Ok(()) => (
            StatusCode::CREATED,
            Json(json!({ "message": "topic created", "topic": req.name })),
        )
            .into_response(),
        Err(err) => registry_error(err, &req.name),
    }
}

async fn delete_topic(State(engine): State<FanoutEngine>, Path(name): Path<String>) -> Response {
    match engine.registry.delete(&name) {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "message": "topic deleted", "topic": name })),
        )
            .into_response(),
        Err(err) => registry_error(err, &name),
    }
}

async fn list_topics(State(engine): State<FanoutEngine>) -> Response {
    Json(json!({ "topics": engine.registry.list() })).into_response()
}

fn registry_error(err: RegistryError, topic: &str) -> Response {
    let status = match err {
        RegistryError::InvalidName => StatusCode::BAD_REQUEST,
        RegistryError::AlreadyExists => StatusCode::CONFLICT,
        RegistryError::NotFound => StatusCode::NOT_FOUND,
    };
    (status, Json(json!({ "error": err.to_string(), "topic": topic }))).into_response()
}

// ========================================
// HEALTH + STATS
// ========================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: f64,
    topics_count: usize,
    total_subscribers: usize,
    total_messages: u64,
    total_dropped: u64,
    timestamp: String,
}

async fn health(State(engine): State<FanoutEngine>) -> Response {
    let totals = engine.metrics.snapshot().global;
    Json(HealthResponse {
        status: "healthy",
        uptime_seconds: engine.start_time.elapsed().as_secs_f64(),
        topics_count: engine.registry.topic_count(),
        total_subscribers: engine.registry.total_subscriber_count(),
        total_messages: totals.messages,
        total_dropped: totals.dropped,
        timestamp: Utc::now().to_rfc3339(),
    })
    .into_response()
}

async fn stats(State(engine): State<FanoutEngine>) -> Response {
    Json(json!({
        "topics": engine.registry.stats(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response()
}

// ========================================
// WEBSOCKET UPGRADE
// ========================================

async fn ws_handler(ws: WebSocketUpgrade, State(engine): State<FanoutEngine>) -> Response {
    ws.on_upgrade(move |socket| session::run_session(socket, engine))
}
