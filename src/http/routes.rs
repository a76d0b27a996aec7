//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::game::GameSetup;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/games", get(list_games_handler))
        .route("/games/:id/setup", post(update_setup_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(state.config.client_origin.as_deref()))
        .with_state(state)
}

/// CORS configuration - comma-separated origins, or any origin when unset
fn cors_layer(client_origin: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    match client_origin {
        Some(origins) => {
            let allowed_origins: Vec<header::HeaderValue> = origins
                .split(',')
                .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
                .collect();
            cors.allow_origin(allowed_origins).allow_credentials(true)
        }
        None => cors.allow_origin(Any),
    }
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_games: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_games: state.game_registry.active_games(),
    })
}

// ============================================================================
// Game endpoints
// ============================================================================

#[derive(Serialize)]
struct GameListResponse {
    games: Vec<Uuid>,
}

async fn list_games_handler(State(state): State<AppState>) -> Json<GameListResponse> {
    Json(GameListResponse {
        games: state.game_registry.ids(),
    })
}

#[derive(Serialize)]
struct UpdateSetupResponse {
    status: &'static str,
    game_id: Uuid,
}

async fn update_setup_handler(
    State(state): State<AppState>,
    Path(game_id): Path<Uuid>,
    Json(setup): Json<GameSetup>,
) -> Result<Json<UpdateSetupResponse>, AppError> {
    let game = state
        .game_registry
        .get(&game_id)
        .ok_or_else(|| AppError::NotFound(format!("Game {} is not running", game_id)))?;

    game.update_setup(setup)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    info!(game_id = %game_id, "Setup update accepted over HTTP");

    Ok(Json(UpdateSetupResponse {
        status: "queued",
        game_id,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::state::tests::{game_config, test_state};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn post_setup(id: Uuid, setup: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(format!("/games/{}/setup", id))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(setup.to_string()))
            .unwrap()
    }

    fn setup_json(edge_length: u32, tasks: u32) -> Value {
        json!({
            "edgeLength": edge_length,
            "maxNumOfTicks": 50,
            "speed": 100,
            "numOfTasksPerTick": tasks
        })
    }

    #[tokio::test]
    async fn test_health() {
        let router = build_router(test_state());
        let request = Request::get("/health").body(Body::empty()).unwrap();

        let (status, body) = call(router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_games"], 0);
    }

    #[tokio::test]
    async fn test_list_and_update_running_game() {
        let state = test_state();
        let (handle, _events) = state.spawn_game(game_config(1000, 200)).unwrap();
        let router = build_router(state);

        let request = Request::get("/games").body(Body::empty()).unwrap();
        let (status, body) = call(router.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["games"], json!([handle.id]));

        let (status, body) = call(router.clone(), post_setup(handle.id, setup_json(4, 2))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "queued");

        let (status, body) = call(router, post_setup(handle.id, setup_json(4, 0))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("task"));
    }

    #[tokio::test]
    async fn test_update_unknown_game() {
        let router = build_router(test_state());
        let (status, body) = call(router, post_setup(Uuid::new_v4(), setup_json(4, 1))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not running"));
    }
}
