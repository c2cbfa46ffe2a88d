//! The HTTP surface: login and logout, the matchmaking queue, the leaderboard, the web
//! socket upgrade and the operational endpoints.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{FromRequestParts, Query, State, WebSocketUpgrade};
use axum::http::request::Parts;
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use protocol::{
    CREDENTIAL_QUERY_PARAM, DEFAULT_LEADERBOARD_LIMIT, HealthResponse, LeaderboardEntry,
    LoginRequest, LoginResponse, MAX_LEADERBOARD_LIMIT, MetricsResponse, QueueStatusResponse,
};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::model::Player;
use crate::socket::serve_connection;

/// Builds the complete router.
pub fn router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(config.allowed_origins()))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let mut app = Router::new()
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/logout", post(logout_handler))
        .route("/api/matchmaking/queue", post(join_queue_handler))
        .route("/api/matchmaking/queue/leave", delete(leave_queue_handler))
        .route("/api/matchmaking/status", get(queue_status_handler))
        .route("/api/leaderboard", get(leaderboard_handler))
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    if let Some(dir) = &config.static_dir {
        app = app.fallback_service(
            ServeDir::new(dir).not_found_service(ServeFile::new(dir.join("index.html"))),
        );
    }

    app.layer(cors).layer(TraceLayer::new_for_http())
}

/// The player behind the `Authorization: Bearer <credential>` header.
/// Every authenticated request counts as activity.
pub struct AuthenticatedPlayer(pub Player);

impl FromRequestParts<Arc<AppState>> for AuthenticatedPlayer {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(ServerError::Unauthorized {
                reason: "missing authorization header",
            })?;
        let credential = value
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|credential| !credential.is_empty())
            .ok_or(ServerError::Unauthorized {
                reason: "malformed authorization header",
            })?;

        let player = state.auth.validate_credential(credential).await?;
        state.auth.touch_activity(&player.id).await?;
        Ok(AuthenticatedPlayer(player))
    }
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ServerError> {
    let player = state.auth.login(&request.username).await?;
    Ok(Json(LoginResponse {
        player_id: player.id.to_string(),
        username: player.username,
        session_token: player.credential,
    }))
}

async fn logout_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPlayer(player): AuthenticatedPlayer,
) -> Result<StatusCode, ServerError> {
    state.sign_out(&player.id).await?;
    Ok(StatusCode::OK)
}

async fn join_queue_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPlayer(player): AuthenticatedPlayer,
) -> Result<Json<QueueStatusResponse>, ServerError> {
    state.matchmaking.join_queue(&player.id).await?;
    Ok(Json(state.matchmaking.queue_status(&player.id).await?))
}

async fn leave_queue_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPlayer(player): AuthenticatedPlayer,
) -> Result<StatusCode, ServerError> {
    state.matchmaking.leave_queue(&player.id).await?;
    Ok(StatusCode::OK)
}

async fn queue_status_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPlayer(player): AuthenticatedPlayer,
) -> Result<Json<QueueStatusResponse>, ServerError> {
    Ok(Json(state.matchmaking.queue_status(&player.id).await?))
}

#[derive(Deserialize)]
struct LeaderboardQuery {
    limit: Option<String>,
}

/// The requested amount of entries, unparsable or out of range values fall back to the default.
fn leaderboard_limit(requested: Option<&str>) -> usize {
    requested
        .and_then(|limit| limit.trim().parse::<usize>().ok())
        .filter(|limit| (1..=MAX_LEADERBOARD_LIMIT).contains(limit))
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
}

async fn leaderboard_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, ServerError> {
    let limit = leaderboard_limit(query.limit.as_deref());
    Ok(Json(state.directory.leaderboard(limit).await?))
}

/// Checks the credential from the query and upgrades to a web socket. The credential is
/// checked before the upgrade, so a bad one is answered with a plain 401.
async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(credential) = params
        .get(CREDENTIAL_QUERY_PARAM)
        .filter(|credential| !credential.is_empty())
    else {
        return ServerError::Unauthorized {
            reason: "missing token",
        }
        .into_response();
    };
    let player = match state.auth.validate_credential(credential).await {
        Ok(player) => player,
        Err(err) => return err.into_response(),
    };

    match upgrade {
        Ok(upgrade) => upgrade
            .on_upgrade(move |socket| serve_connection(socket, state, player.id))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let mut checks = BTreeMap::new();
    let mut healthy = true;
    match state.health.check().await {
        Ok(()) => {
            checks.insert("storage".to_string(), "ok".to_string());
        }
        Err(err) => {
            tracing::warn!(?err, "Storage health check failed.");
            healthy = false;
            checks.insert("storage".to_string(), format!("error: {err}"));
        }
    }
    checks.insert("connection_registry".to_string(), "ok".to_string());

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks,
        websocket_connections: state.connections.count().await,
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        websocket_connections: state.connections.count().await,
        uptime_secs: state.started_at.elapsed().as_secs(),
        timestamp: Utc::now().to_rfc3339(),
    })
}
