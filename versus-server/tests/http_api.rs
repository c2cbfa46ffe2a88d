use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use protocol::{HealthResponse, LeaderboardEntry, LoginResponse, MetricsResponse, QueueStatusResponse};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;
use versus_server::model::PlayerId;
use versus_server::{AppState, ServerConfig, routes};

fn app() -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::in_memory());
    (routes::router(state.clone(), &ServerConfig::default()), state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> T {
    serde_json::from_slice(body).unwrap()
}

fn login_request(username: &str) -> Request<Body> {
    Request::post("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "username": username }).to_string()))
        .unwrap()
}

fn authorized(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

async fn login(app: &Router, username: &str) -> LoginResponse {
    let (status, body) = send(app, login_request(username)).await;
    assert_eq!(status, StatusCode::OK);
    decode(&body)
}

#[tokio::test]
async fn login_returns_credential_and_rejects_duplicates() {
    let (app, _) = app();
    let alice = login(&app, "alice").await;
    assert_eq!(alice.username, "alice");
    assert_eq!(alice.session_token.len(), 64);

    let (status, body) = send(&app, login_request("alice")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        String::from_utf8(body).unwrap(),
        "Username is already in use. Please choose a different username."
    );

    let (status, _) = send(&app, login_request("")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_response_uses_camel_case() {
    let (app, _) = app();
    let (_, body) = send(&app, login_request("alice")).await;
    let raw: serde_json::Value = decode(&body);
    assert!(raw.get("playerId").is_some());
    assert!(raw.get("sessionToken").is_some());
}

#[tokio::test]
async fn protected_routes_need_a_valid_bearer_token() {
    let (app, _) = app();
    let request = Request::get("/api/matchmaking/status").body(Body::empty()).unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::get("/api/matchmaking/status")
        .header(header::AUTHORIZATION, "Basic abc")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, authorized("GET", "/api/matchmaking/status", "nope")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn queue_join_status_and_leave() {
    let (app, _) = app();
    let alice = login(&app, "alice").await;
    let token = &alice.session_token;

    let (status, body) = send(&app, authorized("POST", "/api/matchmaking/queue", token)).await;
    assert_eq!(status, StatusCode::OK);
    let joined: QueueStatusResponse = decode(&body);
    assert_eq!(
        joined,
        QueueStatusResponse {
            position: 0,
            in_queue: true
        }
    );

    let (status, _) = send(&app, authorized("DELETE", "/api/matchmaking/queue/leave", token)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, authorized("GET", "/api/matchmaking/status", token)).await;
    let raw: serde_json::Value = decode(&body);
    assert_eq!(raw, json!({ "position": -1, "inQueue": false }));
}

#[tokio::test]
async fn logout_frees_the_username_and_invalidates_the_token() {
    let (app, _) = app();
    let alice = login(&app, "alice").await;

    let (status, _) = send(&app, authorized("POST", "/api/auth/logout", &alice.session_token)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, authorized("POST", "/api/auth/logout", &alice.session_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let again = login(&app, "alice").await;
    assert_ne!(again.player_id, alice.player_id);
}

#[tokio::test]
async fn leaderboard_lists_players_with_finished_games() {
    let (app, state) = app();
    for (name, high_score) in [("ann", 300), ("ben", 900), ("cid", 0)] {
        let response = login(&app, name).await;
        if high_score > 0 {
            state
                .directory
                .modify(&PlayerId::new(response.player_id), |player| {
                    player.stats.record(true, high_score)
                })
                .await
                .unwrap();
        }
    }

    let request = Request::get("/api/leaderboard").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let board: Vec<LeaderboardEntry> = decode(&body);
    let names: Vec<_> = board.iter().map(|entry| entry.username.as_str()).collect();
    assert_eq!(names, ["ben", "ann"]);
    assert_eq!(board[0].rank, 1);

    let request = Request::get("/api/leaderboard?limit=1").body(Body::empty()).unwrap();
    let (_, body) = send(&app, request).await;
    assert_eq!(decode::<Vec<LeaderboardEntry>>(&body).len(), 1);

    let request = Request::get("/api/leaderboard?limit=500").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decode::<Vec<LeaderboardEntry>>(&body).len(), 2);
}

#[tokio::test]
async fn websocket_endpoint_checks_the_token_before_upgrading() {
    let (app, _) = app();
    let request = Request::get("/ws").body(Body::empty()).unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::get("/ws?token=bogus").body(Body::empty()).unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A valid token without upgrade headers is not a web socket request.
    let alice = login(&app, "alice").await;
    let request = Request::get(format!("/ws?token={}", alice.session_token))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert!(status.is_client_error());
    assert_ne!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_and_metrics_report_connections() {
    let (app, _) = app();
    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = decode(&body);
    assert_eq!(health.status, "healthy");
    assert_eq!(health.checks["storage"], "ok");
    assert_eq!(health.checks["connection_registry"], "ok");
    assert_eq!(health.websocket_connections, 0);

    let request = Request::get("/metrics").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let metrics: MetricsResponse = decode(&body);
    assert_eq!(metrics.websocket_connections, 0);
}
