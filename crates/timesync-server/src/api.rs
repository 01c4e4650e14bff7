use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use timesync_shared::progress::{compute_view_with, compute_views, TimerView};
use timesync_shared::types::{TimerId, UserId};
use timesync_store::{Repository, TimerFilter};

use crate::auth::{AuthService, Session};
use crate::broadcast::SyncBroadcaster;
use crate::config::ServerConfig;
use crate::connections::{ConnectionManager, ConnectionRegistry};
use crate::error::ServerError;
use crate::session::SessionRegistry;
use crate::timers::{SharedRepository, TimerStore};
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TimerStore>,
    pub auth: Arc<AuthService>,
    pub sessions: Arc<SessionRegistry>,
    pub connections: Arc<ConnectionManager>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire every subsystem on top of `repo`.
    pub fn build(config: ServerConfig, repo: Box<dyn Repository>) -> Self {
        let repo: SharedRepository = Arc::new(Mutex::new(repo));
        let sessions = Arc::new(SessionRegistry::new(config.session_ttl));
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(SyncBroadcaster::new(
            registry.clone(),
            config.broadcast_scope,
            config.elapsed_mode,
        ));
        let store = Arc::new(TimerStore::new(
            repo.clone(),
            broadcaster.clone(),
            config.max_description_len,
        ));
        let connections = Arc::new(ConnectionManager::new(
            registry,
            store.clone(),
            sessions.clone(),
            broadcaster,
            config.tick_interval,
        ));
        let auth = Arc::new(AuthService::new(repo, sessions.clone()));

        Self {
            store,
            auth,
            sessions,
            connections,
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/signup", post(signup))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/timers", get(list_timers).post(create_timer))
        .route("/api/timers/:id/stop", post(stop_timer))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTimerRequest {
    #[serde(alias = "userId")]
    owner_id: Option<UserId>,
    description: Option<String>,
    duration: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTimersQuery {
    active: Option<bool>,
    owner_id: Option<UserId>,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ServerError> {
    body.map(|Json(inner)| inner)
        .map_err(|rejection| ServerError::BadRequest(rejection.body_text()))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn signup(
    State(state): State<AppState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<(StatusCode, Json<Session>), ServerError> {
    let creds = json_body(body)?;
    let session = state.auth.signup(&creds.username, &creds.password).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn login(
    State(state): State<AppState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<Session>, ServerError> {
    let creds = json_body(body)?;
    let session = state.auth.login(&creds.username, &creds.password).await?;
    Ok(Json(session))
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, ServerError> {
    let token = bearer_token(&headers).ok_or(ServerError::Unauthorized)?;
    if !state.sessions.revoke(token).await {
        return Err(ServerError::Unauthorized);
    }
    Ok(Json(MessageResponse {
        message: "Logged out",
    }))
}

async fn list_timers(
    State(state): State<AppState>,
    Query(query): Query<ListTimersQuery>,
) -> Result<Json<Vec<TimerView>>, ServerError> {
    let filter = TimerFilter {
        owner_id: query.owner_id,
        is_active: query.active,
    };
    let timers = state.store.list(filter).await?;
    Ok(Json(compute_views(
        &timers,
        Utc::now(),
        state.config.elapsed_mode,
    )))
}

async fn create_timer(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateTimerRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TimerView>), ServerError> {
    let req = json_body(body)?;

    let caller = match bearer_token(&headers) {
        Some(token) => Some(state.sessions.resolve(token).await?),
        None => None,
    };

    let owner_id = match (req.owner_id, caller) {
        (Some(owner), Some(caller)) if owner != caller => return Err(ServerError::Unauthorized),
        (Some(owner), _) => owner,
        (None, Some(caller)) => caller,
        (None, None) => return Err(ServerError::validation("ownerId", "is required")),
    };
    let description = req
        .description
        .ok_or_else(|| ServerError::validation("description", "is required"))?;

    let timer = state
        .store
        .create(owner_id, &description, req.duration)
        .await?;
    let view = compute_view_with(&timer, Utc::now(), state.config.elapsed_mode);
    Ok((StatusCode::CREATED, Json(view)))
}

async fn stop_timer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ServerError> {
    // An unparsable id cannot name a stored timer.
    let id = TimerId::parse_str(&id).map_err(|_| ServerError::NotFound("Timer".into()))?;
    state.store.stop(id).await?;
    Ok(Json(MessageResponse {
        message: "Timer stopped",
    }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use timesync_store::MemoryStore;
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState::build(ServerConfig::default(), Box::new(MemoryStore::new()))
    }

    async fn call(
        state: &AppState,
        method: &str,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let resp = build_router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn signed_up(state: &AppState, username: &str) -> (String, String) {
        let (status, body) = call(
            state,
            "POST",
            "/api/signup",
            None,
            Some(json!({ "username": username, "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        (
            body["sessionId"].as_str().unwrap().to_string(),
            body["userId"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&state(), "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_signup_login_logout() {
        let state = state();
        let (_, user_id) = signed_up(&state, "alice").await;

        let (status, body) = call(
            &state,
            "POST",
            "/api/signup",
            None,
            Some(json!({ "username": "alice", "password": "another one" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].is_string());

        let (status, body) = call(
            &state,
            "POST",
            "/api/login",
            None,
            Some(json!({ "username": "alice", "password": "wrong password" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid credentials");

        let (status, body) = call(
            &state,
            "POST",
            "/api/login",
            None,
            Some(json!({ "username": "alice", "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["userId"], user_id.as_str());
        let token = body["sessionId"].as_str().unwrap().to_string();

        let (status, _) = call(&state, "POST", "/api/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&state, "POST", "/api/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signup_validation_names_field() {
        let (status, body) = call(
            &state(),
            "POST",
            "/api/signup",
            None,
            Some(json!({ "username": "bob", "password": "short" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "password");
    }

    #[tokio::test]
    async fn test_create_and_stop_timer() {
        let state = state();
        let (_, user_id) = signed_up(&state, "alice").await;

        let (status, timer) = call(
            &state,
            "POST",
            "/api/timers",
            None,
            Some(json!({ "userId": user_id, "description": "brew coffee", "duration": 300000 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(timer["description"], "brew coffee");
        assert_eq!(timer["ownerId"], user_id.as_str());
        assert_eq!(timer["isActive"], true);
        assert_eq!(timer["duration"], 300000);

        let id = timer["id"].as_str().unwrap();
        let (status, body) =
            call(&state, "POST", &format!("/api/timers/{id}/stop"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Timer stopped");

        // Stopping again is not an error.
        let (status, _) =
            call(&state, "POST", &format!("/api/timers/{id}/stop"), None, None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, active) = call(&state, "GET", "/api/timers?active=true", None, None).await;
        assert_eq!(active.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_create_defaults_owner_to_bearer() {
        let state = state();
        let (token, user_id) = signed_up(&state, "alice").await;

        let (status, timer) = call(
            &state,
            "POST",
            "/api/timers",
            Some(&token),
            Some(json!({ "description": "tea" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(timer["ownerId"], user_id.as_str());
        assert!(timer["duration"].is_null());
    }

    #[tokio::test]
    async fn test_create_rejects_mismatched_bearer() {
        let state = state();
        let (token, _) = signed_up(&state, "alice").await;
        let (_, bob) = signed_up(&state, "bobby").await;

        let (status, _) = call(
            &state,
            "POST",
            "/api/timers",
            Some(&token),
            Some(json!({ "ownerId": bob, "description": "not mine" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(
            &state,
            "POST",
            "/api/timers",
            Some("not-a-session"),
            Some(json!({ "ownerId": bob, "description": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_validation_errors() {
        let state = state();
        let (_, user_id) = signed_up(&state, "alice").await;

        let (status, body) = call(
            &state,
            "POST",
            "/api/timers",
            None,
            Some(json!({ "ownerId": user_id, "description": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "description");

        let (status, body) = call(
            &state,
            "POST",
            "/api/timers",
            None,
            Some(json!({ "ownerId": uuid::Uuid::new_v4(), "description": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "ownerId");

        let (status, body) = call(
            &state,
            "POST",
            "/api/timers",
            None,
            Some(json!({ "description": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "ownerId");

        let (status, _) = call(
            &state,
            "POST",
            "/api/timers",
            None,
            Some(json!({ "ownerId": user_id, "description": "x", "duration": -5 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_created_duration_matches_sqlite_listing() {
        let state = AppState::build(
            ServerConfig::default(),
            Box::new(timesync_store::Database::open_in_memory().unwrap()),
        );
        let (_, user_id) = signed_up(&state, "alice").await;

        let (status, body) = call(
            &state,
            "POST",
            "/api/timers",
            None,
            Some(json!({ "ownerId": user_id, "description": "x", "duration": u64::MAX })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "duration");

        let max = crate::timers::MAX_DURATION_MS;
        let (status, created) = call(
            &state,
            "POST",
            "/api/timers",
            None,
            Some(json!({ "ownerId": user_id, "description": "x", "duration": max })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, listed) = call(&state, "GET", "/api/timers", None, None).await;
        let listed = listed.as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["duration"], created["duration"]);
    }

    #[tokio::test]
    async fn test_stop_unknown_timer_is_not_found() {
        let state = state();
        let (status, _) = call(
            &state,
            "POST",
            &format!("/api/timers/{}/stop", uuid::Uuid::new_v4()),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&state, "POST", "/api/timers/garbage/stop", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_filters_by_owner() {
        let state = state();
        let (_, alice) = signed_up(&state, "alice").await;
        let (_, bob) = signed_up(&state, "bobby").await;

        for (owner, desc) in [(&alice, "a1"), (&alice, "a2"), (&bob, "b1")] {
            let (status, _) = call(
                &state,
                "POST",
                "/api/timers",
                None,
                Some(json!({ "ownerId": owner, "description": desc })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (_, all) = call(&state, "GET", "/api/timers", None, None).await;
        assert_eq!(all.as_array().unwrap().len(), 3);

        let (status, mine) =
            call(&state, "GET", &format!("/api/timers?ownerId={alice}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        let mine = mine.as_array().unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|t| t["ownerId"] == alice.as_str()));
        assert!(mine.iter().all(|t| t["elapsed"].is_u64()));
    }
}
