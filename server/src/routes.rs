use axum::{middleware, Json, Router};

use crate::auth::account;
use crate::auth::middleware::JwtSecret;
use crate::chat::{groups, messages};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoints (auth via query param, not JWT header)
    let ws_routes = Router::new()
        .route("/ws", axum::routing::get(ws_handler::ws_upgrade))
        .route("/ws/call/{friend}", axum::routing::get(ws_handler::call_upgrade));

    // Account routes (no auth required)
    let account_routes = Router::new()
        .route("/register", axum::routing::post(account::register))
        .route("/token", axum::routing::post(account::login));

    // Authenticated routes; the AuthUser extractor validates the bearer token and account
    let message_routes = Router::new()
        .route("/send", axum::routing::post(messages::send_message))
        .route("/send/voice", axum::routing::post(messages::send_voice_message))
        .route("/messages", axum::routing::get(messages::list_messages));

    let group_routes = Router::new()
        .route("/groups/create", axum::routing::post(groups::create_group))
        .route("/groups/join", axum::routing::post(groups::join_group))
        .route("/groups/list", axum::routing::get(groups::list_groups))
        .route("/groups/{group_id}", axum::routing::delete(groups::delete_group))
        .route(
            "/groups/message/send",
            axum::routing::post(messages::send_group_message),
        )
        .route(
            "/groups/{group_id}/messages",
            axum::routing::get(messages::list_group_messages),
        );

    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(account_routes)
        .merge(message_routes)
        .merge(group_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Liveness plus a snapshot of realtime load.
async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "online_users": state.connections.online_count(),
        "active_calls": state.calls.session_count(),
    }))
}
