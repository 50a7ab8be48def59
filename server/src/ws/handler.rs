use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth;
use crate::call::CallKey;
use crate::state::AppState;
use crate::ws::actor::{self, Endpoint};

/// Query parameters for WebSocket connection.
/// Auth is via query param ?token=JWT. A missing token is still upgraded so
/// the client receives a proper close code instead of an HTTP error.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// RFC 6455 policy violation: sent for missing, invalid or unknown credentials.
const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// GET /ws?token=JWT
/// Presence channel: receives pushed chat events and addressed signals.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(state, params.token, ws, |_| Endpoint::Presence).await
}

/// GET /ws/call/{friend}?token=JWT
/// Call channel: joins the session shared with `friend` and relays
/// signaling and media frames to the other participants.
pub async fn call_upgrade(
    State(state): State<AppState>,
    Path(friend): Path<String>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(state, params.token, ws, move |username| {
        Endpoint::Call(CallKey::new(username, &friend))
    })
    .await
}

/// Authenticate, then either spawn the connection actor or upgrade and
/// immediately close with a policy-violation code.
async fn upgrade<F>(state: AppState, token: Option<String>, ws: WebSocketUpgrade, endpoint: F) -> Response
where
    F: FnOnce(&str) -> Endpoint,
{
    match auth::resolve_authenticated_user(&state, token.as_deref()).await {
        Ok(username) => {
            let endpoint = endpoint(&username);
            tracing::info!(
                username = %username,
                endpoint = %endpoint,
                "WebSocket connection authenticated"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, username, endpoint))
        }
        Err(err) => {
            tracing::warn!(
                close_code = CLOSE_POLICY_VIOLATION,
                error = %err,
                "WebSocket auth failed"
            );

            // Upgrade the connection, then immediately close with the error code
            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: CLOSE_POLICY_VIOLATION,
                    reason: "Policy violation".into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
