//! REST endpoints for direct and group messages.
//!
//! Every send persists first, then pushes a live event to whoever is online.
//! Delivery is best effort; offline recipients read the stored history.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::AuthUser;
use crate::chat::events::{audio_url, DeliveryEvent, MessagePayload};
use crate::db::models::{DirectMessage, GroupMessage};
use crate::db::store::{self, StoreResult};
use crate::state::AppState;
use crate::ws::broadcast::{deliver_to_group, deliver_to_user};

/// Maximum message content length (chars).
const MAX_CONTENT_LENGTH: usize = 4000;

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub receiver: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct SendVoiceRequest {
    pub receiver: String,
    pub audio_file_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendGroupMessageRequest {
    pub group_id: String,
    pub content: Option<String>,
    pub audio_file_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub message: &'static str,
    /// Whether the receiver had a live connection that accepted the event.
    pub delivered: bool,
}

#[derive(Debug, Serialize)]
pub struct GroupSendResponse {
    pub message: &'static str,
    /// Number of members the event was pushed to.
    pub delivered: usize,
}

// --- Helpers ---

/// Run store work on the blocking pool, mapping panics and store errors to 500.
async fn blocking<T, F>(f: F) -> Result<T, StatusCode>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StatusCode> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
}

fn internal<T>(result: StoreResult<T>) -> Result<T, StatusCode> {
    result.map_err(|e| {
        tracing::error!(error = %e, "Store operation failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

fn validate_content(content: &str) -> Result<String, StatusCode> {
    let content = content.trim();
    if content.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }
    Ok(content.to_string())
}

/// Persist a direct message after checking the receiver exists.
async fn store_direct(
    state: &AppState,
    sender: String,
    receiver: String,
    content: Option<String>,
    audio_file_id: Option<String>,
) -> Result<DirectMessage, StatusCode> {
    let db = state.db.clone();
    blocking(move || {
        if !internal(store::user_exists(&db, &receiver))? {
            return Err(StatusCode::NOT_FOUND);
        }
        internal(store::insert_direct_message(
            &db,
            &sender,
            &receiver,
            content.as_deref(),
            audio_file_id.as_deref(),
        ))
    })
    .await
}

fn direct_payload(message: DirectMessage) -> MessagePayload {
    MessagePayload {
        sender: message.sender,
        receiver: Some(message.receiver),
        group_id: None,
        content: message.content,
        audio_url: message.audio_file_id.as_deref().map(audio_url),
        timestamp: message.timestamp,
    }
}

fn group_payload(message: GroupMessage) -> MessagePayload {
    MessagePayload {
        sender: message.sender,
        receiver: None,
        group_id: Some(message.group_id),
        content: message.content,
        audio_url: message.audio_file_id.as_deref().map(audio_url),
        timestamp: message.timestamp,
    }
}

// --- Handlers ---

/// POST /send
/// Store a text message and push `new_message` to the receiver if online.
pub async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<SendResponse>, StatusCode> {
    let content = validate_content(&body.content)?;
    let message = store_direct(&state, user.username, body.receiver, Some(content), None).await?;

    let receiver = message.receiver.clone();
    let event = DeliveryEvent::NewMessage(direct_payload(message));
    let delivered = deliver_to_user(&state.connections, &receiver, &event);

    tracing::debug!(receiver = %receiver, delivered, "Direct message stored");
    Ok(Json(SendResponse {
        message: "Message sent",
        delivered,
    }))
}

/// POST /send/voice
/// Store a reference to an uploaded audio blob and push `new_voice_message`.
pub async fn send_voice_message(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<SendVoiceRequest>,
) -> Result<Json<SendResponse>, StatusCode> {
    let audio_file_id = body.audio_file_id.trim().to_string();
    if audio_file_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let message = store_direct(&state, user.username, body.receiver, None, Some(audio_file_id)).await?;

    let receiver = message.receiver.clone();
    let event = DeliveryEvent::NewVoiceMessage(direct_payload(message));
    let delivered = deliver_to_user(&state.connections, &receiver, &event);

    Ok(Json(SendResponse {
        message: "Voice message sent",
        delivered,
    }))
}

/// GET /messages
/// Direct messages sent or received by the caller, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<DirectMessage>>, StatusCode> {
    let db = state.db.clone();
    let messages = blocking(move || internal(store::messages_for_user(&db, &user.username))).await?;
    Ok(Json(messages))
}

/// POST /groups/message/send
/// Store a group message and push it to every online member except the sender.
pub async fn send_group_message(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<SendGroupMessageRequest>,
) -> Result<Json<GroupSendResponse>, StatusCode> {
    let content = match body.content.as_deref() {
        Some(content) => Some(validate_content(content)?),
        None => None,
    };
    let audio_file_id = body
        .audio_file_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());
    if content.is_none() && audio_file_id.is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let sender = user.username.clone();
    let group_id = body.group_id;
    let (message, members) = blocking(move || {
        if !internal(store::group_exists(&db, &group_id))? {
            return Err(StatusCode::NOT_FOUND);
        }
        if !internal(store::is_group_member(&db, &group_id, &sender))? {
            return Err(StatusCode::FORBIDDEN);
        }
        let message = internal(store::insert_group_message(
            &db,
            &group_id,
            &sender,
            content.as_deref(),
            audio_file_id.as_deref(),
        ))?;
        let members = internal(store::group_members(&db, &group_id))?;
        Ok((message, members))
    })
    .await?;

    let group_id = message.group_id.clone();
    let payload = group_payload(message);
    let event = if payload.audio_url.is_some() {
        DeliveryEvent::NewGroupVoiceMessage(payload)
    } else {
        DeliveryEvent::NewMessage(payload)
    };
    let delivered = deliver_to_group(&state.connections, &members, &user.username, &event);

    tracing::debug!(group_id = %group_id, delivered, "Group message stored");
    Ok(Json(GroupSendResponse {
        message: "Message sent to group",
        delivered,
    }))
}

/// GET /groups/{group_id}/messages
/// Group history, visible to members only.
pub async fn list_group_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(group_id): Path<String>,
) -> Result<Json<Vec<GroupMessage>>, StatusCode> {
    let db = state.db.clone();
    let messages = blocking(move || {
        if !internal(store::group_exists(&db, &group_id))? {
            return Err(StatusCode::NOT_FOUND);
        }
        if !internal(store::is_group_member(&db, &group_id, &user.username))? {
            return Err(StatusCode::FORBIDDEN);
        }
        internal(store::group_messages(&db, &group_id))
    })
    .await?;
    Ok(Json(messages))
}
