//! Group lifecycle: create, join by invite key, list, delete.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::AuthUser;
use crate::db::models::GroupInfo;
use crate::db::store;
use crate::state::AppState;

/// Maximum group name length (chars).
const MAX_NAME_LENGTH: usize = 100;

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CreateGroupResponse {
    pub group_id: String,
    pub invite_key: String,
}

#[derive(Debug, Deserialize)]
pub struct JoinGroupRequest {
    pub invite_key: String,
}

#[derive(Debug, Serialize)]
pub struct JoinGroupResponse {
    pub group_id: String,
    pub name: String,
}

/// POST /groups/create
/// The caller becomes admin and first member.
pub async fn create_group(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<CreateGroupResponse>), StatusCode> {
    let name = body.name.trim().to_string();
    if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let group = tokio::task::spawn_blocking(move || store::create_group(&db, &name, &user.username))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create group");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    tracing::info!(group_id = %group.id, admin = %group.admin, "Group created");
    Ok((
        StatusCode::CREATED,
        Json(CreateGroupResponse {
            group_id: group.id,
            invite_key: group.invite_key,
        }),
    ))
}

/// POST /groups/join
/// Join the group owning `invite_key`. Joining twice is a no-op.
pub async fn join_group(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<JoinGroupRequest>,
) -> Result<Json<JoinGroupResponse>, StatusCode> {
    let db = state.db.clone();
    let group = tokio::task::spawn_blocking(move || {
        let group = store::group_by_invite_key(&db, &body.invite_key)?;
        if let Some(group) = &group {
            store::add_group_member(&db, &group.id, &user.username)?;
        }
        Ok::<_, Box<dyn std::error::Error + Send + Sync>>(group)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to join group");
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(JoinGroupResponse {
        group_id: group.id,
        name: group.name,
    }))
}

#[derive(Debug, Serialize)]
pub struct DeleteGroupResponse {
    pub message: &'static str,
}

/// GET /groups/list
/// Groups the caller belongs to, with member lists.
pub async fn list_groups(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<GroupInfo>>, StatusCode> {
    let db = state.db.clone();
    let groups = tokio::task::spawn_blocking(move || store::groups_for_user(&db, &user.username))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to list groups");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(groups))
}

/// DELETE /groups/{group_id}
/// Admin only. Membership and history are removed with the group.
pub async fn delete_group(
    State(state): State<AppState>,
    user: AuthUser,
    Path(group_id): Path<String>,
) -> Result<Json<DeleteGroupResponse>, StatusCode> {
    let db = state.db.clone();
    let gid = group_id.clone();
    tokio::task::spawn_blocking(move || {
        let admin = store::group_admin(&db, &gid)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;
        if admin != user.username {
            return Err(StatusCode::FORBIDDEN);
        }
        store::delete_group(&db, &gid).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    tracing::info!(group_id = %group_id, "Group deleted");
    Ok(Json(DeleteGroupResponse {
        message: "Group deleted successfully",
    }))
}
