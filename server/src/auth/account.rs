//! Account registration and password login.
//!
//! The server is its own token issuer: `/token` exchanges a username and
//! password for an HS256 access token accepted by every other endpoint.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::auth::jwt::{issue_access_token, ACCESS_TOKEN_TTL_SECS};
use crate::auth::password::{hash_password, verify_password};
use crate::db::store;
use crate::state::AppState;

/// Maximum username length (chars).
const MAX_USERNAME_LENGTH: usize = 32;
/// Minimum password length (chars).
const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

/// Usernames appear in URL paths (`/ws/call/{friend}`) and call keys.
fn valid_username(username: &str) -> bool {
    !username.is_empty()
        && username.chars().count() <= MAX_USERNAME_LENGTH
        && username
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// POST /register
/// Create an account. 400 on invalid input or an existing username.
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<(StatusCode, Json<RegisterResponse>), StatusCode> {
    if !valid_username(&body.username) || body.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let username = body.username.clone();
    tokio::task::spawn_blocking(move || {
        if store::user_exists(&db, &username).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)? {
            return Err(StatusCode::BAD_REQUEST);
        }
        let hash = hash_password(&body.password).map_err(|e| {
            tracing::error!(error = %e, "Password hashing failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        // A concurrent registration of the same name loses on the primary key.
        store::create_user(&db, &username, &hash).map_err(|_| StatusCode::BAD_REQUEST)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    tracing::info!(username = %body.username, "User registered");
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered",
        }),
    ))
}

/// POST /token
/// Exchange credentials for an access token. Unknown user and wrong password
/// are indistinguishable (401).
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<Json<TokenResponse>, StatusCode> {
    let db = state.db.clone();
    let username = body.username.clone();
    let authenticated = tokio::task::spawn_blocking(move || {
        let stored = store::password_hash(&db, &username).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok::<_, StatusCode>(stored.is_some_and(|hash| verify_password(&body.password, &hash)))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    if !authenticated {
        tracing::debug!(username = %body.username, "Login rejected");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let access_token = issue_access_token(&state.jwt_secret, &body.username, ACCESS_TOKEN_TTL_SECS)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
    }))
}
