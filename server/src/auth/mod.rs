pub mod account;
pub mod jwt;
pub mod middleware;
pub mod password;

use crate::db::store;
use crate::error::RelayError;
use crate::state::AppState;

/// Resolve the username behind a connection credential.
///
/// The token must be a valid access token and its subject must be a known
/// user. Called once, before a WebSocket connection is admitted.
pub async fn resolve_authenticated_user(state: &AppState, token: Option<&str>) -> Result<String, RelayError> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RelayError::AuthFailure("missing token".to_string()))?;

    let claims = jwt::validate_access_token(&state.jwt_secret, token)
        .map_err(|e| RelayError::AuthFailure(e.to_string()))?;

    let db = state.db.clone();
    let username = claims.sub.clone();
    let exists = tokio::task::spawn_blocking(move || store::user_exists(&db, &username))
        .await
        .map_err(|e| RelayError::AuthFailure(format!("user lookup failed: {}", e)))?
        .map_err(|e| RelayError::AuthFailure(format!("user lookup failed: {}", e)))?;

    if !exists {
        return Err(RelayError::AuthFailure(format!("unknown user {}", claims.sub)));
    }
    Ok(claims.sub)
}
