//! Presence fan-out: best-effort push of JSON events to online users.
//!
//! Offline users are skipped silently; they pick the data up from stored
//! history. Send failures never reach the caller.

use axum::extract::ws::Message;
use serde::Serialize;

use super::ConnectionRegistry;
use crate::error::RelayError;

/// Serialize `event` and push it to `username` if they are online.
/// Returns whether a live connection accepted the event.
pub fn deliver_to_user<T: Serialize>(registry: &ConnectionRegistry, username: &str, event: &T) -> bool {
    match encode(event) {
        Some(text) => push_text(registry, username, text),
        None => false,
    }
}

/// Push `event` to every member except `exclude`.
/// Returns how many members were reached.
pub fn deliver_to_group<T, S>(registry: &ConnectionRegistry, members: &[S], exclude: &str, event: &T) -> usize
where
    T: Serialize,
    S: AsRef<str>,
{
    let Some(text) = encode(event) else {
        return 0;
    };

    members
        .iter()
        .map(AsRef::as_ref)
        .filter(|member| *member != exclude)
        .filter(|member| push_text(registry, member, text.clone()))
        .count()
}

fn encode<T: Serialize>(event: &T) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize delivery event");
            None
        }
    }
}

fn push_text(registry: &ConnectionRegistry, username: &str, text: String) -> bool {
    match try_push(registry, username, text) {
        Ok(()) => true,
        Err(RelayError::TargetOffline(_)) => false,
        Err(e) => {
            tracing::debug!(username = %username, error = %e, "Live delivery failed");
            false
        }
    }
}

fn try_push(registry: &ConnectionRegistry, username: &str, text: String) -> Result<(), RelayError> {
    let handle = registry
        .lookup(username)
        .ok_or_else(|| RelayError::TargetOffline(username.to_string()))?;

    handle.send(Message::Text(text.into())).inspect_err(|_| {
        // Writer is gone: drop the stale entry unless a newer connection took its place.
        registry.unregister(username, &handle);
    })
}
