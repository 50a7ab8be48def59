use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::RelayError;
use crate::ws::{ConnectionHandle, Frame};

/// Canonical key of a two-party call.
///
/// Built from the two usernames in ordinal order, so both sides of the
/// call derive the same key no matter who dialed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallKey {
    low: String,
    high: String,
}

impl CallKey {
    pub fn new(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low: low.to_string(),
            high: high.to_string(),
        }
    }

    pub fn participants(&self) -> (&str, &str) {
        (&self.low, &self.high)
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call_{}_{}", self.low, self.high)
    }
}

/// In-memory call session manager.
///
/// Each session holds the connections currently attached to one call. A
/// session exists only while it has at least one connection. The relay
/// does not assume two participants: reconnect races can briefly leave one
/// or three connections in a session.
#[derive(Debug, Clone, Default)]
pub struct CallSessions {
    sessions: Arc<DashMap<CallKey, Vec<ConnectionHandle>>>,
}

impl CallSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection to the session, creating it if absent.
    ///
    /// `limit` caps the number of live connections per session; `None` leaves
    /// it unbounded. Returns the participant count after the join.
    pub fn join(&self, key: &CallKey, handle: ConnectionHandle, limit: Option<usize>) -> Result<usize, RelayError> {
        let mut entry = self.sessions.entry(key.clone()).or_default();
        let participants = entry.value_mut();

        // Connections whose writer is gone but whose teardown has not run yet
        // must not hold a seat against a reconnect.
        participants.retain(|p| !p.is_closed());

        if let Some(limit) = limit {
            if participants.len() >= limit {
                let empty = participants.is_empty();
                drop(entry);
                if empty {
                    self.sessions.remove_if(key, |_, p| p.is_empty());
                }
                return Err(RelayError::SessionFull {
                    key: key.to_string(),
                    limit,
                });
            }
        }

        if !participants.contains(&handle) {
            participants.push(handle);
        }
        let count = participants.len();

        tracing::debug!(call = %key, participants = count, "Joined call session");
        Ok(count)
    }

    /// Detach a connection. The session is dropped once it is empty, so the
    /// key is free for the next call between the same pair.
    pub fn leave(&self, key: &CallKey, handle: &ConnectionHandle) {
        let now_empty = match self.sessions.get_mut(key) {
            Some(mut entry) => {
                entry.value_mut().retain(|p| p != handle);
                entry.value().is_empty()
            }
            None => return,
        };

        // Re-check under the shard lock: a join may have slipped in.
        if now_empty && self.sessions.remove_if(key, |_, p| p.is_empty()).is_some() {
            tracing::debug!(call = %key, "Call session closed");
        }
    }

    /// Forward `frame` unchanged to every participant except `sender`.
    ///
    /// Recipients are snapshotted under the lock and sent to outside it.
    /// A failed send prunes that participant and does not stop the relay.
    /// Returns the number of participants the frame was queued for.
    pub fn relay(&self, key: &CallKey, frame: &Frame, sender: &ConnectionHandle) -> usize {
        let recipients: Vec<ConnectionHandle> = match self.sessions.get(key) {
            Some(entry) => entry.value().iter().filter(|p| *p != sender).cloned().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for recipient in &recipients {
            match recipient.send_frame(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(call = %key, error = %e, "Relay to participant failed");
                    self.leave(key, recipient);
                }
            }
        }
        delivered
    }

    pub fn participants(&self, key: &CallKey) -> Vec<ConnectionHandle> {
        self.sessions
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &CallKey) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
