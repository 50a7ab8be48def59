use thiserror::Error;

/// Failures raised by the realtime core.
///
/// None of these cross connection boundaries: each one is local to the
/// connection or delivery attempt that produced it.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or invalid credential at connection open.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// Delivery attempted to a user with no live connection.
    #[error("user {0} is offline")]
    TargetOffline(String),

    /// Inbound frame that cannot be dispatched.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The outbound queue of a connection is closed.
    #[error("connection {0} is closed")]
    Transport(uuid::Uuid),

    /// Call session already holds the configured number of participants.
    #[error("call session {key} is full ({limit} participants)")]
    SessionFull { key: String, limit: usize },
}
