pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;

use axum::body::Bytes;
use axum::extract::ws::Message;
use dashmap::DashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::RelayError;

/// Type alias for the sender half of a WebSocket connection's outbound queue.
/// The connection's writer task is the only consumer.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Cloneable handle to one live WebSocket connection.
///
/// Any task may send through it: messages are queued and written to the
/// socket by the owning connection's writer task, in call order.
/// Two handles are equal only if they refer to the same connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: ConnectionSender,
}

impl ConnectionHandle {
    pub fn new(tx: ConnectionSender) -> Self {
        Self {
            id: Uuid::now_v7(),
            tx,
        }
    }

    /// Create a handle together with the receiver its writer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a message for this connection.
    pub fn send(&self, msg: Message) -> Result<(), RelayError> {
        self.tx.send(msg).map_err(|_| RelayError::Transport(self.id))
    }

    /// Queue a frame, preserving its text/binary kind.
    pub fn send_frame(&self, frame: Frame) -> Result<(), RelayError> {
        self.send(frame.into())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A data frame as seen by the relay: structured text or raw bytes.
/// The two kinds are never converted into one another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// Extract the data frame from a WebSocket message.
    /// Control messages (ping, pong, close) yield `None`.
    pub fn from_message(msg: Message) -> Option<Self> {
        match msg {
            Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
            Message::Binary(data) => Some(Frame::Binary(data)),
            _ => None,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data),
        }
    }
}

/// Presence registry: at most one live connection per username.
///
/// A newer connection for the same user replaces the older entry. The
/// superseded connection is not closed here; it lingers until its own
/// socket fails or disconnects, and its teardown cannot evict the newer one.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` as the current connection for `username`.
    /// Returns the handle it replaced, if any.
    pub fn register(&self, username: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let connection_id = handle.id();
        let replaced = self.connections.insert(username.to_string(), handle);

        match &replaced {
            Some(old) => tracing::debug!(
                username = %username,
                connection_id = %connection_id,
                replaced = %old.id(),
                "Connection registered, superseding previous connection"
            ),
            None => tracing::debug!(
                username = %username,
                connection_id = %connection_id,
                "Connection registered"
            ),
        }

        replaced
    }

    /// Remove the entry for `username` only if it still points at `handle`.
    /// Returns whether an entry was removed.
    pub fn unregister(&self, username: &str, handle: &ConnectionHandle) -> bool {
        let removed = self
            .connections
            .remove_if(username, |_, current| current == handle)
            .is_some();

        tracing::debug!(
            username = %username,
            connection_id = %handle.id(),
            removed,
            "Connection unregistered"
        );

        removed
    }

    pub fn lookup(&self, username: &str) -> Option<ConnectionHandle> {
        self.connections.get(username).map(|entry| entry.value().clone())
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.connections.contains_key(username)
    }

    pub fn online_count(&self) -> usize {
        self.connections.len()
    }
}
