use std::sync::Arc;

use crate::call::CallSessions;
use crate::config::WsConfig;
use crate::db::DbPool;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
/// Owned by the server process; every connection task holds a clone.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// HS256 secret for validating access tokens
    pub jwt_secret: Arc<Vec<u8>>,
    /// Live presence-channel connection per user
    pub connections: ConnectionRegistry,
    /// Active call sessions
    pub calls: CallSessions,
    /// Keepalive and session limits
    pub ws: WsConfig,
}

impl AppState {
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, ws: WsConfig) -> Self {
        Self {
            db,
            jwt_secret: Arc::new(jwt_secret),
            connections: ConnectionRegistry::new(),
            calls: CallSessions::new(),
            ws,
        }
    }
}
