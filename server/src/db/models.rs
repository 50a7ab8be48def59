//! Database row types.
//! These correspond 1:1 to the SQLite schema defined in migrations.rs.

use serde::Serialize;

/// Direct message between two users.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectMessage {
    pub id: String,
    pub sender: String,
    pub receiver: String,
    pub content: Option<String>,
    pub audio_file_id: Option<String>,
    /// RFC 3339
    pub timestamp: String,
}

/// Message posted to a group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMessage {
    pub id: String,
    pub group_id: String,
    pub sender: String,
    pub content: Option<String>,
    pub audio_file_id: Option<String>,
    /// RFC 3339
    pub timestamp: String,
}

/// Group record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub admin: String,
    pub invite_key: String,
}

/// Group as listed to one of its members.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupInfo {
    pub id: String,
    pub name: String,
    pub admin: String,
    pub invite_key: String,
    pub members: Vec<String>,
}
