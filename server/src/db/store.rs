//! Store operations the realtime core relies on: user lookup, group
//! membership and message persistence.
//!
//! All functions are blocking; call them from `tokio::task::spawn_blocking`.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::models::{DirectMessage, Group, GroupInfo, GroupMessage};
use super::DbPool;

pub type StoreResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Insert a user with an already-hashed password.
/// Fails on a duplicate username (primary key).
pub fn create_user(db: &DbPool, username: &str, password_hash: &str) -> StoreResult<()> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    conn.execute(
        "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
        params![username, password_hash, now()],
    )?;
    Ok(())
}

/// Stored password hash for `username`, if the user exists.
pub fn password_hash(db: &DbPool, username: &str) -> StoreResult<Option<String>> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let hash = conn
        .query_row(
            "SELECT password_hash FROM users WHERE username = ?1",
            params![username],
            |row| row.get(0),
        )
        .optional()?;
    Ok(hash)
}

pub fn user_exists(db: &DbPool, username: &str) -> StoreResult<bool> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let found = conn
        .query_row(
            "SELECT 1 FROM users WHERE username = ?1",
            params![username],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Create a group; the admin becomes its first member.
pub fn create_group(db: &DbPool, name: &str, admin: &str) -> StoreResult<Group> {
    let mut conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let group = Group {
        id: Uuid::now_v7().to_string(),
        name: name.to_string(),
        admin: admin.to_string(),
        invite_key: Uuid::new_v4().simple().to_string(),
    };
    let created_at = now();

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO groups (id, name, admin, invite_key, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![group.id, group.name, group.admin, group.invite_key, created_at],
    )?;
    tx.execute(
        "INSERT INTO group_members (group_id, username, joined_at) VALUES (?1, ?2, ?3)",
        params![group.id, group.admin, created_at],
    )?;
    tx.commit()?;

    Ok(group)
}

/// Add a member; adding an existing member is a no-op.
pub fn add_group_member(db: &DbPool, group_id: &str, username: &str) -> StoreResult<()> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    conn.execute(
        "INSERT OR IGNORE INTO group_members (group_id, username, joined_at) VALUES (?1, ?2, ?3)",
        params![group_id, username, now()],
    )?;
    Ok(())
}

/// Look up a group by its invite key.
pub fn group_by_invite_key(db: &DbPool, invite_key: &str) -> StoreResult<Option<Group>> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let group = conn
        .query_row(
            "SELECT id, name, admin, invite_key FROM groups WHERE invite_key = ?1",
            params![invite_key],
            |row| {
                Ok(Group {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    admin: row.get(2)?,
                    invite_key: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(group)
}

pub fn group_exists(db: &DbPool, group_id: &str) -> StoreResult<bool> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let found = conn
        .query_row("SELECT 1 FROM groups WHERE id = ?1", params![group_id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

pub fn is_group_member(db: &DbPool, group_id: &str, username: &str) -> StoreResult<bool> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let found = conn
        .query_row(
            "SELECT 1 FROM group_members WHERE group_id = ?1 AND username = ?2",
            params![group_id, username],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn group_members(db: &DbPool, group_id: &str) -> StoreResult<Vec<String>> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let mut stmt = conn.prepare(
        "SELECT username FROM group_members WHERE group_id = ?1 ORDER BY joined_at, username",
    )?;
    let members = stmt
        .query_map(params![group_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}

/// Groups `username` belongs to, with their member lists, oldest first.
pub fn groups_for_user(db: &DbPool, username: &str) -> StoreResult<Vec<GroupInfo>> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let mut stmt = conn.prepare(
        "SELECT g.id, g.name, g.admin, g.invite_key
         FROM groups g
         JOIN group_members m ON m.group_id = g.id
         WHERE m.username = ?1
         ORDER BY g.created_at, g.id",
    )?;
    let groups = stmt
        .query_map(params![username], |row| {
            Ok(GroupInfo {
                id: row.get(0)?,
                name: row.get(1)?,
                admin: row.get(2)?,
                invite_key: row.get(3)?,
                members: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut members_stmt = conn.prepare(
        "SELECT username FROM group_members WHERE group_id = ?1 ORDER BY joined_at, username",
    )?;
    groups
        .into_iter()
        .map(|mut group| -> StoreResult<GroupInfo> {
            group.members = members_stmt
                .query_map(params![group.id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(group)
        })
        .collect()
}

/// Admin of `group_id`, or `None` when the group does not exist.
pub fn group_admin(db: &DbPool, group_id: &str) -> StoreResult<Option<String>> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let admin = conn
        .query_row(
            "SELECT admin FROM groups WHERE id = ?1",
            params![group_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(admin)
}

/// Delete a group. Members and history go with it (ON DELETE CASCADE).
/// Returns whether a group was removed.
pub fn delete_group(db: &DbPool, group_id: &str) -> StoreResult<bool> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let removed = conn.execute("DELETE FROM groups WHERE id = ?1", params![group_id])?;
    Ok(removed > 0)
}

pub fn insert_direct_message(
    db: &DbPool,
    sender: &str,
    receiver: &str,
    content: Option<&str>,
    audio_file_id: Option<&str>,
) -> StoreResult<DirectMessage> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let message = DirectMessage {
        id: Uuid::now_v7().to_string(),
        sender: sender.to_string(),
        receiver: receiver.to_string(),
        content: content.map(str::to_string),
        audio_file_id: audio_file_id.map(str::to_string),
        timestamp: now(),
    };

    conn.execute(
        "INSERT INTO messages (id, sender, receiver, content, audio_file_id, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            message.id,
            message.sender,
            message.receiver,
            message.content,
            message.audio_file_id,
            message.timestamp,
        ],
    )?;

    Ok(message)
}

pub fn insert_group_message(
    db: &DbPool,
    group_id: &str,
    sender: &str,
    content: Option<&str>,
    audio_file_id: Option<&str>,
) -> StoreResult<GroupMessage> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let message = GroupMessage {
        id: Uuid::now_v7().to_string(),
        group_id: group_id.to_string(),
        sender: sender.to_string(),
        content: content.map(str::to_string),
        audio_file_id: audio_file_id.map(str::to_string),
        timestamp: now(),
    };

    conn.execute(
        "INSERT INTO group_messages (id, group_id, sender, content, audio_file_id, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            message.id,
            message.group_id,
            message.sender,
            message.content,
            message.audio_file_id,
            message.timestamp,
        ],
    )?;

    Ok(message)
}

/// Direct messages sent or received by `username`, oldest first.
pub fn messages_for_user(db: &DbPool, username: &str) -> StoreResult<Vec<DirectMessage>> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let mut stmt = conn.prepare(
        "SELECT id, sender, receiver, content, audio_file_id, timestamp
         FROM messages
         WHERE sender = ?1 OR receiver = ?1
         ORDER BY timestamp, rowid",
    )?;
    let messages = stmt
        .query_map(params![username], |row| {
            Ok(DirectMessage {
                id: row.get(0)?,
                sender: row.get(1)?,
                receiver: row.get(2)?,
                content: row.get(3)?,
                audio_file_id: row.get(4)?,
                timestamp: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

/// Messages posted to `group_id`, oldest first.
pub fn group_messages(db: &DbPool, group_id: &str) -> StoreResult<Vec<GroupMessage>> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let mut stmt = conn.prepare(
        "SELECT id, group_id, sender, content, audio_file_id, timestamp
         FROM group_messages
         WHERE group_id = ?1
         ORDER BY timestamp, rowid",
    )?;
    let messages = stmt
        .query_map(params![group_id], |row| {
            Ok(GroupMessage {
                id: row.get(0)?,
                group_id: row.get(1)?,
                sender: row.get(2)?,
                content: row.get(3)?,
                audio_file_id: row.get(4)?,
                timestamp: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}
