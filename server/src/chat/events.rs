//! Outbound event shapes pushed over the presence channel.

use serde::{Deserialize, Serialize};

/// Tagged envelope: `{"type": "new_message", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DeliveryEvent {
    NewMessage(MessagePayload),
    NewVoiceMessage(MessagePayload),
    NewGroupVoiceMessage(MessagePayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// RFC 3339 timestamp assigned at persistence time.
    pub timestamp: String,
}

/// Relayed signaling payload stamped with the sender's username.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub from: String,
    pub data: serde_json::Value,
}

/// Public URL under which a stored audio blob is served.
pub fn audio_url(audio_file_id: &str) -> String {
    format!("/files/{}", audio_file_id)
}
